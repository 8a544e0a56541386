pub mod sequential;
pub mod types;

use crate::config::Config;
use anyhow::{bail, Context, Result};
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::Resolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

pub use self::sequential::SequentialResolver;
pub use self::types::{DnsResolver, Upstream};

/// Builds the forwarding resolver from `upstream_servers`.
pub fn create_resolver(config: &Config) -> Result<Arc<dyn DnsResolver>> {
    let mut upstreams = Vec::new();
    for (idx, upstream_url) in config.upstream_servers.iter().enumerate() {
        match create_upstream(config, upstream_url) {
            Ok(upstream) => {
                info!("Added upstream: [{}] {}", idx, upstream_url);
                upstreams.push(upstream);
            }
            Err(e) => error!("Skipping upstream {}: {:#}", upstream_url, e),
        }
    }

    if upstreams.is_empty() {
        bail!("No valid upstreams available");
    }

    Ok(Arc::new(SequentialResolver { upstreams }) as Arc<dyn DnsResolver>)
}

/// Parses `udp://`, `tcp://`, `tls://` or `https://` upstream URLs with an IP host.
///
/// Encrypted upstreams verify the certificate against that IP. For `https://`
/// a non-root path becomes the DoH endpoint.
fn parse_upstream(upstream_url: &str) -> Result<NameServerConfig> {
    let url = Url::parse(upstream_url).context("Failed to parse upstream URL")?;

    let (protocol, default_port) = match url.scheme() {
        "udp" => (Protocol::Udp, 53),
        "tcp" => (Protocol::Tcp, 53),
        "tls" => (Protocol::Tls, 853),
        "https" => (Protocol::Https, 443),
        other => bail!("unsupported upstream scheme '{}'", other),
    };

    let host = url
        .host_str()
        .context("upstream URL has no host")?
        .trim_start_matches('[')
        .trim_end_matches(']');
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("upstream host '{}' must be an IP address", host))?;

    let mut ns = NameServerConfig::new(
        SocketAddr::new(ip, url.port().unwrap_or(default_port)),
        protocol,
    );
    if matches!(protocol, Protocol::Tls | Protocol::Https) {
        ns.tls_dns_name = Some(host.to_string());
    }
    if protocol == Protocol::Https && url.path() != "/" {
        ns.http_endpoint = Some(url.path().to_string());
    }

    Ok(ns)
}

fn create_upstream(config: &Config, upstream_url: &str) -> Result<Upstream> {
    let mut resolver_config = ResolverConfig::new();
    resolver_config.add_name_server(parse_upstream(upstream_url)?);

    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;
    opts.timeout = Duration::from_millis(config.upstream_timeout_ms);

    let resolver =
        Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

    Ok(Upstream {
        url: upstream_url.to_string(),
        resolver,
    })
}

/// Resolves `host` through the `bootstrap` server only.
///
/// Used for list URLs, so list fetching does not depend on the resolver the
/// filter itself sits in front of.
pub async fn bootstrap_host(bootstrap: SocketAddr, host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse() {
        return Ok(SocketAddr::new(addr, port));
    }

    let mut cfg = ResolverConfig::new();
    cfg.add_name_server(NameServerConfig::new(bootstrap, Protocol::Udp));

    let resolver = Resolver::builder_with_config(cfg, TokioConnectionProvider::default())
        .with_options(ResolverOpts::default())
        .build();

    info!("Bootstrapping list host {} via {}", host, bootstrap);
    let lookup = resolver
        .lookup_ip(host)
        .await
        .with_context(|| format!("Failed to bootstrap {}", host))?;
    let ip = lookup
        .into_iter()
        .next()
        .context("No IP found for bootstrap host")?;

    Ok(SocketAddr::new(ip, port))
}
