use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::signal;
use tracing::{info, warn};

use dns_blocklist::api;
use dns_blocklist::config::Config;
use dns_blocklist::engine::{Blocklist, ListLoader, ReloadHandle, StandardLoader};
use dns_blocklist::init::setup_logging;
use dns_blocklist::server::DnsHandler;
use dns_blocklist::stats::StatsCollector;
use hickory_server::ServerFuture;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config_exists = std::path::Path::new(&config_path).exists();
    let config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting dns-blocklist...");
    if !config_exists {
        info!("Config file not found, using defaults.");
    }

    // 3. Validate filter stages; any error here stops startup
    let stage_configs = config
        .blocklist_configs()
        .context("Invalid blocklist configuration")?;
    if stage_configs.is_empty() {
        warn!("No [[blocklist]] configured, forwarding everything.");
    }

    // 4. Init Stats
    let stats = StatsCollector::new();
    if config.stats.enable {
        stats.spawn_logger(Duration::from_secs(config.stats.log_interval_seconds));
    }

    // 5. Build engines and load every list once before serving
    let loader: Arc<dyn ListLoader> = Arc::new(StandardLoader::new()?);
    let mut filters = Vec::with_capacity(stage_configs.len());
    for stage in stage_configs {
        let filter = Arc::new(Blocklist::new(stage, loader.clone()));
        filter
            .reload()
            .await
            .with_context(|| format!("Initial load of {} failed", filter.config().location))?;
        filters.push(filter);
    }

    // 6. Spawn Periodic Reloaders
    let reload_handles: Vec<ReloadHandle> = filters
        .iter()
        .map(|f| ReloadHandle::spawn(f.clone(), f.config().reload))
        .collect();
    let reloaders: api::Reloaders = reload_handles.iter().map(ReloadHandle::trigger).collect();

    // 7. Init Upstream Resolver
    let upstream_resolver = dns_blocklist::resolver::create_resolver(&config)?;

    // 8. Build Handler
    let handler = DnsHandler::new(stats.clone(), filters, upstream_resolver);

    // 9. Start API Server
    if config.api.enable {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.api.port)))
            .await
            .context("Failed to bind API listener")?;
        let app = api::router(stats.clone(), reloaders);
        tokio::spawn(async move {
            if let Err(e) = api::start_api_server(listener, app).await {
                tracing::error!("API server failed: {:#}", e);
            }
        });
    }

    // 10. Start Server
    let mut server = ServerFuture::new(handler);
    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("Invalid listen host '{}'", config.host))?,
        config.port,
    );

    // UDP
    let udp_socket = UdpSocket::bind(addr).await?;
    server.register_socket(udp_socket);

    // TCP
    let tcp_listener = TcpListener::bind(addr).await?;
    server.register_listener(tcp_listener, Duration::from_secs(5));

    info!("DNS Server listening on {}", addr);

    // 11. Graceful Shutdown
    tokio::select! {
        _ = server.block_until_done() => {},
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    for handle in reload_handles {
        handle.shutdown().await;
    }

    Ok(())
}
