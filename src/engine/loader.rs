use super::matcher::normalize;
use crate::resolver::bootstrap_host;
use anyhow::{bail, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use url::Url;

/// Upper bound on a whole list download, body included.
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of domain lists: local files or remote URLs.
#[async_trait::async_trait]
pub trait ListLoader: Send + Sync {
    /// Fetches and parses the list at `location` into normalized domain names.
    ///
    /// `bootstrap` is the resolver used to look up the host of a remote location.
    async fn load(&self, location: &str, bootstrap: Option<SocketAddr>) -> Result<Vec<String>>;
}

/// Loads lists from disk with `tokio::fs` and from `http(s)://` URLs with `reqwest`.
pub struct StandardLoader {
    client: Client,
}

impl StandardLoader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent("dns-blocklist/0.1")
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Extracts the domains a single list line contributes.
    ///
    /// Handles plain domain lists and hosts files (`0.0.0.0 a.com b.com`).
    fn parse_line(line: &str) -> Vec<String> {
        let line = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let mut fields = line.split_whitespace();
        let first = match fields.next() {
            Some(f) => f,
            None => return Vec::new(),
        };

        let names: Vec<&str> = if first.parse::<std::net::IpAddr>().is_ok() {
            fields.collect()
        } else {
            vec![first]
        };

        names
            .into_iter()
            .map(|n| n.trim_start_matches("*."))
            .filter(|n| !n.is_empty())
            .map(normalize)
            .collect()
    }

    async fn parse_lines<R: AsyncBufRead + Unpin>(reader: R) -> Result<Vec<String>> {
        let mut lines = reader.lines();
        let mut domains = Vec::new();
        while let Some(line) = lines.next_line().await? {
            domains.extend(Self::parse_line(&line));
        }
        Ok(domains)
    }

    async fn fetch(&self, url: Url, bootstrap: Option<SocketAddr>) -> Result<Vec<String>> {
        let client = match (bootstrap, url.host_str()) {
            (Some(server), Some(host)) if host.parse::<std::net::IpAddr>().is_err() => {
                let port = url.port_or_known_default().unwrap_or(443);
                let addr = bootstrap_host(server, host, port).await?;
                debug!("Pinned {} to {} via bootstrap {}", host, addr, server);
                Client::builder()
                    .user_agent("dns-blocklist/0.1")
                    .timeout(FETCH_TIMEOUT)
                    .resolve(host, addr)
                    .build()
                    .context("Failed to build bootstrapped HTTP client")?
            }
            _ => self.client.clone(),
        };

        let resp = client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !resp.status().is_success() {
            bail!("Fetching {} returned {}", url, resp.status());
        }

        let stream = resp
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));
        let reader = BufReader::new(StreamReader::new(stream));
        Self::parse_lines(reader)
            .await
            .with_context(|| format!("Failed to read {}", url))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<String>> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open list file {}", path))?;
        Self::parse_lines(BufReader::new(file))
            .await
            .with_context(|| format!("Failed to read list file {}", path))
    }
}

#[async_trait::async_trait]
impl ListLoader for StandardLoader {
    async fn load(&self, location: &str, bootstrap: Option<SocketAddr>) -> Result<Vec<String>> {
        let domains = match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.fetch(url, bootstrap).await?
            }
            _ => self.read_file(location).await?,
        };
        info!("Parsed {} entries from {}", domains.len(), location);
        Ok(domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_line_formats() {
        assert_eq!(StandardLoader::parse_line("example.com"), vec!["example.com."]);
        assert_eq!(StandardLoader::parse_line("Ads.Example.COM."), vec!["ads.example.com."]);
        assert_eq!(StandardLoader::parse_line("*.tracker.net"), vec!["tracker.net."]);
        assert_eq!(
            StandardLoader::parse_line("0.0.0.0 a.com b.com # trailing"),
            vec!["a.com.", "b.com."]
        );
        assert_eq!(StandardLoader::parse_line("::1 localhost"), vec!["localhost."]);
        assert!(StandardLoader::parse_line("# comment").is_empty());
        assert!(StandardLoader::parse_line("   ").is_empty());
        assert!(StandardLoader::parse_line("127.0.0.1").is_empty());
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Check comments").unwrap();
        writeln!(file, "example.com").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "0.0.0.0 adserver.net").unwrap();

        let loader = StandardLoader::new().unwrap();
        let domains = loader
            .load(file.path().to_str().unwrap(), None)
            .await
            .unwrap();

        assert_eq!(domains, vec!["example.com.", "adserver.net."]);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let loader = StandardLoader::new().unwrap();
        assert!(loader.load("/no/such/list.txt", None).await.is_err());
    }

    async fn serve_lists() -> String {
        use axum::{http::StatusCode, routing::get, Router};

        let app = Router::new()
            .route(
                "/hosts.txt",
                get(|| async {
                    "# ad servers\n0.0.0.0 ads.example tracker.example\n\nplain.example # inline\n"
                }),
            )
            .route("/gone.txt", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_load_url() {
        let base = serve_lists().await;
        let loader = StandardLoader::new().unwrap();

        let domains = loader
            .load(&format!("{}/hosts.txt", base), None)
            .await
            .unwrap();
        assert_eq!(
            domains,
            vec!["ads.example.", "tracker.example.", "plain.example."]
        );

        // Literal IP hosts never go through the bootstrap resolver.
        let bootstrap = Some("127.0.0.1:1".parse().unwrap());
        let domains = loader
            .load(&format!("{}/hosts.txt", base), bootstrap)
            .await
            .unwrap();
        assert_eq!(domains.len(), 3);
    }

    #[tokio::test]
    async fn test_load_url_error_status_fails() {
        let base = serve_lists().await;
        let loader = StandardLoader::new().unwrap();

        let err = loader
            .load(&format!("{}/gone.txt", base), None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("404"));
    }
}
