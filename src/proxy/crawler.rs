//! Candidate sources backed by public proxy list pages
//!
//! This module provides:
//! - A URL-list source that fetches pages and extracts `ip:port` entries
//! - The static registry that maps configured source names to sources

use crate::error::{Error, Result};
use crate::ingest::{CandidateSink, CandidateSource};
use crate::proxy::parser::ProxyParser;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default pause between pages of the same source
const DEFAULT_PAGE_DELAY_MILLIS: u64 = 1000;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Configuration for source fetches
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Pause between consecutive pages of one source
    pub page_delay: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MILLIS),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Build the shared client used by every URL-list source
    pub fn build_client(&self) -> Result<Client> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(client)
    }
}

/// A named list of pages to scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// Pages to fetch, in order
    pub urls: Vec<String>,
}

impl ProxySource {
    pub fn new(name: &str, urls: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// Built-in sources
    pub fn builtin() -> Vec<ProxySource> {
        vec![
            ProxySource::new("free-proxy-list", &["https://free-proxy-list.net/"]),
            ProxySource::new("sslproxies", &["https://www.sslproxies.org/"]),
            ProxySource::new("us-proxy", &["https://www.us-proxy.org/"]),
            ProxySource::new("socks-proxy", &["https://www.socks-proxy.net/"]),
            ProxySource::new("66ip", &["http://www.66ip.cn/"]),
            ProxySource::new(
                "kxdaili",
                &[
                    "http://www.kxdaili.com/dailiip.html",
                    "http://www.kxdaili.com/dailiip/2/1.html",
                ],
            ),
            ProxySource::new(
                "ip3366",
                &[
                    "http://www.ip3366.net/free/?stype=1",
                    "http://www.ip3366.net/free/?stype=2",
                ],
            ),
            ProxySource::new(
                "kuaidaili",
                &[
                    "https://www.kuaidaili.com/free/inha/1/",
                    "https://www.kuaidaili.com/free/intr/1/",
                ],
            ),
            ProxySource::new(
                "proxy-master",
                &["https://raw.githubusercontent.com/MuRongPIG/Proxy-Master/main/http.txt"],
            ),
            ProxySource::new(
                "shiftytr",
                &[
                    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/http.txt",
                    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/https.txt",
                ],
            ),
            ProxySource::new(
                "hookzof-socks5",
                &["https://raw.githubusercontent.com/hookzof/socks5_list/master/proxy.txt"],
            ),
        ]
    }
}

/// Candidate source that scrapes `ip:port` entries from a list of pages
pub struct UrlListSource {
    source: ProxySource,
    client: Client,
    page_delay: Duration,
}

impl UrlListSource {
    pub fn new(source: ProxySource, client: Client, page_delay: Duration) -> Self {
        Self {
            source,
            client,
            page_delay,
        }
    }

    /// Fetch and parse candidates from a single page
    pub async fn crawl_url(&self, url: &str) -> Result<Vec<String>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(ProxyParser::extract(&content))
    }
}

#[async_trait]
impl CandidateSource for UrlListSource {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn run(&self, sink: CandidateSink) -> Result<()> {
        let mut failures = 0;
        let mut last_error = None;

        for (index, url) in self.source.urls.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.page_delay).await;
            }

            match self.crawl_url(url).await {
                Ok(candidates) => {
                    debug!(source = %self.source.name, url = %url, found = candidates.len(), "page crawled");
                    for candidate in candidates {
                        if !sink.emit(candidate) {
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    warn!(source = %self.source.name, url = %url, error = %e, "page crawl failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failures == self.source.urls.len() => Err(Error::Source {
                name: self.source.name.clone(),
                reason: e.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Static name → source table, resolved once at startup
#[derive(Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn CandidateSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in source plus the given extra lists
    pub fn with_builtin(config: &CrawlerConfig, extra: &[ProxySource]) -> Result<Self> {
        let client = config.build_client()?;
        let mut registry = Self::new();
        for source in ProxySource::builtin().into_iter().chain(extra.iter().cloned()) {
            registry.register(Arc::new(UrlListSource::new(
                source,
                client.clone(),
                config.page_delay,
            )))?;
        }
        Ok(registry)
    }

    /// Add a source; names must be unique
    pub fn register(&mut self, source: Arc<dyn CandidateSource>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(Error::Config(format!("Duplicate source name: {}", name)));
        }
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Look up the configured sources; any unknown name is an error
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn CandidateSource>>> {
        names
            .iter()
            .map(|name| {
                self.sources.get(name).cloned().ok_or_else(|| {
                    Error::Config(format!(
                        "Unknown proxy source: {}. Available: {}",
                        name,
                        self.names().collect::<Vec<_>>().join(", ")
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_config_default() {
        let config = CrawlerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.page_delay, Duration::from_millis(DEFAULT_PAGE_DELAY_MILLIS));
    }

    #[test]
    fn test_crawler_config_builder() {
        let config = CrawlerConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string())
            .with_page_delay(Duration::ZERO);

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
        assert_eq!(config.page_delay, Duration::ZERO);
    }

    #[test]
    fn test_builtin_sources() {
        let sources = ProxySource::builtin();
        assert!(!sources.is_empty());
        for source in &sources {
            assert!(!source.name.is_empty());
            assert!(!source.urls.is_empty());
            assert!(source.urls.iter().all(|u| u.starts_with("http")));
        }
    }

    #[test]
    fn test_registry_resolve() {
        let extra = [ProxySource::new("my-list", &["https://example.com/proxies.txt"])];
        let registry = SourceRegistry::with_builtin(&CrawlerConfig::default(), &extra).unwrap();

        let resolved = registry
            .resolve(&["sslproxies".to_string(), "my-list".to_string()])
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["sslproxies", "my-list"]);
    }

    #[test]
    fn test_registry_unknown_name() {
        let registry = SourceRegistry::with_builtin(&CrawlerConfig::default(), &[]).unwrap();
        let err = registry.resolve(&["FreeProxy99".to_string()]).err().unwrap();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("FreeProxy99")));
    }

    #[test]
    fn test_registry_duplicate_name() {
        let extra = [ProxySource::new("sslproxies", &["https://example.com/"])];
        assert!(SourceRegistry::with_builtin(&CrawlerConfig::default(), &extra).is_err());
    }
}
