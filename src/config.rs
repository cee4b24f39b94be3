//! Application configuration
//!
//! Loaded once from a TOML file at startup and never reloaded. A missing
//! file is replaced by the defaults; missing keys fall back to defaults.

use crate::database::{validate_table_name, DEFAULT_TABLE};
use crate::error::{Error, Result};
use crate::maintenance::MaintenanceSettings;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::crawler::{CrawlerConfig, ProxySource};
use crate::proxy::geo::DEFAULT_GEO_URL;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// A user-defined URL-list source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub urls: Vec<String>,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file path
    pub database: String,
    /// Table holding the pool
    pub table_name: String,
    /// Enabled source names
    pub sources: Vec<String>,
    /// Target of the HTTP probe
    pub http_url: String,
    /// Target of the HTTPS and SOCKS5 probes
    pub https_url: String,
    /// Probe timeout in seconds
    pub verify_timeout_secs: u64,
    /// Failed checks tolerated before eviction
    pub max_fail_count: u32,
    /// Pool size below which a check cycle also fetches
    pub pool_size_min: usize,
    /// Resolve a location for new proxies
    pub proxy_region: bool,
    /// Geolocation endpoint, `{ip}` is substituted
    pub geo_url: String,
    /// Geolocation timeout in seconds
    pub geo_timeout_secs: u64,
    /// Seconds between fetch cycles
    pub fetch_interval_secs: u64,
    /// Seconds between check cycles
    pub check_interval_secs: u64,
    /// IANA timezone used for schedule logs and displayed timestamps
    pub timezone: String,
    /// Source page timeout in seconds
    pub crawl_timeout_secs: u64,
    /// Pause between pages of one source, in milliseconds
    pub crawl_page_delay_millis: u64,
    /// User agent sent to source pages
    pub crawl_user_agent: String,
    /// Extra URL-list sources added to the registry
    pub extra_sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let crawler = CrawlerConfig::default();
        Self {
            database: "proxies.db".to_string(),
            table_name: DEFAULT_TABLE.to_string(),
            sources: ProxySource::builtin().into_iter().map(|s| s.name).collect(),
            http_url: "http://httpbin.org".to_string(),
            https_url: "https://www.qq.com".to_string(),
            verify_timeout_secs: 10,
            max_fail_count: 0,
            pool_size_min: 20,
            proxy_region: true,
            geo_url: DEFAULT_GEO_URL.to_string(),
            geo_timeout_secs: 10,
            fetch_interval_secs: 240,
            check_interval_secs: 120,
            timezone: "Asia/Shanghai".to_string(),
            crawl_timeout_secs: crawler.timeout.as_secs(),
            crawl_page_delay_millis: crawler.page_delay.as_millis() as u64,
            crawl_user_agent: crawler.user_agent,
            extra_sources: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`, writing the defaults there if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!(path = %path.display(), "config file missing, wrote defaults");
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table_name)?;
        self.timezone()?;

        for (key, secs) in [
            ("verify_timeout_secs", self.verify_timeout_secs),
            ("geo_timeout_secs", self.geo_timeout_secs),
            ("fetch_interval_secs", self.fetch_interval_secs),
            ("check_interval_secs", self.check_interval_secs),
            ("crawl_timeout_secs", self.crawl_timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", key)));
            }
        }

        for (key, url) in [("http_url", &self.http_url), ("https_url", &self.https_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!("{} is not an http(s) URL: {}", key, url)));
            }
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("Unknown timezone: {}", self.timezone)))
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_timeout(Duration::from_secs(self.verify_timeout_secs))
            .with_http_url(self.http_url.clone())
            .with_https_url(self.https_url.clone())
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new()
            .with_timeout(Duration::from_secs(self.crawl_timeout_secs))
            .with_page_delay(Duration::from_millis(self.crawl_page_delay_millis))
            .with_user_agent(self.crawl_user_agent.clone())
    }

    pub fn maintenance_settings(&self) -> Result<MaintenanceSettings> {
        Ok(MaintenanceSettings {
            pool_size_min: self.pool_size_min,
            max_fail_count: self.max_fail_count,
            fetch_interval: Duration::from_secs(self.fetch_interval_secs),
            check_interval: Duration::from_secs(self.check_interval_secs),
            timezone: self.timezone()?,
        })
    }

    pub fn extra_proxy_sources(&self) -> Vec<ProxySource> {
        self.extra_sources
            .iter()
            .map(|s| ProxySource {
                name: s.name.clone(),
                urls: s.urls.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pool_size_min, 20);
        assert_eq!(config.max_fail_count, 0);
        assert_eq!(config.fetch_interval_secs, 240);
        assert_eq!(config.check_interval_secs, 120);
        assert!(config.sources.contains(&"sslproxies".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
pool_size_min = 5
max_fail_count = 2
sources = ["sslproxies"]

[[extra_sources]]
name = "mine"
urls = ["https://example.com/list.txt"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pool_size_min, 5);
        assert_eq!(config.max_fail_count, 2);
        assert_eq!(config.sources, vec!["sslproxies"]);
        assert_eq!(config.timezone, "Asia/Shanghai");
        assert_eq!(config.extra_proxy_sources()[0].name, "mine");
    }

    #[test]
    fn test_invalid_values() {
        let config = Config {
            timezone: "Mars/Olympus".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            check_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            table_name: "bad name".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            https_url: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config::default();
        let checker = config.checker_config();
        assert_eq!(checker.timeout, Duration::from_secs(10));
        assert_eq!(checker.https_url, "https://www.qq.com");

        let settings = config.maintenance_settings().unwrap();
        assert_eq!(settings.fetch_interval, Duration::from_secs(240));
        assert_eq!(settings.timezone, chrono_tz::Asia::Shanghai);

        let crawler = config.crawler_config();
        assert_eq!(crawler.timeout, Duration::from_secs(30));
        assert_eq!(crawler.page_delay, Duration::from_secs(1));
        assert_eq!(crawler.user_agent, CrawlerConfig::default().user_agent);
    }

    #[test]
    fn test_crawler_keys_reach_crawler_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
crawl_timeout_secs = 5
crawl_page_delay_millis = 0
crawl_user_agent = "pool-bot/1.0"
"#,
        )
        .unwrap();

        let crawler = Config::load(&path).unwrap().crawler_config();
        assert_eq!(crawler.timeout, Duration::from_secs(5));
        assert_eq!(crawler.page_delay, Duration::ZERO);
        assert_eq!(crawler.user_agent, "pool-bot/1.0");
    }
}
