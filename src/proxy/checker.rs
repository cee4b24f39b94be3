//! Capability validator: the staged qualification protocol

use crate::error::{Error, Result};
use crate::models::{Capability, CapabilityMask};
use crate::proxy::models::{Candidate, ProxyScheme};
use crate::proxy::parser::ProxyParser;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default URL for the plain HTTP liveness probe
const DEFAULT_HTTP_URL: &str = "http://httpbin.org";

/// Default URL for the HTTPS and SOCKS5 liveness probes
const DEFAULT_HTTPS_URL: &str = "https://www.qq.com";

const PROBE_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:34.0) Gecko/20100101 Firefox/34.0";

/// Configuration for the liveness probes
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Target of the HTTP probe
    pub http_url: String,
    /// Target of the HTTPS and SOCKS5 probes
    pub https_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            http_url: DEFAULT_HTTP_URL.to_string(),
            https_url: DEFAULT_HTTPS_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_http_url(mut self, url: String) -> Self {
        self.http_url = url;
        self
    }

    pub fn with_https_url(mut self, url: String) -> Self {
        self.https_url = url;
        self
    }
}

/// Produces a capability mask for a raw candidate
#[async_trait]
pub trait Qualifier: Send + Sync {
    async fn qualify(&self, candidate: &str) -> CapabilityMask;
}

/// Runs one network liveness probe against a candidate
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, candidate: &Candidate, capability: Capability) -> Result<()>;
}

/// Pluggable check for the `CUSTOM` capability tier
#[async_trait]
pub trait ExtensionProbe: Send + Sync {
    async fn check(&self, candidate: &Candidate) -> bool;
}

/// Extension that never passes
pub struct NoExtension;

#[async_trait]
impl ExtensionProbe for NoExtension {
    async fn check(&self, _candidate: &Candidate) -> bool {
        false
    }
}

/// Liveness probes over reqwest
///
/// Each probe builds its own client with no idle pool, so the connection
/// is dropped together with the client when the probe returns.
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    config: CheckerConfig,
}

impl HttpProber {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &Candidate, scheme: ProxyScheme) -> Result<Client> {
        let proxy_url = candidate.url(scheme);
        let mut reqwest_proxy = match scheme {
            ProxyScheme::Http => ReqwestProxy::http(&proxy_url)?,
            ProxyScheme::Socks5 => ReqwestProxy::all(&proxy_url)?,
        };
        if let Some(auth) = &candidate.auth {
            reqwest_proxy = reqwest_proxy.basic_auth(&auth.username, &auth.password);
        }

        let client = Client::builder()
            .proxy(reqwest_proxy)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout)
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(0)
            .default_headers(probe_headers())
            .build()?;

        Ok(client)
    }

    fn target(&self, capability: Capability) -> Option<(ProxyScheme, &str)> {
        match capability {
            Capability::Http => Some((ProxyScheme::Http, self.config.http_url.as_str())),
            Capability::Https => Some((ProxyScheme::Http, self.config.https_url.as_str())),
            Capability::Socks5 => Some((ProxyScheme::Socks5, self.config.https_url.as_str())),
            Capability::Custom => None,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, candidate: &Candidate, capability: Capability) -> Result<()> {
        let (scheme, url) = self
            .target(capability)
            .ok_or_else(|| Error::ProbeRefused(format!("no network probe for {}", capability)))?;

        let client = self.create_client(candidate, scheme)?;
        match tokio::time::timeout(self.config.timeout, client.get(url).send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
            Ok(Ok(response)) => Err(Error::ProbeRefused(format!(
                "HTTP status: {}",
                response.status()
            ))),
            Ok(Err(e)) if e.is_timeout() => Err(Error::ProbeTimeout(self.config.timeout)),
            Ok(Err(e)) => Err(Error::ProbeRefused(e.to_string())),
            Err(_) => Err(Error::ProbeTimeout(self.config.timeout)),
        }
    }
}

fn probe_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(PROBE_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.8"));
    headers
}

/// Staged validator
///
/// Stages run in order: format, HTTP, HTTPS, SOCKS5, extension. The first
/// failing stage ends qualification; the mask holds the bits earned so far.
pub struct ProxyChecker<P = HttpProber> {
    prober: P,
    extension: Arc<dyn ExtensionProbe>,
}

impl ProxyChecker<HttpProber> {
    /// Create a checker probing over the network with the given configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self::new(HttpProber::new(config))
    }
}

impl<P: Prober> ProxyChecker<P> {
    pub fn new(prober: P) -> Self {
        Self {
            prober,
            extension: Arc::new(NoExtension),
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn ExtensionProbe>) -> Self {
        self.extension = extension;
        self
    }

    /// Run the staged protocol on one raw candidate
    pub async fn check_proxy(&self, raw: &str) -> CapabilityMask {
        let mut mask = CapabilityMask::NONE;

        let candidate = match ProxyParser::parse_candidate(raw) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!(candidate = raw, error = %e, "format check failed");
                return mask;
            }
        };

        for capability in Capability::ALL {
            let passed = match capability {
                Capability::Custom => self.extension.check(&candidate).await,
                _ => match self.prober.probe(&candidate, capability).await {
                    Ok(()) => true,
                    Err(e) if e.is_probe_failure() => {
                        debug!(candidate = raw, stage = %capability, error = %e, "probe failed");
                        false
                    }
                    Err(e) => {
                        warn!(candidate = raw, stage = %capability, error = %e, "probe could not run");
                        false
                    }
                },
            };

            if !passed {
                break;
            }
            mask.insert(capability);
        }

        mask
    }
}

#[async_trait]
impl<P: Prober> Qualifier for ProxyChecker<P> {
    async fn qualify(&self, candidate: &str) -> CapabilityMask {
        self.check_proxy(candidate).await
    }
}
