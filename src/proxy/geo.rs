//! Geolocation lookup for proxy IPs

use crate::error::{Error, Result};
use crate::proxy::parser::ProxyParser;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Default lookup endpoint; `{ip}` is replaced by the proxy IP
pub const DEFAULT_GEO_URL: &str = "https://searchplugin.csdn.net/api/v1/ip/get?ip={ip}";

/// Default timeout for a lookup in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Resolves a human-readable location for a candidate address
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<String>;
}

/// Geolocation disabled: every lookup yields an empty location
pub struct NoGeolocation;

#[async_trait]
impl Geolocator for NoGeolocation {
    async fn resolve(&self, _address: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// `{"code":200,"msg":"success","data":{"address":"...","ip":"..."}}`
#[derive(Debug, Deserialize)]
struct GeoEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<GeoData>,
}

#[derive(Debug, Deserialize)]
struct GeoData {
    #[serde(default)]
    address: String,
}

/// Geolocator backed by a JSON lookup service
#[derive(Clone)]
pub struct HttpGeolocator {
    client: Client,
    url_template: String,
}

impl HttpGeolocator {
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_GEO_URL, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_config(url_template: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.to_string(),
        })
    }

    fn lookup_url(&self, ip: &str) -> String {
        self.url_template.replace("{ip}", ip)
    }

    /// Extract the location from a lookup response body
    pub fn parse_response(body: &str) -> Result<String> {
        let envelope: GeoEnvelope = serde_json::from_str(body)?;
        match (envelope.code, envelope.data) {
            (200, Some(data)) => Ok(data.address),
            (code, _) => Err(Error::GeolocationUnavailable(format!(
                "lookup returned code {}: {}",
                code, envelope.msg
            ))),
        }
    }
}

#[async_trait]
impl Geolocator for HttpGeolocator {
    async fn resolve(&self, address: &str) -> Result<String> {
        let ip = ProxyParser::host_of(address);
        let response = self
            .client
            .get(self.lookup_url(ip))
            .send()
            .await
            .map_err(|e| Error::GeolocationUnavailable(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::GeolocationUnavailable(e.to_string()))?;
        Self::parse_response(&body)
    }
}
