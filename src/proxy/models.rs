//! Candidate proxy models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl ProxyAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

/// Scheme used to reach a candidate during probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Socks5,
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyScheme::Http => write!(f, "http"),
            ProxyScheme::Socks5 => write!(f, "socks5"),
        }
    }
}

/// A syntactically valid candidate: `[user:pass@]ipv4:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
}

impl Candidate {
    /// Create a new candidate without authentication
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port, auth: None }
    }

    /// Create a new candidate with authentication
    pub fn with_auth(ip: Ipv4Addr, port: u16, username: String, password: String) -> Self {
        Self {
            ip,
            port,
            auth: Some(ProxyAuth::new(username, password)),
        }
    }

    /// Proxy endpoint URL for the given scheme
    ///
    /// Credentials are never part of the URL; they are attached to the
    /// proxy separately so no character in them can change the endpoint.
    pub fn url(&self, scheme: ProxyScheme) -> String {
        format!("{}://{}:{}", scheme, self.ip, self.port)
    }
}

/// Renders the pool key form, `[user:pass@]ip:port`
impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.auth {
            Some(auth) => write!(
                f,
                "{}:{}@{}:{}",
                auth.username, auth.password, self.ip, self.port
            ),
            None => write!(f, "{}:{}", self.ip, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_creation() {
        let candidate = Candidate::new(Ipv4Addr::new(127, 0, 0, 1), 8080);
        assert_eq!(candidate.port, 8080);
        assert!(candidate.auth.is_none());
        assert_eq!(candidate.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_candidate_urls() {
        let candidate = Candidate::new(Ipv4Addr::new(127, 0, 0, 1), 8080);
        assert_eq!(candidate.url(ProxyScheme::Http), "http://127.0.0.1:8080");

        let candidate = Candidate::with_auth(
            Ipv4Addr::new(192, 168, 1, 1),
            1080,
            "user".to_string(),
            "pass".to_string(),
        );
        assert_eq!(candidate.url(ProxyScheme::Socks5), "socks5://192.168.1.1:1080");
        assert_eq!(candidate.to_string(), "user:pass@192.168.1.1:1080");
    }

    #[test]
    fn test_credentials_never_reach_the_url() {
        let candidate = Candidate::with_auth(
            Ipv4Addr::new(1, 2, 3, 4),
            8080,
            "user".to_string(),
            "p#ss/w?rd".to_string(),
        );
        let url = reqwest::Url::parse(&candidate.url(ProxyScheme::Http)).unwrap();
        assert_eq!(url.host_str(), Some("1.2.3.4"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.username(), "");
    }
}
