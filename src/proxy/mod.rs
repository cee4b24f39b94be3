//! Proxy module for qualifying candidate proxies
//!
//! This module provides functionality for:
//! - Parsing and format-checking candidate strings
//! - Staged capability probing (HTTP, HTTPS, SOCKS5, custom)
//! - Resolving the location of a proxy IP
//! - Scraping public proxy lists as candidate sources

pub mod checker;
pub mod crawler;
pub mod geo;
pub mod models;
pub mod parser;

pub use checker::{CheckerConfig, ExtensionProbe, HttpProber, Prober, ProxyChecker, Qualifier};
pub use crawler::{CrawlerConfig, ProxySource, SourceRegistry, UrlListSource};
pub use geo::{Geolocator, HttpGeolocator, NoGeolocation};
pub use models::{Candidate, ProxyAuth, ProxyScheme};
pub use parser::ProxyParser;
