//! Proxy Pool - self-maintaining pool of verified proxies
//!
//! Candidates are scraped from public lists, qualified through a staged
//! probe protocol (HTTP, HTTPS, SOCKS5, custom), stored in SQLite and
//! periodically re-verified, with repeatedly failing proxies evicted.

pub mod config;
pub mod database;
pub mod error;
pub mod ingest;
pub mod maintenance;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use database::ProxyDatabase;
pub use error::{Error, Result};
pub use maintenance::{CheckReport, FetchReport, MaintenanceSettings, Maintainer};
pub use models::*;
pub use proxy::*;
