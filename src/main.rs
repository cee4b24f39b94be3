use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use proxy_pool::{
    config::Config,
    database::ProxyDatabase,
    maintenance::Maintainer,
    models::{CapabilityMask, ProxyRecord},
    proxy::{Geolocator, HttpGeolocator, NoGeolocation, ProxyChecker, SourceRegistry},
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A self-maintaining pool of verified proxies
#[derive(Parser)]
#[command(name = "proxy-pool")]
#[command(about = "Discovers, qualifies and continuously re-verifies proxies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "proxy_pool=info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fetch and check cycles until interrupted
    Run,
    /// Run one fetch cycle
    Fetch,
    /// Run one check cycle
    Check,
    /// List pooled proxies
    List {
        /// Only proxies with all of these capabilities (e.g. 0x11 or http,https)
        #[arg(short = 't', long)]
        capability: Option<CapabilityMask>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one pooled proxy
    Get {
        /// Only proxies with all of these capabilities
        #[arg(short = 't', long)]
        capability: Option<CapabilityMask>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Take one proxy out of the pool
    Pop {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a proxy by address
    Delete {
        /// Pooled address, e.g. 1.2.3.4:8080
        address: String,
    },
    /// Count pooled proxies
    Count,
    /// List the known candidate sources
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let timezone = config.timezone()?;
    let registry = SourceRegistry::with_builtin(&config.crawler_config(), &config.extra_proxy_sources())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Sources => {
            for name in registry.names() {
                let marker = if config.sources.iter().any(|s| s == name) { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }
        Commands::Run => {
            let db = open_database(&config).await?;
            let maintainer = Arc::new(build_maintainer(&config, &registry, db)?);
            tokio::select! {
                _ = maintainer.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, shutting down");
                }
            }
        }
        Commands::Fetch => {
            let db = open_database(&config).await?;
            let report = build_maintainer(&config, &registry, db)?.run_fetch_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Check => {
            let db = open_database(&config).await?;
            let maintainer = Arc::new(build_maintainer(&config, &registry, db)?);
            let report = maintainer.run_check_cycle().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(refill) = maintainer.wait_refill().await {
                println!("{}", serde_json::to_string_pretty(&refill)?);
            }
        }
        Commands::List { capability, json } => {
            let db = open_database(&config).await?;
            let records = match capability {
                Some(mask) => db.get_all_with_capability(mask).await?,
                None => db.get_all().await?,
            };
            if records.is_empty() && !json {
                println!("No proxies found.");
            } else {
                print_records(&records, json, timezone)?;
            }
        }
        Commands::Get { capability, json } => {
            let db = open_database(&config).await?;
            let record = match capability {
                Some(mask) => db.get_one_with_capability(mask).await?,
                None => db.get_one().await?,
            };
            print_optional(record, json, timezone)?;
        }
        Commands::Pop { json } => {
            let db = open_database(&config).await?;
            let record = db.pop_one().await?;
            print_optional(record, json, timezone)?;
        }
        Commands::Delete { address } => {
            let db = open_database(&config).await?;
            if db.delete(&address).await? {
                println!("Proxy deleted: {}", address);
            } else {
                eprintln!("Proxy not found: {}", address);
            }
        }
        Commands::Count => {
            let db = open_database(&config).await?;
            println!("{}", db.count().await?);
        }
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<ProxyDatabase> {
    ProxyDatabase::new(&config.database, &config.table_name)
        .await
        .with_context(|| format!("opening {}", config.database))
}

fn build_maintainer(config: &Config, registry: &SourceRegistry, db: ProxyDatabase) -> Result<Maintainer> {
    let sources = registry.resolve(&config.sources)?;
    let checker = ProxyChecker::with_config(config.checker_config());
    let geolocator: Arc<dyn Geolocator> = if config.proxy_region {
        Arc::new(HttpGeolocator::with_config(
            &config.geo_url,
            Duration::from_secs(config.geo_timeout_secs),
        )?)
    } else {
        Arc::new(NoGeolocation)
    };

    Ok(Maintainer::new(
        config.maintenance_settings()?,
        db,
        Arc::new(checker),
        geolocator,
        sources,
    ))
}

#[derive(Serialize)]
struct RecordView<'a> {
    #[serde(flatten)]
    record: &'a ProxyRecord,
    capability_names: Vec<String>,
}

fn print_records(records: &[ProxyRecord], json: bool, timezone: Tz) -> Result<()> {
    if json {
        let views: Vec<RecordView> = records
            .iter()
            .map(|record| RecordView {
                record,
                capability_names: record.capabilities.capabilities().map(|c| c.to_string()).collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for record in records {
        let status = if record.last_status { "✓" } else { "✗" };
        let names: Vec<String> = record.capabilities.capabilities().map(|c| c.to_string()).collect();
        println!(
            "{} {} [{}] checks={} fails={} last={}",
            status,
            record.address,
            names.join(","),
            record.check_count,
            record.fail_count,
            record
                .last_checked_at
                .with_timezone(&timezone)
                .format("%Y-%m-%d %H:%M:%S"),
        );
        if !record.location.is_empty() {
            println!("   {}", record.location);
        }
    }
    Ok(())
}

fn print_optional(record: Option<ProxyRecord>, json: bool, timezone: Tz) -> Result<()> {
    match record {
        Some(record) => print_records(std::slice::from_ref(&record), json, timezone),
        None if json => {
            println!("null");
            Ok(())
        }
        None => {
            println!("No proxy found.");
            Ok(())
        }
    }
}
