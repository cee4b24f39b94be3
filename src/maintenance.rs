//! Pool maintenance
//!
//! Two periodic jobs share the same primitives:
//! - the fetch cycle pulls candidates from every source, qualifies them and
//!   inserts the new ones;
//! - the check cycle re-qualifies every stored proxy, ages failures and evicts
//!   proxies whose fail count exceeds the limit. When the pool is below its
//!   minimum size it also starts a background refill; the check never waits
//!   for it, and at most one refill runs at a time.

use crate::database::ProxyDatabase;
use crate::ingest::{self, CandidateSource};
use crate::models::ProxyRecord;
use crate::proxy::checker::Qualifier;
use crate::proxy::geo::Geolocator;
use chrono::Utc;
use chrono_tz::Tz;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Scheduling and eviction policy
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub pool_size_min: usize,
    pub max_fail_count: u32,
    pub fetch_interval: Duration,
    pub check_interval: Duration,
    pub timezone: Tz,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            pool_size_min: 20,
            max_fail_count: 0,
            fetch_interval: Duration::from_secs(240),
            check_interval: Duration::from_secs(120),
            timezone: chrono_tz::Asia::Shanghai,
        }
    }
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub received: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub store_failures: usize,
}

/// Outcome of one check cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub checked: usize,
    pub passed: usize,
    pub kept: usize,
    pub evicted: usize,
    pub store_failures: usize,
    /// The pool was below its minimum and a refill was started
    pub triggered_fetch: bool,
}

/// Drives fetch and check cycles against one pool store
pub struct Maintainer {
    settings: MaintenanceSettings,
    db: ProxyDatabase,
    qualifier: Arc<dyn Qualifier>,
    geolocator: Arc<dyn Geolocator>,
    sources: Vec<Arc<dyn CandidateSource>>,
    refill: Mutex<Option<JoinHandle<FetchReport>>>,
}

impl Maintainer {
    pub fn new(
        settings: MaintenanceSettings,
        db: ProxyDatabase,
        qualifier: Arc<dyn Qualifier>,
        geolocator: Arc<dyn Geolocator>,
        sources: Vec<Arc<dyn CandidateSource>>,
    ) -> Self {
        Self {
            settings,
            db,
            qualifier,
            geolocator,
            sources,
            refill: Mutex::new(None),
        }
    }

    /// Run forever: one fetch cycle immediately, then both schedules
    pub async fn run(self: Arc<Self>) {
        info!(
            sources = self.sources.len(),
            fetch_every = ?self.settings.fetch_interval,
            check_every = ?self.settings.check_interval,
            timezone = %self.settings.timezone,
            "pool maintenance started"
        );

        let fetcher = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.fetch_loop().await })
        };
        let checker = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.check_loop().await })
        };

        let (fetch_result, check_result) = tokio::join!(fetcher, checker);
        for result in [fetch_result, check_result] {
            if let Err(e) = result {
                warn!(error = %e, "maintenance job stopped");
            }
        }
    }

    async fn fetch_loop(&self) {
        self.run_fetch_cycle().await;

        let period = self.settings.fetch_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.log_tick("fetch");
            self.run_fetch_cycle().await;
        }
    }

    async fn check_loop(self: Arc<Self>) {
        let period = self.settings.check_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.log_tick("check");
            self.run_check_cycle().await;
        }
    }

    fn log_tick(&self, job: &str) {
        let local = Utc::now().with_timezone(&self.settings.timezone);
        debug!(job, at = %local.format("%Y-%m-%d %H:%M:%S %Z"), "scheduled job due");
    }

    /// Ingest, qualify and insert candidates from every source
    pub async fn run_fetch_cycle(&self) -> FetchReport {
        let mut report = FetchReport::default();
        let mut candidates = ingest::merge(&self.sources);

        while let Some(candidate) = candidates.next().await {
            report.received += 1;

            let mask = self.qualifier.qualify(&candidate).await;
            if mask.is_empty() {
                debug!(address = %candidate, "candidate rejected");
                report.rejected += 1;
                continue;
            }

            match self.db.exists(&candidate).await {
                Ok(true) => {
                    debug!(address = %candidate, mask = %mask, "candidate already pooled");
                    report.duplicates += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(address = %candidate, error = %e, "existence check failed");
                    report.store_failures += 1;
                    continue;
                }
            }

            let location = self.locate(&candidate).await;
            let record = ProxyRecord::new(candidate, location, mask);
            match self.db.insert(&record).await {
                Ok(true) => {
                    info!(address = %record.address, mask = %mask, location = %record.location, "proxy added");
                    report.inserted += 1;
                }
                Ok(false) => {
                    debug!(address = %record.address, "proxy added concurrently");
                    report.duplicates += 1;
                }
                Err(e) => {
                    warn!(address = %record.address, error = %e, "proxy insert failed");
                    report.store_failures += 1;
                }
            }
        }

        info!(
            received = report.received,
            rejected = report.rejected,
            duplicates = report.duplicates,
            inserted = report.inserted,
            store_failures = report.store_failures,
            "fetch cycle finished"
        );
        report
    }

    /// Re-verify every pooled proxy and apply the eviction policy
    pub async fn run_check_cycle(self: &Arc<Self>) -> CheckReport {
        let records = match self.db.get_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "could not read pool, skipping check cycle");
                return CheckReport::default();
            }
        };

        let triggered_fetch = records.len() < self.settings.pool_size_min;
        if triggered_fetch {
            info!(
                pool_size = records.len(),
                minimum = self.settings.pool_size_min,
                "pool below minimum, refilling alongside check"
            );
            self.start_refill().await;
        }

        let mut report = self.recheck(records).await;
        report.triggered_fetch = triggered_fetch;

        info!(
            checked = report.checked,
            passed = report.passed,
            kept = report.kept,
            evicted = report.evicted,
            store_failures = report.store_failures,
            triggered_fetch = report.triggered_fetch,
            "check cycle finished"
        );
        report
    }

    async fn recheck(&self, records: Vec<ProxyRecord>) -> CheckReport {
        let mut report = CheckReport::default();

        for mut record in records {
            report.checked += 1;
            let mask = self.qualifier.qualify(&record.address).await;

            if !mask.is_empty() {
                record.mark_passed(Utc::now());
                report.passed += 1;
                debug!(address = %record.address, mask = %mask, fail_count = record.fail_count, "proxy passed");
                self.persist(&record, &mut report).await;
                continue;
            }

            record.mark_failed(Utc::now());
            if record.exceeds(self.settings.max_fail_count) {
                match self.db.delete(&record.address).await {
                    Ok(true) => {
                        info!(address = %record.address, fail_count = record.fail_count, "proxy evicted");
                        report.evicted += 1;
                    }
                    Ok(false) => {
                        debug!(address = %record.address, "proxy already removed");
                    }
                    Err(e) => {
                        warn!(address = %record.address, error = %e, "proxy delete failed");
                        report.store_failures += 1;
                    }
                }
            } else {
                info!(address = %record.address, fail_count = record.fail_count, "proxy failed, kept");
                report.kept += 1;
                self.persist(&record, &mut report).await;
            }
        }

        report
    }

    /// Spawn a fetch cycle unless one started by an earlier check is still running
    async fn start_refill(self: &Arc<Self>) {
        let mut refill = self.refill.lock().await;
        if refill.as_ref().map_or(false, |handle| !handle.is_finished()) {
            debug!("refill already running");
            return;
        }
        let this = Arc::clone(self);
        *refill = Some(tokio::spawn(async move { this.run_fetch_cycle().await }));
    }

    /// Wait for the most recent refill, if any, and return its report
    pub async fn wait_refill(&self) -> Option<FetchReport> {
        let handle = self.refill.lock().await.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "refill task stopped");
                None
            }
        }
    }

    async fn persist(&self, record: &ProxyRecord, report: &mut CheckReport) {
        if let Err(e) = self.db.upsert(record).await {
            warn!(address = %record.address, error = %e, "proxy update failed");
            report.store_failures += 1;
        }
    }

    /// Location for a new proxy; lookup failures degrade to empty
    async fn locate(&self, address: &str) -> String {
        match self.geolocator.resolve(address).await {
            Ok(location) => location,
            Err(e) => {
                debug!(address, error = %e, "geolocation unavailable");
                String::new()
            }
        }
    }
}
