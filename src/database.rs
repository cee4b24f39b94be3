//! Pool store backed by SQLite
//!
//! Reads are ordered by `(capabilities, check_count, last_checked_at DESC)`.
//! Every write goes through one writer lock so concurrent fetch and check
//! cycles never interleave their writes.

use crate::error::{Error, Result};
use crate::models::{CapabilityMask, ProxyRecord};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default table name
pub const DEFAULT_TABLE: &str = "use_proxy";

const COLUMNS: &str =
    "address, location, capabilities, check_count, fail_count, last_checked_at, last_status";

const ORDER: &str = "ORDER BY capabilities, check_count, last_checked_at DESC";

#[derive(sqlx::FromRow)]
struct ProxyRow {
    address: String,
    location: String,
    capabilities: i64,
    check_count: i64,
    fail_count: i64,
    last_checked_at: DateTime<Utc>,
    last_status: bool,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        Self {
            address: row.address,
            location: row.location,
            capabilities: CapabilityMask::from_bits(row.capabilities.clamp(0, u32::MAX as i64) as u32),
            check_count: row.check_count.clamp(0, u32::MAX as i64) as u32,
            fail_count: row.fail_count.clamp(0, u32::MAX as i64) as u32,
            last_checked_at: row.last_checked_at,
            last_status: row.last_status,
        }
    }
}

/// Pool store
#[derive(Clone)]
pub struct ProxyDatabase {
    pool: SqlitePool,
    table: String,
    write_lock: Arc<Mutex<()>>,
}

impl ProxyDatabase {
    /// Open (creating if missing) the database file and ensure the table exists
    pub async fn new(path: &str, table: &str) -> Result<Self> {
        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)?
        } else {
            SqliteConnectOptions::new().filename(path)
        }
        .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, table).await
    }

    /// In-memory store; the single connection is kept alive for the pool's lifetime
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, DEFAULT_TABLE).await
    }

    async fn with_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        validate_table_name(table)?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                address TEXT PRIMARY KEY,
                location TEXT NOT NULL DEFAULT '',
                capabilities INTEGER NOT NULL,
                check_count INTEGER NOT NULL,
                fail_count INTEGER NOT NULL,
                last_checked_at TEXT NOT NULL,
                last_status INTEGER NOT NULL
            )",
            table
        );
        sqlx::query(&ddl).execute(&pool).await?;

        Ok(Self {
            pool,
            table: table.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn exists(&self, address: &str) -> Result<bool> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE address = ?", self.table);
        let count: i64 = sqlx::query_scalar(&query)
            .bind(address)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Insert or replace by address
    pub async fn upsert(&self, record: &ProxyRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let query = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table, COLUMNS
        );
        self.bind_record(&query, record).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert only if no record with this address exists; true if written
    pub async fn insert(&self, record: &ProxyRecord) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let query = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table, COLUMNS
        );
        let result = self.bind_record(&query, record).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a record; true if one was removed
    pub async fn delete(&self, address: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let query = format!("DELETE FROM {} WHERE address = ?", self.table);
        let result = sqlx::query(&query)
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_all(&self) -> Result<Vec<ProxyRecord>> {
        self.get_all_with_capability(CapabilityMask::NONE).await
    }

    /// Records holding every bit of `mask`
    pub async fn get_all_with_capability(&self, mask: CapabilityMask) -> Result<Vec<ProxyRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE (capabilities & ?) = ? {}",
            COLUMNS, self.table, ORDER
        );
        let rows = sqlx::query_as::<_, ProxyRow>(&query)
            .bind(mask.bits() as i64)
            .bind(mask.bits() as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ProxyRecord::from).collect())
    }

    pub async fn get_one(&self) -> Result<Option<ProxyRecord>> {
        self.get_one_with_capability(CapabilityMask::NONE).await
    }

    pub async fn get_one_with_capability(&self, mask: CapabilityMask) -> Result<Option<ProxyRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE (capabilities & ?) = ? {} LIMIT 1",
            COLUMNS, self.table, ORDER
        );
        let row = sqlx::query_as::<_, ProxyRow>(&query)
            .bind(mask.bits() as i64)
            .bind(mask.bits() as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ProxyRecord::from))
    }

    /// Read and delete the first record in one transaction
    pub async fn pop_one(&self) -> Result<Option<ProxyRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {} FROM {} {} LIMIT 1", COLUMNS, self.table, ORDER);
        let row = sqlx::query_as::<_, ProxyRow>(&select)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = &row {
            let delete = format!("DELETE FROM {} WHERE address = ?", self.table);
            sqlx::query(&delete)
                .bind(&row.address)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(row.map(ProxyRecord::from))
    }

    pub async fn count(&self) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    fn bind_record<'q>(
        &self,
        query: &'q str,
        record: &'q ProxyRecord,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        sqlx::query(query)
            .bind(&record.address)
            .bind(&record.location)
            .bind(record.capabilities.bits() as i64)
            .bind(record.check_count as i64)
            .bind(record.fail_count as i64)
            .bind(record.last_checked_at)
            .bind(record.last_status)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid table name: {:?}", table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(address: &str, mask: CapabilityMask, check_count: u32) -> ProxyRecord {
        let mut record = ProxyRecord::new(address.to_string(), String::new(), mask);
        record.check_count = check_count;
        record
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        let mut item = record("1.2.3.4:8080", CapabilityMask::HTTP, 1);
        db.upsert(&item).await.unwrap();

        item.check_count = 2;
        item.location = "Shanghai".to_string();
        db.upsert(&item).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].check_count, 2);
        assert_eq!(all[0].location, "Shanghai");
        assert_eq!(db.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        let mut item = record("user:pass@1.2.3.4:8080", CapabilityMask::HTTP | CapabilityMask::SOCKS5, 3);
        item.fail_count = 2;
        item.last_status = false;
        db.upsert(&item).await.unwrap();

        let stored = db.get_one().await.unwrap().unwrap();
        assert_eq!(stored.address, item.address);
        assert_eq!(stored.capabilities, item.capabilities);
        assert_eq!(stored.fail_count, 2);
        assert!(!stored.last_status);
        assert_eq!(stored.last_checked_at.timestamp(), item.last_checked_at.timestamp());
    }

    #[tokio::test]
    async fn test_insert_keeps_existing() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        assert!(db.insert(&record("1.2.3.4:8080", CapabilityMask::HTTP, 1)).await.unwrap());
        assert!(!db
            .insert(&record("1.2.3.4:8080", CapabilityMask::HTTP | CapabilityMask::HTTPS, 1))
            .await
            .unwrap());

        let stored = db.get_one().await.unwrap().unwrap();
        assert_eq!(stored.capabilities, CapabilityMask::HTTP);
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        db.upsert(&record("1.2.3.4:8080", CapabilityMask::HTTP, 1)).await.unwrap();

        assert!(db.exists("1.2.3.4:8080").await.unwrap());
        assert!(!db.exists("1.2.3.4:8081").await.unwrap());

        assert!(db.delete("1.2.3.4:8080").await.unwrap());
        assert!(!db.delete("1.2.3.4:8080").await.unwrap());
        assert!(!db.exists("1.2.3.4:8080").await.unwrap());
    }

    #[tokio::test]
    async fn test_ordering() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        let now = Utc::now();

        let mut older = record("1.1.1.1:80", CapabilityMask::HTTP, 2);
        older.last_checked_at = now - Duration::minutes(10);
        let mut newer = record("1.1.1.2:80", CapabilityMask::HTTP, 2);
        newer.last_checked_at = now;
        let fresh = record("1.1.1.3:80", CapabilityMask::HTTP, 1);
        let https = record("1.1.1.4:80", CapabilityMask::HTTP | CapabilityMask::HTTPS, 1);

        for item in [&https, &older, &newer, &fresh] {
            db.upsert(item).await.unwrap();
        }

        let order: Vec<String> = db
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(order, vec!["1.1.1.3:80", "1.1.1.2:80", "1.1.1.1:80", "1.1.1.4:80"]);

        assert_eq!(db.get_one().await.unwrap().unwrap().address, "1.1.1.3:80");
    }

    #[tokio::test]
    async fn test_capability_filter() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        db.upsert(&record("1.1.1.1:80", CapabilityMask::HTTP, 1)).await.unwrap();
        db.upsert(&record("1.1.1.2:80", CapabilityMask::HTTP | CapabilityMask::HTTPS, 1))
            .await
            .unwrap();
        db.upsert(&record(
            "1.1.1.3:80",
            CapabilityMask::HTTP | CapabilityMask::HTTPS | CapabilityMask::SOCKS5,
            1,
        ))
        .await
        .unwrap();

        let https = db.get_all_with_capability(CapabilityMask::HTTPS).await.unwrap();
        assert_eq!(https.len(), 2);
        assert!(https.iter().all(|r| r.capabilities.contains(CapabilityMask::HTTPS)));

        let socks = db
            .get_one_with_capability(CapabilityMask::HTTPS | CapabilityMask::SOCKS5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(socks.address, "1.1.1.3:80");

        assert!(db
            .get_one_with_capability(CapabilityMask::CUSTOM)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pop_one() {
        let db = ProxyDatabase::in_memory().await.unwrap();
        assert!(db.pop_one().await.unwrap().is_none());

        db.upsert(&record("1.1.1.1:80", CapabilityMask::HTTP, 1)).await.unwrap();
        db.upsert(&record("1.1.1.2:80", CapabilityMask::HTTP, 5)).await.unwrap();

        let popped = db.pop_one().await.unwrap().unwrap();
        assert_eq!(popped.address, "1.1.1.1:80");
        assert_eq!(db.count().await.unwrap(), 1);
        assert!(!db.exists("1.1.1.1:80").await.unwrap());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("use_proxy").is_ok());
        assert!(validate_table_name("_pool2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2pool").is_err());
        assert!(validate_table_name("pool; DROP TABLE x").is_err());
    }
}
