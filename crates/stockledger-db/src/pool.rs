//! # Database Pool Management
//!
//! Connection pool creation and ledger wiring for SQLite.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Ledger Startup                                     │
//! │                                                                         │
//! │  LedgerConfig::load(..).db_config()  or  DbConfig::new(path)            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await                                            │
//! │       │                                                                 │
//! │       ├── SqlitePool (WAL, NORMAL sync, foreign keys)                   │
//! │       ├── migrations (embedded)                                         │
//! │       ├── chart of accounts seeded (INSERT OR IGNORE)                   │
//! │       ├── JournalGenerator over the stored chart + statutory rate       │
//! │       └── CatalogCache (moka, TTL)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.inventory() / db.transfers() / db.sales() / db.reports() ...        │
//! │  (cheap handles sharing the pool, cache and generator)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode: readers never block the single writer,
//! and a deferred transaction that loses the race to upgrade its read lock
//! gets `SQLITE_BUSY_SNAPSHOT`, which the error layer reports as a write
//! conflict.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use stockledger_core::accounts::default_chart;
use stockledger_core::journal::JournalGenerator;
use stockledger_core::types::TaxRate;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::branch::BranchRepository;
use crate::repository::catalog::{CatalogCache, CatalogRepository};
use crate::repository::inventory::InventoryRepository;
use crate::repository::journal::{self, JournalRepository};
use crate::repository::movement::MovementRepository;
use crate::repository::report::ReportRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::transfer::TransferRepository;
use crate::retry::RetryPolicy;

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database and ledger wiring configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/ledger.db")
///     .max_connections(5)
///     .statutory_tax_rate(TaxRate::from_bps(1500));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps connections
    /// forever (required for in-memory databases).
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,

    /// Rate the journal generator splits revenue and tax with.
    /// Default: 1500 bps
    pub statutory_tax_rate: TaxRate,

    /// Optimistic retry policy for every mutating operation.
    pub retry: RetryPolicy,

    /// Catalog cache time-to-live.
    pub catalog_ttl: Duration,

    /// Catalog cache capacity (entries).
    pub catalog_capacity: u64,

    /// Upper bound for any paginated read.
    pub max_page_size: u32,
}

impl DbConfig {
    /// Creates a configuration for the database file at `path`. The file is
    /// created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
            statutory_tax_rate: TaxRate::from_bps(1500),
            retry: RetryPolicy::default(),
            catalog_ttl: Duration::from_secs(300),
            catalog_capacity: 10_000,
            max_page_size: stockledger_core::MAX_PAGE_SIZE,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn statutory_tax_rate(mut self, rate: TaxRate) -> Self {
        self.statutory_tax_rate = rate;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn catalog_cache(mut self, ttl: Duration, capacity: u64) -> Self {
        self.catalog_ttl = ttl;
        self.catalog_capacity = capacity;
        self
    }

    pub fn max_page_size(mut self, max: u32) -> Self {
        self.max_page_size = max.max(1);
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection that never expires: the database lives exactly as
    /// long as that connection.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            ..DbConfig::new(MEMORY_PATH)
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(MEMORY_PATH)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main ledger handle providing repository access.
///
/// Cloning is cheap; every clone shares the pool, the catalog cache and the
/// journal generator.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::in_memory()).await?;
/// db.inventory().add_stock("p-1", "main", 20, 1000, "opening stock", &actor).await?;
/// let outcome = db.sales().process_sale(sale, &actor).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    catalog: CatalogCache,
    journal: Arc<JournalGenerator>,
    retry: RetryPolicy,
    max_page_size: u32,
}

impl Database {
    /// Opens the pool, applies migrations, seeds the chart of accounts and
    /// builds the journal generator.
    ///
    /// ## Returns
    /// * `Ok(Database)` - Ready-to-use ledger handle
    /// * `Err(DbError)` - Connection, migration or chart setup failed
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing ledger database"
        );

        let connect_options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true)
        } else {
            let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
            SqliteConnectOptions::from_str(&connect_url)
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true)
        };

        debug!("Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);
        if config.is_in_memory() {
            pool_options = pool_options.max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        if config.run_migrations {
            info!("Running database migrations");
            migrations::run_migrations(&pool).await?;
        }

        journal::seed_chart(&pool, &default_chart()).await?;
        let chart = journal::load_chart(&pool).await?;
        let generator = JournalGenerator::new(config.statutory_tax_rate, chart)?;

        info!(
            statutory_tax_bps = config.statutory_tax_rate.bps(),
            accounts = generator.chart().len(),
            "Journal generator ready"
        );

        let catalog = CatalogCache::new(pool.clone(), config.catalog_ttl, config.catalog_capacity);

        Ok(Database {
            pool,
            catalog,
            journal: Arc::new(generator),
            retry: config.retry,
            max_page_size: config.max_page_size,
        })
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Returns a reference to the connection pool.
    ///
    /// Reads only: every ledger write must go through a repository.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The statutory rate the journal is generated with.
    pub fn statutory_tax_rate(&self) -> TaxRate {
        self.journal.tax_rate()
    }

    pub fn branches(&self) -> BranchRepository {
        BranchRepository::new(self.pool.clone(), self.catalog.clone())
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone(), self.catalog.clone())
    }

    /// The read-through product/branch cache.
    pub fn catalog_cache(&self) -> &CatalogCache {
        &self.catalog
    }

    /// Cost-layer store.
    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository::new(self.pool.clone(), self.catalog.clone(), self.retry.clone())
    }

    /// Movement ledger (read side).
    pub fn movements(&self) -> MovementRepository {
        MovementRepository::new(self.pool.clone(), self.max_page_size)
    }

    /// Stock transfer coordinator.
    pub fn transfers(&self) -> TransferRepository {
        TransferRepository::new(
            self.pool.clone(),
            self.catalog.clone(),
            self.retry.clone(),
            self.max_page_size,
        )
    }

    /// Atomic sale processor.
    pub fn sales(&self) -> SaleRepository {
        SaleRepository::new(
            self.pool.clone(),
            self.catalog.clone(),
            Arc::clone(&self.journal),
            self.retry.clone(),
        )
    }

    pub fn journal(&self) -> JournalRepository {
        JournalRepository::new(
            self.pool.clone(),
            Arc::clone(&self.journal),
            self.retry.clone(),
            self.max_page_size,
        )
    }

    pub fn reports(&self) -> ReportRepository {
        ReportRepository::new(self.pool.clone())
    }

    /// Closes the connection pool. Repository calls fail afterwards.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Whether the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::accounts::{CASH, SALES_REVENUE};

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
        assert_eq!(db.statutory_tax_rate(), TaxRate::from_bps(1500));
    }

    #[tokio::test]
    async fn test_chart_seeded_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        journal::seed_chart(db.pool(), &default_chart()).await.unwrap();

        let accounts = db.journal().accounts().await.unwrap();
        assert_eq!(accounts.len(), default_chart().len());
        assert!(accounts.iter().any(|a| a.code == CASH));
        assert!(accounts.iter().any(|a| a.code == SALES_REVENUE));
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .statutory_tax_rate(TaxRate::from_bps(1000))
            .max_page_size(0);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.statutory_tax_rate.bps(), 1000);
        assert_eq!(config.max_page_size, 1);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }
}
