//! # stockledger-db: Persistence Layer for the Stock Ledger
//!
//! Every ledger mutation runs here as one optimistic SQLite transaction,
//! retried as a whole when a concurrent writer got there first.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stock Ledger Data Flow                           │
//! │                                                                         │
//! │  POS caller (process_sale, initiate_transfer, ...)                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockledger-db (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ inventory     │    │  (embedded)  │  │   │
//! │  │   │               │    │ transfer      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ sale, journal │    │ 001_ledger_  │  │   │
//! │  │   │ CatalogCache  │    │ movement      │    │ schema.sql   │  │   │
//! │  │   │ JournalGen    │    │ report        │    │              │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                               │   │
//! │  │                     retry.rs: WriteConflict ─► run again      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and ledger wiring
//! - [`config`] - TOML/env configuration
//! - [`migrations`] - Embedded database migrations
//! - [`retry`] - Optimistic retry loop
//! - [`error`] - Database error types
//! - [`repository`] - One repository per ledger component
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockledger_db::{Database, LedgerConfig};
//!
//! let config = LedgerConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//!
//! db.inventory().add_stock("p-1", "main", 20, 1000, "opening stock", &actor).await?;
//! let outcome = db.sales().process_sale(new_sale, &actor).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::LedgerConfig;
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use retry::RetryPolicy;

// Repository re-exports for convenience
pub use repository::branch::BranchRepository;
pub use repository::catalog::{CatalogCache, CatalogRepository};
pub use repository::inventory::{InventoryRepository, StockChangeOutcome, StockDiscrepancy};
pub use repository::journal::JournalRepository;
pub use repository::movement::MovementRepository;
pub use repository::report::ReportRepository;
pub use repository::sale::{SaleOutcome, SaleRepository, VoidOutcome};
pub use repository::transfer::TransferRepository;
