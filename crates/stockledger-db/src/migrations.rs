//! # Database Migrations
//!
//! Embedded SQL migrations for the ledger schema.
//!
//! ```text
//! Database::new
//!      │
//!      ▼
//! _sqlx_migrations ── compare with embedded set ──► run pending, in order
//!      │
//!      ├── 001_ledger_schema.sql  ✓
//!      └── 00N_....sql            (new)
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create `migrations/sqlite/NNN_description.sql` with the next number
//! 2. Use `IF NOT EXISTS` where possible
//! 3. Never edit an applied migration; ledger tables are append-only and
//!    their triggers must stay in place

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Migrations from `migrations/sqlite`, embedded at compile time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies all pending migrations. Idempotent; each migration runs in its
/// own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// `(total_embedded, applied)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
