//! # Repository Module
//!
//! One repository per ledger component.
//!
//! ## Transaction Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 One attempt of a mutating operation                     │
//! │                                                                         │
//! │  1. Pre-transaction reads (pool)                                        │
//! │     ├── catalog names (CatalogCache)                                    │
//! │     └── FIFO candidate scan: remaining > 0 ORDER BY created_at, seq     │
//! │                                                                         │
//! │  2. BEGIN                                                               │
//! │     ├── re-read every candidate layer by id, compare version            │
//! │     ├── load aggregates, check Σ candidates == aggregate.stock          │
//! │     ├── plan + apply in memory (StockWorkingSet)                        │
//! │     ├── flush: UPDATE ... WHERE id = ? AND version = ?                  │
//! │     └── append movements / sale / journal                               │
//! │                                                                         │
//! │  3. COMMIT  ──► success                                                 │
//! │     any stale read ──► WriteConflict ──► retry loop runs step 1 again   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing inside the transaction touches the pool: with the single
//! connection of an in-memory database that would wait on itself.
//!
//! ## Available Repositories
//!
//! - [`BranchRepository`](branch::BranchRepository) - Branch reference data
//! - [`CatalogRepository`](catalog::CatalogRepository) - Products, plus the read-through cache
//! - [`InventoryRepository`](inventory::InventoryRepository) - Cost-layer store
//! - [`MovementRepository`](movement::MovementRepository) - Movement ledger reads
//! - [`TransferRepository`](transfer::TransferRepository) - Two-phase transfers
//! - [`SaleRepository`](sale::SaleRepository) - Atomic sale processor
//! - [`JournalRepository`](journal::JournalRepository) - Journal entries and chart
//! - [`ReportRepository`](report::ReportRepository) - P&L, valuation, summaries

pub mod branch;
pub mod catalog;
pub mod inventory;
pub mod journal;
pub mod movement;
pub mod report;
pub mod sale;
pub mod transfer;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use stockledger_core::types::Page;

use crate::error::DbResult;

/// Builds a page from `limit + 1` rows fetched in `seq DESC` order.
///
/// The extra row only signals that another page exists; the cursor is the
/// `seq` of the last row kept.
pub(crate) fn page_from_rows<T>(rows: Vec<SqliteRow>, limit: u32) -> DbResult<Page<T>>
where
    T: for<'r> FromRow<'r, SqliteRow>,
{
    let limit = limit as usize;
    let has_more = rows.len() > limit;

    let mut items = Vec::with_capacity(rows.len().min(limit));
    let mut last_seq = None;
    for row in rows.iter().take(limit) {
        last_seq = Some(row.try_get::<i64, _>("seq")?);
        items.push(T::from_row(row)?);
    }

    Ok(Page {
        items,
        next_cursor: if has_more {
            last_seq.map(|seq| seq.to_string())
        } else {
            None
        },
    })
}
