//! # stockledger-core: Pure Ledger Logic
//!
//! Business rules of the multi-branch inventory and accounting ledger,
//! expressed as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Stock Ledger Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  POS callers (UI / API layer)                   │   │
//! │  │     process_sale, initiate_transfer, complete_transfer, ...     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              stockledger-db (transactions, SQLite)              │   │
//! │  │   read working set ─► plan with core ─► flush with versions     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ pure calls                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            ★ stockledger-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐  ┌─────────┐  ┌──────────┐  ┌─────────────────┐  │   │
//! │  │   │  fifo   │  │ journal │  │ accounts │  │     report      │  │   │
//! │  │   │ layers  │  │ 5-line  │  │  chart   │  │ P&L, valuation  │  │   │
//! │  │   └─────────┘  └─────────┘  └──────────┘  └─────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (cost layers, movements, transfers, sales)
//! - [`money`] - Money type with integer arithmetic
//! - [`fifo`] - Oldest-first consumption planning over cost layers
//! - [`accounts`] - Chart of accounts
//! - [`journal`] - Double-entry generation and balance validation
//! - [`report`] - Profit & loss classification, inventory valuation
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use stockledger_core::money::Money;
//! use stockledger_core::types::TaxRate;
//!
//! // A tax-inclusive shelf price of $230.00 at 15%
//! let (base, tax) = Money::from_cents(23000).split_tax_inclusive(TaxRate::from_bps(1500));
//! assert_eq!(base.cents(), 20000);
//! assert_eq!(tax.cents(), 3000);
//! ```

pub mod accounts;
pub mod error;
pub mod fifo;
pub mod journal;
pub mod money;
pub mod report;
pub mod types;
pub mod validation;

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest difference between total debits and total credits, in cents,
/// that still counts as balanced. Amounts are integer cents, so anything
/// under one cent means exactly equal.
pub const BALANCE_TOLERANCE_CENTS: i64 = 1;

/// Maximum line items accepted in a single sale or transfer.
pub const MAX_LINE_ITEMS: usize = 100;

/// Maximum page size for ledger and journal reads.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Page size used when the caller passes zero.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum length of free-text reasons and notes.
pub const MAX_REASON_LENGTH: usize = 500;

/// Largest quantity accepted in one request. Also the most stock a product
/// may hold at one branch.
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Largest unit cost or unit price, in cents.
pub const MAX_UNIT_COST_CENTS: i64 = 1_000_000_000;

/// Largest single amount (sale total, cost of goods of one sale), in cents.
/// Keeps every journal line sum well inside `i64`.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000_000;
