//! # Domain Types
//!
//! Records owned or referenced by the ledger.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Ledger Records                                  │
//! │                                                                         │
//! │  Reference (read-only here)      Stock                                  │
//! │  ┌──────────────┐                ┌──────────────────┐                   │
//! │  │ Branch       │                │ AggregateStock   │ stock ==          │
//! │  │ Product      │                │ (product,branch) │ Σ remaining of    │
//! │  │ Actor        │                └────────┬─────────┘ its CostLayers    │
//! │  └──────────────┘                         │                             │
//! │                                  ┌────────▼─────────┐                   │
//! │                                  │ CostLayer (FIFO) │                   │
//! │                                  └──────────────────┘                   │
//! │                                                                         │
//! │  Audit                 Handoff                  Business                │
//! │  ┌──────────────────┐  ┌──────────────────┐    ┌──────────────────┐     │
//! │  │ MovementRecord   │  │ StockTransfer    │    │ SaleRecord       │     │
//! │  │ (append-only)    │  │ PENDING→...      │    │ INCOME / EXPENSE │     │
//! │  └──────────────────┘  └──────────────────┘    └──────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Amounts are stored as `*_cents: i64` with [`Money`] accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::fifo::LayerSlice;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points. 1500 bps = 15%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// The rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Reference Data
// =============================================================================

/// The person performing an operation, supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Actor {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A store location holding its own stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Catalog entry as seen by the ledger. Names are copied into movements
/// for display; nothing here affects stock correctness.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Shelf price in cents, tax-inclusive.
    pub price_cents: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Stock
// =============================================================================

/// Derived stock count for one product at one branch.
///
/// `stock` always equals the sum of `remaining_stock` over the cost layers
/// with the same key. Created on first intake, zeroed but never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AggregateStock {
    /// Composite key `{product_id}_{branch_id}`.
    pub id: String,
    pub product_id: String,
    pub branch_id: String,
    pub stock: i64,
    pub low_stock_threshold: i64,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl AggregateStock {
    /// Composite document id for a product/branch pair.
    pub fn key(product_id: &str, branch_id: &str) -> String {
        format!("{}_{}", product_id, branch_id)
    }

    /// Whether stock has fallen to the alert threshold. A zero threshold
    /// disables the alert.
    pub fn is_low(&self) -> bool {
        self.low_stock_threshold > 0 && self.stock <= self.low_stock_threshold
    }
}

/// A FIFO lot: one intake of stock at a fixed unit cost.
///
/// `0 <= remaining_stock <= initial_stock`. Remaining stock only decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CostLayer {
    pub id: String,
    pub product_id: String,
    pub branch_id: String,
    /// Unit cost at intake.
    pub cost_cents: i64,
    pub initial_stock: i64,
    pub remaining_stock: i64,
    pub received_by: String,
    /// Sale, transfer or adjustment that created the layer, if any.
    pub correlation_id: Option<String>,
    pub version: i64,
    /// Defines FIFO order.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CostLayer {
    #[inline]
    pub fn cost(&self) -> Money {
        Money::from_cents(self.cost_cents)
    }

    /// Book value of what is left in the layer.
    #[inline]
    pub fn remaining_value(&self) -> Money {
        self.cost().multiply_quantity(self.remaining_stock)
    }

    #[inline]
    pub fn is_depleted(&self) -> bool {
        self.remaining_stock == 0
    }
}

// =============================================================================
// Movement Ledger
// =============================================================================

/// Kind of stock change recorded in the movement ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Intake: purchase, transfer receipt, transfer return.
    In,
    /// FIFO stock-out: sale, transfer dispatch.
    Out,
    /// Branch-to-branch move recorded as a single row by external importers.
    Transfer,
    /// Manual correction in either direction.
    Adjustment,
    /// Goods coming back from a voided sale.
    Return,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjustment => "ADJUSTMENT",
            MovementType::Return => "RETURN",
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable row of the stock audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct MovementRecord {
    /// Ledger position, used as the pagination cursor.
    pub seq: i64,
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub branch_id: String,
    pub branch_name: String,
    pub movement_type: MovementType,
    /// Signed: negative for stock leaving the branch.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
    pub correlation_id: Option<String>,
    pub actor_id: String,
    pub actor_name: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Filters for a paginated movement ledger read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MovementQuery {
    pub product_id: Option<String>,
    pub branch_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub cursor: Option<String>,
}

// =============================================================================
// Stock Transfers
// =============================================================================

/// Lifecycle of a two-phase transfer.
///
/// ```text
///            initiate
///               │
///               ▼
///          ┌─────────┐  complete   ┌───────────┐
///          │ PENDING ├────────────►│ COMPLETED │
///          └────┬────┘             └───────────┘
///       cancel  │  reject
///        ┌──────┴──────┐
///        ▼             ▼
///  ┌───────────┐ ┌──────────┐
///  │ CANCELLED │ │ REJECTED │   (origin credited back)
///  └───────────┘ └──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Rejected => "REJECTED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// A requested line of a new transfer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewTransferItem {
    pub product_id: String,
    pub quantity: i64,
}

/// A transfer line with the cost captured at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    /// Weighted average of the origin layers consumed, rounded to the cent.
    pub unit_cost_cents: i64,
    /// Origin layers consumed at dispatch (audit only, never re-credited).
    pub source_layers: Vec<LayerSlice>,
}

impl TransferItem {
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }
}

/// Stock in transit between two branches.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockTransfer {
    pub id: String,
    pub origin_branch_id: String,
    pub target_branch_id: String,
    pub status: TransferStatus,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<TransferItem>,
    pub sent_by: String,
    #[ts(as = "String")]
    pub sent_at: DateTime<Utc>,
    pub received_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    /// Reason given when cancelled or rejected.
    pub resolution_note: Option<String>,
    pub version: i64,
}

/// Filters for listing transfers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferFilter {
    /// Matches either origin or target.
    pub branch_id: Option<String>,
    pub status: Option<TransferStatus>,
}

// =============================================================================
// Sales
// =============================================================================

/// Direction of a business transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Completed,
    Voided,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Completed => "COMPLETED",
            SaleStatus::Voided => "VOIDED",
        }
    }
}

/// A requested line of a new sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSaleLine {
    pub product_id: String,
    /// Branch the stock is taken from; defaults to the sale's branch.
    pub branch_id: Option<String>,
    pub quantity: i64,
    /// Tax-inclusive unit price in cents.
    pub unit_price_cents: i64,
}

/// A sale or expense as submitted by the POS.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewSale {
    /// Client-generated id. Re-submitting the same id returns the stored
    /// outcome instead of consuming stock twice.
    pub id: String,
    pub record_type: RecordType,
    /// Tax-inclusive total in cents.
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    pub description: String,
    pub category: String,
    pub payment_method: PaymentMethod,
    pub branch_id: String,
    pub lines: Vec<NewSaleLine>,
}

impl NewSale {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Branch a line draws stock from.
    pub fn line_branch<'a>(&'a self, line: &'a NewSaleLine) -> &'a str {
        line.branch_id.as_deref().unwrap_or(&self.branch_id)
    }
}

/// A persisted sale line with the cost captured from the consumed layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLine {
    pub sale_id: String,
    pub line_no: i64,
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub product_name: String,
    pub branch_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// Weighted FIFO unit cost, rounded. Used to restock on void.
    pub unit_cost_cents: i64,
    /// Exact FIFO cost of the line.
    pub line_cost_cents: i64,
}

/// A committed business transaction.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleRecord {
    pub id: String,
    pub record_type: RecordType,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    pub description: String,
    pub category: String,
    pub payment_method: PaymentMethod,
    pub branch_id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub status: SaleStatus,
    /// Cost of goods sold; zero for expenses.
    pub total_cost_cents: i64,
    pub journal_entry_id: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub items: Vec<SaleLine>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl SaleRecord {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn total_cost(&self) -> Money {
        Money::from_cents(self.total_cost_cents)
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// One page of a cursor-paginated read.
///
/// `next_cursor` is opaque to callers; `None` means the end was reached.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}
