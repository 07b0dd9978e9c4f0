//! # Error Types
//!
//! Domain-specific error types for stockledger-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockledger-core errors (this file)                                    │
//! │  ├── CoreError        - Ledger rule violations                          │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  stockledger-db errors (separate crate)                                 │
//! │  └── DbError          - Storage failures, wraps CoreError               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recoverability
//! - `InsufficientStock`, `InvalidQuantity`, `Validation`: user-recoverable,
//!   rejected before any write.
//! - `ConcurrencyExhausted`: transient, the whole operation may be retried.
//! - `UnbalancedJournal`: a programming or data-integrity fault. Posting halts.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger business rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found in the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Branch cannot be found.
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    /// Stock transfer cannot be found.
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    /// Sale record cannot be found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Journal entry cannot be found.
    #[error("Journal entry not found: {0}")]
    JournalEntryNotFound(String),

    /// A stock quantity was zero or negative.
    #[error("Invalid quantity: {quantity} (must be greater than zero)")]
    InvalidQuantity { quantity: i64 },

    /// Not enough remaining stock across the cost layers of a product/branch.
    ///
    /// ## User Workflow
    /// ```text
    /// process_sale (qty: 5)
    ///      │
    ///      ▼
    /// FIFO plan over layers: available=3
    ///      │
    ///      ▼
    /// InsufficientStock { available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 in stock"
    /// ```
    #[error(
        "Insufficient stock for product {product_id} at branch {branch_id}: \
         available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: String,
        branch_id: String,
        available: i64,
        requested: i64,
    },

    /// Transfer phase attempted from the wrong status, or the branch pair is
    /// not usable.
    #[error("Invalid transfer state for {transfer_id}: {reason}")]
    InvalidTransferState { transfer_id: String, reason: String },

    /// Sale is not in a status that allows the requested operation.
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Journal entry is not in a status that allows the requested operation.
    #[error("Journal entry {entry_id} is {current_status}, cannot perform operation")]
    InvalidJournalStatus {
        entry_id: String,
        current_status: String,
    },

    /// Total debits and total credits of a journal entry differ.
    #[error("Unbalanced journal entry: debit {debit_cents} != credit {credit_cents} (cents)")]
    UnbalancedJournal { debit_cents: i64, credit_cents: i64 },

    /// Optimistic transaction kept conflicting with concurrent writers.
    #[error("{operation} gave up after {attempts} conflicting attempts")]
    ConcurrencyExhausted { operation: String, attempts: u32 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Whether the error is a transient concurrency failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::ConcurrencyExhausted { .. })
    }

    /// Whether the error signals an internal invariant violation.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(self, CoreError::UnbalancedJournal { .. })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid period).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Combination of fields is not allowed.
    #[error("{field}: {reason}")]
    Inconsistent { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            branch_id: "b-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product p-1 at branch b-1: available 3, requested 5"
        );
    }

    #[test]
    fn test_unbalanced_is_integrity_fault() {
        let err = CoreError::UnbalancedJournal {
            debit_cents: 100,
            credit_cents: 99,
        };
        assert!(err.is_integrity_fault());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "reason".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
