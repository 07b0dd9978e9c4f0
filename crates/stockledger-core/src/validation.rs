//! # Validation Module
//!
//! Input checks run before any transaction is opened.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (before the transaction)                          │
//! │  ├── bounded quantities, costs and amounts                              │
//! │  └── sale / transfer shape                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Working set (inside the transaction)                          │
//! │  ├── FIFO sufficiency                                                   │
//! │  └── transfer status, journal balance                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                        │
//! │  ├── CHECK (stock >= 0), CHECK (remaining <= initial)                   │
//! │  └── append-only triggers on ledger tables                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{NewSale, NewTransferItem, RecordType};
use crate::{
    DEFAULT_PAGE_SIZE, MAX_AMOUNT_CENTS, MAX_LINE_ITEMS, MAX_QUANTITY, MAX_REASON_LENGTH,
    MAX_UNIT_COST_CENTS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Stock quantities must be strictly positive and at most [`MAX_QUANTITY`].
pub fn validate_quantity(quantity: i64) -> CoreResult<()> {
    if quantity <= 0 {
        return Err(CoreError::InvalidQuantity { quantity });
    }
    if quantity > MAX_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_QUANTITY,
        }
        .into());
    }
    Ok(())
}

/// Unit costs may be zero (free goods) but never negative.
pub fn validate_unit_cost(cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_UNIT_COST_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: "unit cost".to_string(),
            min: 0,
            max: MAX_UNIT_COST_CENTS,
        });
    }
    Ok(())
}

/// Stock on hand after adding `delta` to `current`.
///
/// Fails when the result would exceed [`MAX_QUANTITY`] or leave the `i64`
/// range.
pub fn checked_stock(current: i64, delta: i64) -> ValidationResult<i64> {
    current
        .checked_add(delta)
        .filter(|stock| *stock <= MAX_QUANTITY)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "stock on hand".to_string(),
            min: 0,
            max: MAX_QUANTITY,
        })
}

/// Running cost total plus `amount`, bounded by [`MAX_AMOUNT_CENTS`].
pub fn checked_cost(total: Money, amount: Money) -> ValidationResult<Money> {
    total
        .checked_add(amount)
        .filter(|sum| sum.cents() <= MAX_AMOUNT_CENTS)
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "cost of goods".to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        })
}

/// Non-empty identifier.
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Free-text reason for a stock change; required and bounded.
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    if reason.len() > MAX_REASON_LENGTH {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LENGTH,
        });
    }
    Ok(())
}

/// Optional note; bounded when present.
pub fn validate_note(note: Option<&str>) -> ValidationResult<()> {
    match note {
        Some(n) if n.len() > MAX_REASON_LENGTH => Err(ValidationError::TooLong {
            field: "note".to_string(),
            max: MAX_REASON_LENGTH,
        }),
        _ => Ok(()),
    }
}

/// Page size clamped to `[1, max]`; zero means the default.
pub fn clamp_page_size(limit: u32, max: u32) -> u32 {
    let max = max.max(1);
    if limit == 0 {
        DEFAULT_PAGE_SIZE.min(max)
    } else {
        limit.min(max)
    }
}

/// Parses a pagination cursor. `None` starts from the newest row.
pub fn parse_cursor(cursor: Option<&str>) -> ValidationResult<Option<i64>> {
    match cursor {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|seq| *seq > 0)
            .map(Some)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "cursor".to_string(),
                reason: "not a cursor returned by a previous page".to_string(),
            }),
    }
}

/// Shape of a transfer request.
pub fn validate_transfer_items(items: &[NewTransferItem]) -> CoreResult<()> {
    if items.is_empty() {
        return Err(ValidationError::Required {
            field: "transfer items".to_string(),
        }
        .into());
    }
    if items.len() > MAX_LINE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "transfer items".to_string(),
            min: 1,
            max: MAX_LINE_ITEMS as i64,
        }
        .into());
    }
    for item in items {
        validate_id("product_id", &item.product_id)?;
        validate_quantity(item.quantity)?;
    }
    Ok(())
}

/// Shape of a submitted sale or expense.
///
/// ## Rules
/// - amount > 0
/// - INCOME carries at least one line, every line quantity > 0
/// - EXPENSE carries no lines (no stock is touched)
pub fn validate_new_sale(sale: &NewSale) -> CoreResult<()> {
    validate_id("sale id", &sale.id)?;
    validate_id("branch_id", &sale.branch_id)?;
    if sale.amount_cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into());
    }
    if sale.amount_cents > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: 1,
            max: MAX_AMOUNT_CENTS,
        }
        .into());
    }

    match sale.record_type {
        RecordType::Income => {
            if sale.lines.is_empty() {
                return Err(ValidationError::Required {
                    field: "sale lines".to_string(),
                }
                .into());
            }
            if sale.lines.len() > MAX_LINE_ITEMS {
                return Err(ValidationError::OutOfRange {
                    field: "sale lines".to_string(),
                    min: 1,
                    max: MAX_LINE_ITEMS as i64,
                }
                .into());
            }
            for line in &sale.lines {
                validate_id("product_id", &line.product_id)?;
                validate_quantity(line.quantity)?;
                if !(0..=MAX_UNIT_COST_CENTS).contains(&line.unit_price_cents) {
                    return Err(ValidationError::OutOfRange {
                        field: "unit price".to_string(),
                        min: 0,
                        max: MAX_UNIT_COST_CENTS,
                    }
                    .into());
                }
            }
        }
        RecordType::Expense => {
            if !sale.lines.is_empty() {
                return Err(ValidationError::Inconsistent {
                    field: "expense".to_string(),
                    reason: "expenses cannot carry stock lines".to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewSaleLine, PaymentMethod};
    use chrono::Utc;

    fn sale(record_type: RecordType, lines: Vec<NewSaleLine>) -> NewSale {
        NewSale {
            id: "s-1".into(),
            record_type,
            amount_cents: 1000,
            date: Utc::now(),
            description: "test".into(),
            category: "retail".into(),
            payment_method: PaymentMethod::Cash,
            branch_id: "main".into(),
            lines,
        }
    }

    fn line(qty: i64) -> NewSaleLine {
        NewSaleLine {
            product_id: "p-1".into(),
            branch_id: None,
            quantity: qty,
            unit_price_cents: 1000,
        }
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(matches!(
            validate_quantity(0),
            Err(CoreError::InvalidQuantity { quantity: 0 })
        ));
        assert!(validate_quantity(-4).is_err());
        assert!(validate_quantity(MAX_QUANTITY).is_ok());
        assert!(matches!(
            validate_quantity(MAX_QUANTITY + 1),
            Err(CoreError::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert!(validate_quantity(i64::MAX).is_err());
    }

    #[test]
    fn test_validate_unit_cost_bounds() {
        assert!(validate_unit_cost(0).is_ok());
        assert!(validate_unit_cost(MAX_UNIT_COST_CENTS).is_ok());
        assert!(validate_unit_cost(-1).is_err());
        assert!(validate_unit_cost(MAX_UNIT_COST_CENTS + 1).is_err());
    }

    #[test]
    fn test_checked_stock_and_cost() {
        assert_eq!(checked_stock(10, 5).unwrap(), 15);
        assert_eq!(checked_stock(MAX_QUANTITY - 1, 1).unwrap(), MAX_QUANTITY);
        assert!(checked_stock(MAX_QUANTITY, 1).is_err());
        assert!(checked_stock(i64::MAX, 1).is_err());

        let total = checked_cost(Money::from_cents(100), Money::from_cents(50)).unwrap();
        assert_eq!(total.cents(), 150);
        assert!(checked_cost(Money::from_cents(MAX_AMOUNT_CENTS), Money::from_cents(1)).is_err());
        assert!(checked_cost(Money::from_cents(i64::MAX), Money::from_cents(1)).is_err());
    }

    #[test]
    fn test_sale_amount_and_price_bounds() {
        let mut huge = sale(RecordType::Income, vec![line(1)]);
        huge.amount_cents = MAX_AMOUNT_CENTS + 1;
        assert!(validate_new_sale(&huge).is_err());

        let mut pricey = line(1);
        pricey.unit_price_cents = MAX_UNIT_COST_CENTS + 1;
        assert!(validate_new_sale(&sale(RecordType::Income, vec![pricey])).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert!(validate_reason("restock").is_ok());
        assert!(validate_reason("   ").is_err());
        assert!(validate_reason(&"x".repeat(MAX_REASON_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(0, 200), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(10, 200), 10);
        assert_eq!(clamp_page_size(5000, 200), 200);
        assert_eq!(clamp_page_size(0, 20), 20);
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(None).unwrap(), None);
        assert_eq!(parse_cursor(Some("42")).unwrap(), Some(42));
        assert!(parse_cursor(Some("abc")).is_err());
        assert!(parse_cursor(Some("-1")).is_err());
    }

    #[test]
    fn test_income_requires_lines() {
        assert!(validate_new_sale(&sale(RecordType::Income, vec![line(1)])).is_ok());
        assert!(validate_new_sale(&sale(RecordType::Income, vec![])).is_err());
        assert!(matches!(
            validate_new_sale(&sale(RecordType::Income, vec![line(0)])),
            Err(CoreError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_expense_rejects_lines() {
        assert!(validate_new_sale(&sale(RecordType::Expense, vec![])).is_ok());
        assert!(validate_new_sale(&sale(RecordType::Expense, vec![line(1)])).is_err());
    }

    #[test]
    fn test_transfer_items() {
        let ok = vec![NewTransferItem {
            product_id: "p".into(),
            quantity: 3,
        }];
        assert!(validate_transfer_items(&ok).is_ok());
        assert!(validate_transfer_items(&[]).is_err());
    }
}
