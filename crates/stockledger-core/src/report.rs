//! # Reporting
//!
//! Pure aggregation over per-account totals and layer values. The storage
//! layer does the scanning (bounded `GROUP BY` queries); this module decides
//! what each total means.
//!
//! ## P&L Classification
//! ```text
//!  account code          bucket
//!  ────────────────────  ─────────────────────────
//!  4.*                   revenue   (credit − debit)
//!  5.1.01 exactly        cogs      (debit − credit)
//!  other 5.*             expenses  (debit − credit)
//!  anything else         balance sheet, ignored
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::accounts::COST_OF_SALES;
use crate::error::{CoreResult, ValidationError};
use crate::money::Money;

/// Summed debits and credits for one account over a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AccountTotal {
    pub account_code: String,
    pub account_name: String,
    pub debit_cents: i64,
    pub credit_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PnlCategory {
    Revenue,
    CostOfSales,
    Expense,
}

impl PnlCategory {
    /// Bucket for an account code, or `None` for balance-sheet accounts.
    pub fn classify(code: &str) -> Option<Self> {
        if code == COST_OF_SALES {
            Some(PnlCategory::CostOfSales)
        } else if code == "4" || code.starts_with("4.") {
            Some(PnlCategory::Revenue)
        } else if code == "5" || code.starts_with("5.") {
            Some(PnlCategory::Expense)
        } else {
            None
        }
    }
}

/// One row of the per-account breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccountBalance {
    pub account_code: String,
    pub account_name: String,
    pub category: PnlCategory,
    /// Signed in the account's natural direction.
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfitAndLoss {
    #[ts(as = "String")]
    pub start: DateTime<Utc>,
    #[ts(as = "String")]
    pub end: DateTime<Utc>,
    pub branch_id: Option<String>,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
    pub expenses_cents: i64,
    pub gross_profit_cents: i64,
    pub net_profit_cents: i64,
    pub breakdown: Vec<AccountBalance>,
}

impl ProfitAndLoss {
    /// Classifies account totals into revenue, cost of sales and expenses.
    pub fn from_account_totals(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        branch_id: Option<String>,
        totals: &[AccountTotal],
    ) -> Self {
        let mut revenue = Money::zero();
        let mut cogs = Money::zero();
        let mut expenses = Money::zero();
        let mut breakdown = Vec::new();

        for total in totals {
            let Some(category) = PnlCategory::classify(&total.account_code) else {
                continue;
            };
            let debit = Money::from_cents(total.debit_cents);
            let credit = Money::from_cents(total.credit_cents);
            let amount = match category {
                PnlCategory::Revenue => {
                    revenue += credit - debit;
                    credit - debit
                }
                PnlCategory::CostOfSales => {
                    cogs += debit - credit;
                    debit - credit
                }
                PnlCategory::Expense => {
                    expenses += debit - credit;
                    debit - credit
                }
            };
            breakdown.push(AccountBalance {
                account_code: total.account_code.clone(),
                account_name: total.account_name.clone(),
                category,
                amount_cents: amount.cents(),
            });
        }

        breakdown.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        let gross = revenue - cogs;

        ProfitAndLoss {
            start,
            end,
            branch_id,
            revenue_cents: revenue.cents(),
            cogs_cents: cogs.cents(),
            expenses_cents: expenses.cents(),
            gross_profit_cents: gross.cents(),
            net_profit_cents: (gross - expenses).cents(),
            breakdown,
        }
    }
}

// =============================================================================
// Inventory Valuation
// =============================================================================

/// Live FIFO book value of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BranchValuation {
    pub branch_id: String,
    pub units: i64,
    pub value_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InventoryValuation {
    pub branch_id: Option<String>,
    pub total_units: i64,
    pub total_value_cents: i64,
    pub branches: Vec<BranchValuation>,
}

impl InventoryValuation {
    pub fn from_branches(branch_id: Option<String>, mut branches: Vec<BranchValuation>) -> Self {
        branches.sort_by(|a, b| a.branch_id.cmp(&b.branch_id));
        InventoryValuation {
            branch_id,
            total_units: branches.iter().map(|b| b.units).sum(),
            total_value_cents: branches.iter().map(|b| b.value_cents).sum(),
            branches,
        }
    }
}

// =============================================================================
// Monthly Summary
// =============================================================================

/// Precomputed monthly figures maintained by an out-of-band job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlySummary {
    /// `YYYY-MM`.
    pub period: String,
    pub branch_id: Option<String>,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
    pub expenses_cents: i64,
    pub gross_profit_cents: i64,
    pub net_profit_cents: i64,
    pub inventory_value_cents: i64,
    pub sale_count: i64,
    pub breakdown: Vec<AccountBalance>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl MonthlySummary {
    /// The result returned for a period nobody has summarised yet.
    pub fn zeroed(period: String, branch_id: Option<String>) -> Self {
        MonthlySummary {
            period,
            branch_id,
            revenue_cents: 0,
            cogs_cents: 0,
            expenses_cents: 0,
            gross_profit_cents: 0,
            net_profit_cents: 0,
            inventory_value_cents: 0,
            sale_count: 0,
            breakdown: Vec::new(),
            updated_at: None,
        }
    }

    /// Whether this summary came from storage rather than [`Self::zeroed`].
    pub fn is_materialized(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Builds a summary from a computed P&L.
    pub fn from_profit_and_loss(
        period: String,
        pnl: &ProfitAndLoss,
        inventory_value_cents: i64,
        sale_count: i64,
    ) -> Self {
        MonthlySummary {
            period,
            branch_id: pnl.branch_id.clone(),
            revenue_cents: pnl.revenue_cents,
            cogs_cents: pnl.cogs_cents,
            expenses_cents: pnl.expenses_cents,
            gross_profit_cents: pnl.gross_profit_cents,
            net_profit_cents: pnl.net_profit_cents,
            inventory_value_cents,
            sale_count,
            breakdown: pnl.breakdown.clone(),
            updated_at: Some(Utc::now()),
        }
    }
}

/// `YYYY-MM` key for a calendar month.
pub fn period_key(year: i32, month: u32) -> CoreResult<String> {
    if !(1..=12).contains(&month) {
        return Err(ValidationError::OutOfRange {
            field: "month".to_string(),
            min: 1,
            max: 12,
        }
        .into());
    }
    if !(1..=9999).contains(&year) {
        return Err(ValidationError::OutOfRange {
            field: "year".to_string(),
            min: 1,
            max: 9999,
        }
        .into());
    }
    Ok(format!("{:04}-{:02}", year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(code: &str, debit: i64, credit: i64) -> AccountTotal {
        AccountTotal {
            account_code: code.to_string(),
            account_name: code.to_string(),
            debit_cents: debit,
            credit_cents: credit,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(PnlCategory::classify("4.1.01"), Some(PnlCategory::Revenue));
        assert_eq!(PnlCategory::classify("5.1.01"), Some(PnlCategory::CostOfSales));
        assert_eq!(PnlCategory::classify("5.2.04"), Some(PnlCategory::Expense));
        assert_eq!(PnlCategory::classify("1.1.01"), None);
        assert_eq!(PnlCategory::classify("2.1.03"), None);
        assert_eq!(PnlCategory::classify("40.1"), None);
    }

    #[test]
    fn test_sale_plus_expense_nets_to_zero() {
        // sale: cash 230 / revenue 200 / tax 30 / cogs 150 / inventory 150
        // expense: general 50 / cash 50
        let totals = vec![
            total("1.1.01", 23000, 5000),
            total("1.1.04", 0, 15000),
            total("2.1.03", 0, 3000),
            total("4.1.01", 0, 20000),
            total("5.1.01", 15000, 0),
            total("5.2.01", 5000, 0),
        ];
        let pnl = ProfitAndLoss::from_account_totals(Utc::now(), Utc::now(), None, &totals);

        assert_eq!(pnl.revenue_cents, 20000);
        assert_eq!(pnl.cogs_cents, 15000);
        assert_eq!(pnl.gross_profit_cents, 5000);
        assert_eq!(pnl.expenses_cents, 5000);
        assert_eq!(pnl.net_profit_cents, 0);
        assert_eq!(pnl.breakdown.len(), 3);
    }

    #[test]
    fn test_reversal_nets_out() {
        let totals = vec![total("4.1.01", 20000, 20000), total("5.1.01", 15000, 15000)];
        let pnl = ProfitAndLoss::from_account_totals(Utc::now(), Utc::now(), None, &totals);
        assert_eq!(pnl.revenue_cents, 0);
        assert_eq!(pnl.cogs_cents, 0);
        assert_eq!(pnl.net_profit_cents, 0);
    }

    #[test]
    fn test_valuation_totals() {
        let valuation = InventoryValuation::from_branches(
            None,
            vec![
                BranchValuation {
                    branch_id: "north".into(),
                    units: 5,
                    value_cents: 6000,
                },
                BranchValuation {
                    branch_id: "east".into(),
                    units: 10,
                    value_cents: 10000,
                },
            ],
        );
        assert_eq!(valuation.total_units, 15);
        assert_eq!(valuation.total_value_cents, 16000);
        assert_eq!(valuation.branches[0].branch_id, "east");
    }

    #[test]
    fn test_period_key() {
        assert_eq!(period_key(2024, 3).unwrap(), "2024-03");
        assert!(period_key(2024, 13).is_err());
        assert!(period_key(2024, 0).is_err());
    }

    #[test]
    fn test_zeroed_summary() {
        let summary = MonthlySummary::zeroed("2024-01".into(), Some("north".into()));
        assert_eq!(summary.net_profit_cents, 0);
        assert!(summary.breakdown.is_empty());
        assert!(!summary.is_materialized());
    }
}
