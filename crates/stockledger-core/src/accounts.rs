//! # Chart of Accounts
//!
//! Static hierarchical tree of accounts. Codes are dot-delimited; the first
//! segment decides the account type.
//!
//! ```text
//! 1        Assets
//! └ 1.1    Current Assets
//!   ├ 1.1.01  Cash
//!   └ 1.1.04  Inventory
//! 2        Liabilities
//! └ 2.1    Current Liabilities
//!   └ 2.1.03  Tax Payable
//! 3        Equity
//! 4        Revenue
//! └ 4.1    Operating Revenue
//!   └ 4.1.01  Sales Revenue
//! 5        Expenses
//! ├ 5.1    Cost of Goods
//! │ └ 5.1.01  Cost of Sales
//! └ 5.2    Operating Expenses
//!   ├ 5.2.01  General Expense
//!   ├ 5.2.02  Rent
//!   ├ 5.2.03  Utilities
//!   └ 5.2.04  Salaries
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub const CASH: &str = "1.1.01";
pub const INVENTORY: &str = "1.1.04";
pub const TAX_PAYABLE: &str = "2.1.03";
pub const SALES_REVENUE: &str = "4.1.01";
pub const COST_OF_SALES: &str = "5.1.01";
pub const GENERAL_EXPENSE: &str = "5.2.01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Type implied by the first code segment.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.split('.').next()? {
            "1" => Some(AccountType::Asset),
            "2" => Some(AccountType::Liability),
            "3" => Some(AccountType::Equity),
            "4" => Some(AccountType::Revenue),
            "5" => Some(AccountType::Expense),
            _ => None,
        }
    }

    /// Side on which balances of this type normally grow.
    pub fn nature(&self) -> AccountNature {
        match self {
            AccountType::Asset | AccountType::Expense => AccountNature::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                AccountNature::Credit
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountNature {
    Debit,
    Credit,
}

/// A chart-of-accounts node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Account {
    pub id: String,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub nature: AccountNature,
    /// Group accounts only aggregate children and never receive lines.
    pub is_group: bool,
    pub level: i64,
    pub parent_id: Option<String>,
}

impl Account {
    /// Builds a node from its code; type, nature, level and parent are
    /// derived from the code itself.
    pub fn from_code(code: &str, name: &str, is_group: bool) -> Option<Self> {
        let account_type = AccountType::from_code(code)?;
        let level = code.split('.').count() as i64;
        let parent_id = code.rsplit_once('.').map(|(parent, _)| account_id(parent));
        Some(Account {
            id: account_id(code),
            code: code.to_string(),
            name: name.to_string(),
            account_type,
            nature: account_type.nature(),
            is_group,
            level,
            parent_id,
        })
    }

    /// Whether this is a postable expense account other than cost of sales.
    pub fn is_operating_expense(&self) -> bool {
        self.account_type == AccountType::Expense && !self.is_group && self.code != COST_OF_SALES
    }
}

/// Stable id of the account with the given code.
pub fn account_id(code: &str) -> String {
    format!("acc-{}", code)
}

const DEFAULT_CHART: &[(&str, &str, bool)] = &[
    ("1", "Assets", true),
    ("1.1", "Current Assets", true),
    (CASH, "Cash", false),
    (INVENTORY, "Inventory", false),
    ("2", "Liabilities", true),
    ("2.1", "Current Liabilities", true),
    (TAX_PAYABLE, "Tax Payable", false),
    ("3", "Equity", true),
    ("4", "Revenue", true),
    ("4.1", "Operating Revenue", true),
    (SALES_REVENUE, "Sales Revenue", false),
    ("5", "Expenses", true),
    ("5.1", "Cost of Goods", true),
    (COST_OF_SALES, "Cost of Sales", false),
    ("5.2", "Operating Expenses", true),
    (GENERAL_EXPENSE, "General Expense", false),
    ("5.2.02", "Rent", false),
    ("5.2.03", "Utilities", false),
    ("5.2.04", "Salaries", false),
];

/// The chart seeded into every new ledger, parents before children.
pub fn default_chart() -> Vec<Account> {
    DEFAULT_CHART
        .iter()
        .filter_map(|(code, name, group)| Account::from_code(code, name, *group))
        .collect()
}

/// Picks the account an expense record is booked against.
///
/// The category may name a postable expense account by code (`5.2.02`) or by
/// name (`rent`, case-insensitive). Anything else falls back to
/// `fallback`, normally General Expense.
pub fn resolve_expense_account<'a>(
    chart: &'a [Account],
    category: &str,
    fallback: &'a Account,
) -> &'a Account {
    let wanted = category.trim();
    chart
        .iter()
        .filter(|a| a.is_operating_expense())
        .find(|a| a.code == wanted || a.name.eq_ignore_ascii_case(wanted))
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chart_shape() {
        let chart = default_chart();
        assert_eq!(chart.len(), DEFAULT_CHART.len());

        let cash = chart.iter().find(|a| a.code == CASH).unwrap();
        assert_eq!(cash.account_type, AccountType::Asset);
        assert_eq!(cash.nature, AccountNature::Debit);
        assert_eq!(cash.level, 3);
        assert_eq!(cash.parent_id.as_deref(), Some("acc-1.1"));

        let revenue = chart.iter().find(|a| a.code == SALES_REVENUE).unwrap();
        assert_eq!(revenue.nature, AccountNature::Credit);

        let root = chart.iter().find(|a| a.code == "5").unwrap();
        assert!(root.is_group);
        assert!(root.parent_id.is_none());
    }

    #[test]
    fn test_every_parent_precedes_child() {
        let chart = default_chart();
        for (idx, account) in chart.iter().enumerate() {
            if let Some(parent) = &account.parent_id {
                let parent_idx = chart.iter().position(|a| &a.id == parent).unwrap();
                assert!(parent_idx < idx, "{} listed before parent", account.code);
            }
        }
    }

    #[test]
    fn test_resolve_expense_account() {
        let chart = default_chart();
        let general = chart.iter().find(|a| a.code == GENERAL_EXPENSE).unwrap();

        assert_eq!(resolve_expense_account(&chart, "rent", general).code, "5.2.02");
        assert_eq!(resolve_expense_account(&chart, "5.2.03", general).code, "5.2.03");
        // cost of sales is never a target for a manual expense
        assert_eq!(
            resolve_expense_account(&chart, COST_OF_SALES, general).code,
            GENERAL_EXPENSE
        );
        assert_eq!(
            resolve_expense_account(&chart, "office snacks", general).code,
            GENERAL_EXPENSE
        );
    }
}
