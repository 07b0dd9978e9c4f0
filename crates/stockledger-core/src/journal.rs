//! # Journal Generation & Validation
//!
//! Builds the double-entry records for sales and expenses and enforces the
//! balance rule before anything is posted.
//!
//! ## Retail Sale Entry
//! ```text
//! ┌──────────────────────────────┬──────────────┬──────────────┐
//! │ Account                      │ Debit        │ Credit       │
//! ├──────────────────────────────┼──────────────┼──────────────┤
//! │ 1.1.01 Cash                  │ amount       │              │
//! │ 4.1.01 Sales Revenue         │              │ amount/(1+R) │
//! │ 2.1.03 Tax Payable           │              │ amount − base│
//! │ 5.1.01 Cost of Sales         │ total cost   │              │
//! │ 1.1.04 Inventory             │              │ total cost   │
//! └──────────────────────────────┴──────────────┴──────────────┘
//! ```
//!
//! R is the statutory rate configured for the generator. It is kept apart
//! from the rate the POS uses to compute displayed totals; when the two
//! differ the revenue/tax split will not match the receipt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::accounts::{
    self, resolve_expense_account, Account, CASH, COST_OF_SALES, GENERAL_EXPENSE, INVENTORY,
    SALES_REVENUE, TAX_PAYABLE,
};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Actor, RecordType, SaleRecord, TaxRate};
use crate::BALANCE_TOLERANCE_CENTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalStatus {
    Draft,
    Posted,
    Void,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Draft => "DRAFT",
            JournalStatus::Posted => "POSTED",
            JournalStatus::Void => "VOID",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Sale,
    Expense,
    Adjustment,
}

/// One debit or credit line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalLine {
    pub account_id: String,
    pub account_code: String,
    pub account_name: String,
    pub debit_cents: i64,
    pub credit_cents: i64,
}

impl JournalLine {
    pub fn debit(account: &Account, amount: Money) -> Self {
        JournalLine {
            account_id: account.id.clone(),
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            debit_cents: amount.cents(),
            credit_cents: 0,
        }
    }

    pub fn credit(account: &Account, amount: Money) -> Self {
        JournalLine {
            account_id: account.id.clone(),
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            debit_cents: 0,
            credit_cents: amount.cents(),
        }
    }

    /// The same line on the opposite side.
    pub fn swapped(&self) -> Self {
        JournalLine {
            debit_cents: self.credit_cents,
            credit_cents: self.debit_cents,
            ..self.clone()
        }
    }
}

/// A double-entry record. Never edited once POSTED; voiding appends a
/// reversing entry instead.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct JournalEntry {
    pub id: String,
    #[ts(as = "String")]
    pub date: DateTime<Utc>,
    pub description: String,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub lines: Vec<JournalLine>,
    pub total_amount_cents: i64,
    pub reference_id: String,
    pub reference_type: ReferenceType,
    pub branch_id: String,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub status: JournalStatus,
    /// Set on reversing entries.
    pub reverses_entry_id: Option<String>,
    pub version: i64,
}

impl JournalEntry {
    pub fn total_debit(&self) -> Money {
        self.lines.iter().map(|l| Money::from_cents(l.debit_cents)).sum()
    }

    pub fn total_credit(&self) -> Money {
        self.lines.iter().map(|l| Money::from_cents(l.credit_cents)).sum()
    }

    /// Validates the entry and marks it POSTED.
    ///
    /// Fails with `UnbalancedJournal` when debits and credits differ, which
    /// is an integrity fault: the caller must abort its transaction.
    pub fn post(mut self) -> CoreResult<Self> {
        if self.lines.is_empty() {
            return Err(ValidationError::Required {
                field: "journal lines".to_string(),
            }
            .into());
        }
        if self
            .lines
            .iter()
            .any(|l| l.debit_cents < 0 || l.credit_cents < 0)
        {
            return Err(ValidationError::MustBePositive {
                field: "journal line amount".to_string(),
            }
            .into());
        }
        ensure_balanced(&self)?;
        self.status = JournalStatus::Posted;
        Ok(self)
    }
}

/// True iff `|Σdebit − Σcredit|` is under the balance tolerance.
pub fn validate_entry(entry: &JournalEntry) -> bool {
    (entry.total_debit() - entry.total_credit()).abs().cents() < BALANCE_TOLERANCE_CENTS
}

/// [`validate_entry`] as a `Result`.
pub fn ensure_balanced(entry: &JournalEntry) -> CoreResult<()> {
    if validate_entry(entry) {
        Ok(())
    } else {
        Err(CoreError::UnbalancedJournal {
            debit_cents: entry.total_debit().cents(),
            credit_cents: entry.total_credit().cents(),
        })
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Produces journal entries against a chart of accounts at a fixed
/// statutory tax rate.
#[derive(Debug, Clone)]
pub struct JournalGenerator {
    tax_rate: TaxRate,
    chart: Vec<Account>,
}

impl JournalGenerator {
    /// Fails if the chart lacks one of the posting accounts.
    pub fn new(tax_rate: TaxRate, chart: Vec<Account>) -> CoreResult<Self> {
        let generator = JournalGenerator { tax_rate, chart };
        for code in [CASH, INVENTORY, TAX_PAYABLE, SALES_REVENUE, COST_OF_SALES, GENERAL_EXPENSE] {
            generator.account(code)?;
        }
        Ok(generator)
    }

    /// Generator over [`accounts::default_chart`].
    pub fn with_default_chart(tax_rate: TaxRate) -> CoreResult<Self> {
        Self::new(tax_rate, accounts::default_chart())
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }

    pub fn chart(&self) -> &[Account] {
        &self.chart
    }

    fn account(&self, code: &str) -> CoreResult<&Account> {
        self.chart
            .iter()
            .find(|a| a.code == code && !a.is_group)
            .ok_or_else(|| {
                ValidationError::InvalidFormat {
                    field: "chart of accounts".to_string(),
                    reason: format!("missing posting account {}", code),
                }
                .into()
            })
    }

    /// The five-line entry for a retail sale with tax-inclusive pricing.
    pub fn generate_sale_entry(
        &self,
        sale: &SaleRecord,
        total_cost: Money,
        actor: &Actor,
    ) -> CoreResult<JournalEntry> {
        let amount = sale.amount();
        let (base, tax) = amount.split_tax_inclusive(self.tax_rate);

        let lines = vec![
            JournalLine::debit(self.account(CASH)?, amount),
            JournalLine::credit(self.account(SALES_REVENUE)?, base),
            JournalLine::credit(self.account(TAX_PAYABLE)?, tax),
            JournalLine::debit(self.account(COST_OF_SALES)?, total_cost),
            JournalLine::credit(self.account(INVENTORY)?, total_cost),
        ];

        Ok(self.draft(
            sale,
            format!("Sale {}: {}", sale.id, sale.description),
            ReferenceType::Sale,
            lines,
            actor,
        ))
    }

    /// Debit the expense account named by the category, credit cash.
    pub fn generate_expense_entry(
        &self,
        sale: &SaleRecord,
        actor: &Actor,
    ) -> CoreResult<JournalEntry> {
        let fallback = self.account(GENERAL_EXPENSE)?;
        let expense_account = resolve_expense_account(&self.chart, &sale.category, fallback);
        let amount = sale.amount();

        let lines = vec![
            JournalLine::debit(expense_account, amount),
            JournalLine::credit(self.account(CASH)?, amount),
        ];

        Ok(self.draft(
            sale,
            format!("Expense {}: {}", sale.id, sale.description),
            ReferenceType::Expense,
            lines,
            actor,
        ))
    }

    /// Entry for any business record, by type.
    pub fn generate_for(
        &self,
        sale: &SaleRecord,
        total_cost: Money,
        actor: &Actor,
    ) -> CoreResult<JournalEntry> {
        match sale.record_type {
            RecordType::Income => self.generate_sale_entry(sale, total_cost, actor),
            RecordType::Expense => self.generate_expense_entry(sale, actor),
        }
    }

    /// A draft entry cancelling `original` line by line.
    pub fn reversal_of(
        &self,
        original: &JournalEntry,
        actor: &Actor,
        reason: &str,
    ) -> CoreResult<JournalEntry> {
        if original.status != JournalStatus::Posted {
            return Err(CoreError::InvalidJournalStatus {
                entry_id: original.id.clone(),
                current_status: original.status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        Ok(JournalEntry {
            id: Uuid::new_v4().to_string(),
            date: now,
            description: format!("Reversal of {}: {}", original.id, reason),
            lines: original.lines.iter().map(JournalLine::swapped).collect(),
            total_amount_cents: original.total_amount_cents,
            reference_id: original.id.clone(),
            reference_type: ReferenceType::Adjustment,
            branch_id: original.branch_id.clone(),
            created_by: actor.id.clone(),
            created_at: now,
            status: JournalStatus::Draft,
            reverses_entry_id: Some(original.id.clone()),
            version: 1,
        })
    }

    fn draft(
        &self,
        sale: &SaleRecord,
        description: String,
        reference_type: ReferenceType,
        lines: Vec<JournalLine>,
        actor: &Actor,
    ) -> JournalEntry {
        JournalEntry {
            id: Uuid::new_v4().to_string(),
            date: sale.date,
            description,
            lines,
            total_amount_cents: sale.amount_cents,
            reference_id: sale.id.clone(),
            reference_type,
            branch_id: sale.branch_id.clone(),
            created_by: actor.id.clone(),
            created_at: Utc::now(),
            status: JournalStatus::Draft,
            reverses_entry_id: None,
            version: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentMethod, SaleStatus};

    fn record(record_type: RecordType, amount_cents: i64, category: &str) -> SaleRecord {
        SaleRecord {
            id: "sale-1".to_string(),
            record_type,
            amount_cents,
            date: Utc::now(),
            description: "counter".to_string(),
            category: category.to_string(),
            payment_method: PaymentMethod::Cash,
            branch_id: "main".to_string(),
            actor_id: "u-1".to_string(),
            actor_name: "Ana".to_string(),
            status: SaleStatus::Completed,
            total_cost_cents: 0,
            journal_entry_id: None,
            items: Vec::new(),
            created_at: Utc::now(),
            version: 1,
        }
    }

    fn generator() -> JournalGenerator {
        JournalGenerator::with_default_chart(TaxRate::from_bps(1500)).unwrap()
    }

    #[test]
    fn test_sale_entry_balances_at_380() {
        let actor = Actor::new("u-1", "Ana");
        let sale = record(RecordType::Income, 23000, "retail");
        let entry = generator()
            .generate_sale_entry(&sale, Money::from_cents(15000), &actor)
            .unwrap();

        assert_eq!(entry.lines.len(), 5);
        assert_eq!(entry.total_debit().cents(), 38000);
        assert_eq!(entry.total_credit().cents(), 38000);
        assert!(validate_entry(&entry));

        let revenue = entry.lines.iter().find(|l| l.account_code == SALES_REVENUE).unwrap();
        let tax = entry.lines.iter().find(|l| l.account_code == TAX_PAYABLE).unwrap();
        assert_eq!(revenue.credit_cents, 20000);
        assert_eq!(tax.credit_cents, 3000);

        let posted = entry.post().unwrap();
        assert_eq!(posted.status, JournalStatus::Posted);
    }

    #[test]
    fn test_sale_entry_balances_on_awkward_amounts() {
        let actor = Actor::new("u-1", "Ana");
        let generator = generator();
        for amount in [1, 99, 1001, 33333, 987_654] {
            let sale = record(RecordType::Income, amount, "retail");
            let entry = generator
                .generate_sale_entry(&sale, Money::from_cents(amount / 3), &actor)
                .unwrap();
            assert!(validate_entry(&entry), "amount {}", amount);
        }
    }

    #[test]
    fn test_unbalanced_entry_refuses_to_post() {
        let actor = Actor::new("u-1", "Ana");
        let sale = record(RecordType::Income, 23000, "retail");
        let mut entry = generator()
            .generate_sale_entry(&sale, Money::from_cents(15000), &actor)
            .unwrap();
        entry.lines[1].credit_cents -= 1;

        assert!(!validate_entry(&entry));
        let err = entry.post().unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnbalancedJournal {
                debit_cents: 38000,
                credit_cents: 37999
            }
        ));
    }

    #[test]
    fn test_expense_entry_uses_category_account() {
        let actor = Actor::new("u-1", "Ana");
        let expense = record(RecordType::Expense, 5000, "Rent");
        let entry = generator().generate_for(&expense, Money::zero(), &actor).unwrap();

        assert_eq!(entry.reference_type, ReferenceType::Expense);
        assert_eq!(entry.lines.len(), 2);
        assert_eq!(entry.lines[0].account_code, "5.2.02");
        assert_eq!(entry.lines[0].debit_cents, 5000);
        assert_eq!(entry.lines[1].account_code, CASH);
        assert!(validate_entry(&entry));
    }

    #[test]
    fn test_reversal_swaps_sides() {
        let actor = Actor::new("u-1", "Ana");
        let generator = generator();
        let sale = record(RecordType::Income, 23000, "retail");
        let original = generator
            .generate_sale_entry(&sale, Money::from_cents(15000), &actor)
            .unwrap()
            .post()
            .unwrap();

        let reversal = generator.reversal_of(&original, &actor, "customer return").unwrap();
        assert_eq!(reversal.reverses_entry_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(reversal.reference_type, ReferenceType::Adjustment);
        assert_eq!(reversal.lines[0].credit_cents, 23000);
        assert_eq!(reversal.lines[0].debit_cents, 0);
        assert!(validate_entry(&reversal));
    }

    #[test]
    fn test_reversal_requires_posted() {
        let actor = Actor::new("u-1", "Ana");
        let generator = generator();
        let sale = record(RecordType::Income, 100, "retail");
        let draft = generator
            .generate_sale_entry(&sale, Money::zero(), &actor)
            .unwrap();
        assert!(matches!(
            generator.reversal_of(&draft, &actor, "x"),
            Err(CoreError::InvalidJournalStatus { .. })
        ));
    }

    #[test]
    fn test_generator_requires_posting_accounts() {
        let chart: Vec<Account> = accounts::default_chart()
            .into_iter()
            .filter(|a| a.code != TAX_PAYABLE)
            .collect();
        assert!(JournalGenerator::new(TaxRate::from_bps(1500), chart).is_err());
    }
}
