//! # Reporting Aggregator
//!
//! Reads only. SQLite does the scanning with bounded `GROUP BY` queries
//! (one row per account or per branch); classification happens in
//! `stockledger_core::report`.
//!
//! ```text
//!  profit_and_loss        journal_lines ⋈ journal_entries
//!                         status IN (POSTED, VOID), date in [start, end]
//!                         GROUP BY account ──► ProfitAndLoss
//!
//!  inventory_valuation    cost_layers, remaining > 0
//!                         GROUP BY branch ──► Σ remaining × cost
//!
//!  monthly_summary        report_summaries[period, branch | '']
//!                         missing ──► zeroed summary, never an error
//! ```
//!
//! VOID entries stay in the P&L scan: each is cancelled by its POSTED
//! reversal, so the pair nets to zero.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use stockledger_core::report::{
    period_key, AccountBalance, AccountTotal, BranchValuation, InventoryValuation, MonthlySummary,
    ProfitAndLoss,
};
use stockledger_core::ValidationError;

use crate::error::DbResult;

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    period: String,
    branch_id: String,
    revenue_cents: i64,
    cogs_cents: i64,
    expenses_cents: i64,
    gross_profit_cents: i64,
    net_profit_cents: i64,
    inventory_value_cents: i64,
    sale_count: i64,
    breakdown: String,
    updated_at: DateTime<Utc>,
}

impl SummaryRow {
    fn into_summary(self) -> DbResult<MonthlySummary> {
        let breakdown: Vec<AccountBalance> = serde_json::from_str(&self.breakdown)?;
        Ok(MonthlySummary {
            period: self.period,
            branch_id: (!self.branch_id.is_empty()).then_some(self.branch_id),
            revenue_cents: self.revenue_cents,
            cogs_cents: self.cogs_cents,
            expenses_cents: self.expenses_cents,
            gross_profit_cents: self.gross_profit_cents,
            net_profit_cents: self.net_profit_cents,
            inventory_value_cents: self.inventory_value_cents,
            sale_count: self.sale_count,
            breakdown,
            updated_at: Some(self.updated_at),
        })
    }
}

/// First and last instant of a calendar month.
fn month_bounds(year: i32, month: u32) -> DbResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || ValidationError::InvalidFormat {
        field: "period".to_string(),
        reason: format!("{}-{} is not a calendar month", year, month),
    };
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    let next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    Ok((start, next - Duration::nanoseconds(1)))
}

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    /// Revenue, cost of sales and expenses for `[start, end]` (both
    /// inclusive), optionally for one branch.
    pub async fn profit_and_loss(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        branch_id: Option<&str>,
    ) -> DbResult<ProfitAndLoss> {
        if end < start {
            return Err(ValidationError::Inconsistent {
                field: "period".to_string(),
                reason: "end is before start".to_string(),
            }
            .into());
        }

        let totals = sqlx::query_as::<_, AccountTotal>(
            r#"
            SELECT l.account_code,
                   l.account_name,
                   SUM(l.debit_cents)  AS debit_cents,
                   SUM(l.credit_cents) AS credit_cents
            FROM journal_lines l
            JOIN journal_entries e ON e.id = l.entry_id
            WHERE e.status IN ('POSTED', 'VOID')
              AND e.date >= ?1 AND e.date <= ?2
              AND (?3 IS NULL OR e.branch_id = ?3)
            GROUP BY l.account_code, l.account_name
            ORDER BY l.account_code
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(accounts = totals.len(), "Aggregated journal lines");
        Ok(ProfitAndLoss::from_account_totals(
            start,
            end,
            branch_id.map(str::to_string),
            &totals,
        ))
    }

    /// Live FIFO book value: Σ remaining × cost over every layer with stock.
    pub async fn inventory_valuation(
        &self,
        branch_id: Option<&str>,
    ) -> DbResult<InventoryValuation> {
        let branches = sqlx::query_as::<_, BranchValuation>(
            r#"
            SELECT branch_id,
                   SUM(remaining_stock)              AS units,
                   SUM(remaining_stock * cost_cents) AS value_cents
            FROM cost_layers
            WHERE remaining_stock > 0
              AND (?1 IS NULL OR branch_id = ?1)
            GROUP BY branch_id
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(InventoryValuation::from_branches(
            branch_id.map(str::to_string),
            branches,
        ))
    }

    /// Precomputed summary for a month. A period nobody has summarised yet
    /// comes back zeroed, not as an error.
    pub async fn monthly_summary(
        &self,
        year: i32,
        month: u32,
        branch_id: Option<&str>,
    ) -> DbResult<MonthlySummary> {
        let period = period_key(year, month)?;
        let row = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT period, branch_id, revenue_cents, cogs_cents, expenses_cents,
                   gross_profit_cents, net_profit_cents, inventory_value_cents,
                   sale_count, breakdown, updated_at
            FROM report_summaries
            WHERE period = ?1 AND branch_id = ?2
            "#,
        )
        .bind(&period)
        .bind(branch_id.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_summary(),
            None => Ok(MonthlySummary::zeroed(period, branch_id.map(str::to_string))),
        }
    }

    /// Write entry for the aggregation job; replaces any stored summary for
    /// the same period and branch.
    pub async fn store_monthly_summary(&self, summary: &MonthlySummary) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO report_summaries (
                period, branch_id, revenue_cents, cogs_cents, expenses_cents,
                gross_profit_cents, net_profit_cents, inventory_value_cents,
                sale_count, breakdown, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(period, branch_id) DO UPDATE SET
                revenue_cents = excluded.revenue_cents,
                cogs_cents = excluded.cogs_cents,
                expenses_cents = excluded.expenses_cents,
                gross_profit_cents = excluded.gross_profit_cents,
                net_profit_cents = excluded.net_profit_cents,
                inventory_value_cents = excluded.inventory_value_cents,
                sale_count = excluded.sale_count,
                breakdown = excluded.breakdown,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&summary.period)
        .bind(summary.branch_id.as_deref().unwrap_or(""))
        .bind(summary.revenue_cents)
        .bind(summary.cogs_cents)
        .bind(summary.expenses_cents)
        .bind(summary.gross_profit_cents)
        .bind(summary.net_profit_cents)
        .bind(summary.inventory_value_cents)
        .bind(summary.sale_count)
        .bind(serde_json::to_string(&summary.breakdown)?)
        .bind(summary.updated_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Computes a month from the journal and stores it. Inventory value is
    /// the valuation at the time of the call.
    pub async fn refresh_monthly_summary(
        &self,
        year: i32,
        month: u32,
        branch_id: Option<&str>,
    ) -> DbResult<MonthlySummary> {
        let period = period_key(year, month)?;
        let (start, end) = month_bounds(year, month)?;

        let pnl = self.profit_and_loss(start, end, branch_id).await?;
        let valuation = self.inventory_valuation(branch_id).await?;
        let sale_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sales
            WHERE record_type = 'INCOME' AND status = 'COMPLETED'
              AND date >= ?1 AND date <= ?2
              AND (?3 IS NULL OR branch_id = ?3)
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(branch_id)
        .fetch_one(&self.pool)
        .await?;

        let summary = MonthlySummary::from_profit_and_loss(
            period,
            &pnl,
            valuation.total_value_cents,
            sale_count,
        );
        self.store_monthly_summary(&summary).await?;

        info!(
            period = %summary.period,
            branch_id = branch_id.unwrap_or("all"),
            net_profit_cents = summary.net_profit_cents,
            "Monthly summary refreshed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{actor, ledger, ANNEX, CHIPS, COLA, MAIN};
    use chrono::Datelike;
    use stockledger_core::types::{NewSale, NewSaleLine, PaymentMethod, RecordType};

    fn new_sale(id: &str, amount_cents: i64, product_id: &str, quantity: i64) -> NewSale {
        NewSale {
            id: id.to_string(),
            record_type: RecordType::Income,
            amount_cents,
            date: Utc::now(),
            description: "Counter sale".to_string(),
            category: "retail".to_string(),
            payment_method: PaymentMethod::Card,
            branch_id: MAIN.to_string(),
            lines: vec![NewSaleLine {
                product_id: product_id.to_string(),
                branch_id: None,
                quantity,
                unit_price_cents: amount_cents / quantity,
            }],
        }
    }

    fn new_expense(id: &str, amount_cents: i64) -> NewSale {
        NewSale {
            id: id.to_string(),
            record_type: RecordType::Expense,
            amount_cents,
            date: Utc::now(),
            description: "Electricity".to_string(),
            category: "utilities".to_string(),
            payment_method: PaymentMethod::Cash,
            branch_id: MAIN.to_string(),
            lines: Vec::new(),
        }
    }

    fn today_window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(1), now + Duration::days(1))
    }

    #[tokio::test]
    async fn test_profit_and_loss_buckets() {
        let db = ledger().await;
        db.inventory().add_stock(COLA, MAIN, 1, 15000, "lot", &actor()).await.unwrap();
        db.sales()
            .process_sale(&new_sale("s-1", 23000, COLA, 1), &actor())
            .await
            .unwrap();
        db.sales()
            .record_expense(&new_expense("x-1", 5000), &actor())
            .await
            .unwrap();

        let (start, end) = today_window();
        let pnl = db.reports().profit_and_loss(start, end, None).await.unwrap();
        assert_eq!(pnl.revenue_cents, 20000);
        assert_eq!(pnl.cogs_cents, 15000);
        assert_eq!(pnl.gross_profit_cents, 5000);
        assert_eq!(pnl.expenses_cents, 5000);
        assert_eq!(pnl.net_profit_cents, 0);
        assert!(pnl.breakdown.iter().any(|b| b.account_code == "5.2.03"));

        let annex = db
            .reports()
            .profit_and_loss(start, end, Some(ANNEX))
            .await
            .unwrap();
        assert_eq!(annex.revenue_cents, 0);
        assert!(annex.breakdown.is_empty());
    }

    #[tokio::test]
    async fn test_voided_sale_nets_out_of_profit_and_loss() {
        let db = ledger().await;
        db.inventory().add_stock(COLA, MAIN, 2, 1000, "lot", &actor()).await.unwrap();
        db.sales()
            .process_sale(&new_sale("s-1", 2300, COLA, 1), &actor())
            .await
            .unwrap();
        db.sales().void_sale("s-1", &actor(), "refund").await.unwrap();

        let (start, end) = today_window();
        let pnl = db.reports().profit_and_loss(start, end, Some(MAIN)).await.unwrap();
        assert_eq!(pnl.revenue_cents, 0);
        assert_eq!(pnl.cogs_cents, 0);
        assert_eq!(pnl.net_profit_cents, 0);
    }

    #[tokio::test]
    async fn test_period_outside_window_is_empty() {
        let db = ledger().await;
        db.sales()
            .record_expense(&new_expense("x-1", 5000), &actor())
            .await
            .unwrap();

        let start = Utc::now() - Duration::days(60);
        let end = Utc::now() - Duration::days(30);
        let pnl = db.reports().profit_and_loss(start, end, None).await.unwrap();
        assert_eq!(pnl.expenses_cents, 0);

        let backwards = db.reports().profit_and_loss(end, start, None).await;
        assert!(backwards.is_err());
    }

    #[tokio::test]
    async fn test_inventory_valuation_per_branch() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 20, 1000, "lot A", &actor()).await.unwrap();
        inventory.add_stock(COLA, MAIN, 10, 1200, "lot B", &actor()).await.unwrap();
        inventory.add_stock(CHIPS, ANNEX, 4, 500, "lot", &actor()).await.unwrap();
        inventory.consume_fifo(COLA, MAIN, 25, "shrinkage", &actor()).await.unwrap();

        let all = db.reports().inventory_valuation(None).await.unwrap();
        assert_eq!(all.total_units, 9);
        assert_eq!(all.total_value_cents, 5 * 1200 + 4 * 500);
        assert_eq!(all.branches.len(), 2);

        let main = db.reports().inventory_valuation(Some(MAIN)).await.unwrap();
        assert_eq!(main.total_value_cents, 6000);
        assert_eq!(main.branches.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_monthly_summary_is_zeroed() {
        let db = ledger().await;
        let summary = db.reports().monthly_summary(2024, 2, Some(MAIN)).await.unwrap();
        assert_eq!(summary.period, "2024-02");
        assert_eq!(summary.branch_id.as_deref(), Some(MAIN));
        assert_eq!(summary.net_profit_cents, 0);
        assert!(!summary.is_materialized());

        assert!(db.reports().monthly_summary(2024, 13, None).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_stores_and_fast_path_reads() {
        let db = ledger().await;
        db.inventory().add_stock(COLA, MAIN, 2, 15000, "lot", &actor()).await.unwrap();
        db.sales()
            .process_sale(&new_sale("s-1", 23000, COLA, 1), &actor())
            .await
            .unwrap();

        let now = Utc::now();
        let refreshed = db
            .reports()
            .refresh_monthly_summary(now.year(), now.month(), None)
            .await
            .unwrap();
        assert_eq!(refreshed.revenue_cents, 20000);
        assert_eq!(refreshed.sale_count, 1);
        assert_eq!(refreshed.inventory_value_cents, 15000);

        let stored = db
            .reports()
            .monthly_summary(now.year(), now.month(), None)
            .await
            .unwrap();
        assert!(stored.is_materialized());
        assert!(stored.branch_id.is_none());
        assert_eq!(stored.revenue_cents, 20000);
        assert_eq!(stored.breakdown, refreshed.breakdown);
    }

    #[test]
    fn test_month_bounds_cover_december() {
        let (start, end) = month_bounds(2025, 12).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-12-01T00:00:00+00:00");
        assert_eq!(end.year(), 2025);
        assert_eq!(end.day(), 31);
        assert!(month_bounds(2025, 0).is_err());
    }
}
