//! # Atomic Sale Processor
//!
//! A sale is one transaction: every line consumes FIFO stock, the sale and
//! its lines are stored, and its journal entry is posted. Any failure
//! (insufficient stock on one line, an unbalanced entry, a lost race)
//! leaves no trace.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ process_sale(new_sale, actor)                                           │
//! │                                                                         │
//! │  validate ──► sale id already stored? ──yes──► stored outcome (replay)  │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  catalog lookups, FIFO candidate scans          (pool, outside tx)      │
//! │     │                                                                   │
//! │     ▼  BEGIN                                                            │
//! │  consume every line ──► InsufficientStock? ──► rollback, nothing moved  │
//! │  unit cost = weighted FIFO cost (rounded), line cost exact              │
//! │  journal = generate(sale, Σ line cost) ──► post() ──► unbalanced? abort │
//! │  flush layers + aggregates, OUT movements, sale row, entry + lines      │
//! │     ▼  COMMIT                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Expenses take the same path without stock. Voiding restocks every line
//! at its captured unit cost and voids the entry with a reversal.

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use stockledger_core::journal::{JournalEntry, JournalGenerator};
use stockledger_core::types::{
    Actor, Branch, CostLayer, MovementType, NewSale, Product, RecordType, SaleLine, SaleRecord,
    SaleStatus,
};
use stockledger_core::validation::{checked_cost, validate_new_sale, validate_reason};
use stockledger_core::{CoreError, Money, ValidationError};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::CatalogCache;
use crate::repository::inventory::{scan_candidates, StockWorkingSet};
use crate::repository::journal;
use crate::repository::movement::{self, StockChange};
use crate::retry::{run_with_retry, RetryPolicy};

const SALE_COLUMNS: &str = "id, record_type, amount_cents, date, description, category, \
     payment_method, branch_id, actor_id, actor_name, status, total_cost_cents, \
     journal_entry_id, created_at, version";

/// A committed sale or expense with its posted journal entry.
#[derive(Debug, Clone, Serialize)]
pub struct SaleOutcome {
    pub sale: SaleRecord,
    pub journal_entry: JournalEntry,
    /// The sale id had already been committed; nothing was consumed again.
    pub replayed: bool,
}

/// A voided sale and the entry reversing its journal.
#[derive(Debug, Clone, Serialize)]
pub struct VoidOutcome {
    pub sale: SaleRecord,
    pub reversal: JournalEntry,
}

async fn fetch_sale(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SaleRecord>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
    let sale = sqlx::query_as::<_, SaleRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match sale {
        Some(mut sale) => {
            sale.items = sqlx::query_as::<_, SaleLine>(
                "SELECT sale_id, line_no, product_id, product_name, branch_id, quantity, \
                 unit_price_cents, unit_cost_cents, line_cost_cents \
                 FROM sale_items WHERE sale_id = ?1 ORDER BY line_no",
            )
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(Some(sale))
        }
        None => Ok(None),
    }
}

async fn insert_sale(conn: &mut SqliteConnection, sale: &SaleRecord) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sales (
            id, record_type, amount_cents, date, description, category, payment_method,
            branch_id, actor_id, actor_name, status, total_cost_cents, journal_entry_id,
            created_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&sale.id)
    .bind(sale.record_type)
    .bind(sale.amount_cents)
    .bind(sale.date)
    .bind(&sale.description)
    .bind(&sale.category)
    .bind(sale.payment_method)
    .bind(&sale.branch_id)
    .bind(&sale.actor_id)
    .bind(&sale.actor_name)
    .bind(sale.status)
    .bind(sale.total_cost_cents)
    .bind(&sale.journal_entry_id)
    .bind(sale.created_at)
    .bind(sale.version)
    .execute(&mut *conn)
    .await?;

    for line in &sale.items {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                sale_id, line_no, product_id, product_name, branch_id, quantity,
                unit_price_cents, unit_cost_cents, line_cost_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&line.sale_id)
        .bind(line.line_no)
        .bind(&line.product_id)
        .bind(&line.product_name)
        .bind(&line.branch_id)
        .bind(line.quantity)
        .bind(line.unit_price_cents)
        .bind(line.unit_cost_cents)
        .bind(line.line_cost_cents)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn new_record(new_sale: &NewSale, actor: &Actor) -> SaleRecord {
    SaleRecord {
        id: new_sale.id.clone(),
        record_type: new_sale.record_type,
        amount_cents: new_sale.amount_cents,
        date: new_sale.date,
        description: new_sale.description.clone(),
        category: new_sale.category.clone(),
        payment_method: new_sale.payment_method,
        branch_id: new_sale.branch_id.clone(),
        actor_id: actor.id.clone(),
        actor_name: actor.name.clone(),
        status: SaleStatus::Completed,
        total_cost_cents: 0,
        journal_entry_id: None,
        items: Vec::new(),
        created_at: Utc::now(),
        version: 1,
    }
}

/// Catalog data looked up before the transaction.
#[derive(Default)]
struct LineCatalog {
    products: HashMap<String, Product>,
    branches: HashMap<String, Branch>,
}

impl LineCatalog {
    fn product(&self, id: &str) -> DbResult<&Product> {
        self.products
            .get(id)
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }

    fn branch(&self, id: &str) -> DbResult<&Branch> {
        self.branches
            .get(id)
            .ok_or_else(|| CoreError::BranchNotFound(id.to_string()).into())
    }
}

#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
    catalog: CatalogCache,
    generator: Arc<JournalGenerator>,
    retry: RetryPolicy,
}

impl SaleRepository {
    pub fn new(
        pool: SqlitePool,
        catalog: CatalogCache,
        generator: Arc<JournalGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        SaleRepository {
            pool,
            catalog,
            generator,
            retry,
        }
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Commits a retail sale: stock, sale record and journal entry together.
    ///
    /// Re-submitting an id that already committed returns the stored outcome
    /// with `replayed` set.
    pub async fn process_sale(&self, new_sale: &NewSale, actor: &Actor) -> DbResult<SaleOutcome> {
        if new_sale.record_type != RecordType::Income {
            return Err(ValidationError::Inconsistent {
                field: "record type".to_string(),
                reason: "expenses are recorded with record_expense".to_string(),
            }
            .into());
        }
        validate_new_sale(new_sale)?;

        if let Some(outcome) = self.replay(&new_sale.id).await? {
            return Ok(outcome);
        }

        let mut catalog = LineCatalog::default();
        catalog.branches.insert(
            new_sale.branch_id.clone(),
            self.catalog.branch(&new_sale.branch_id).await?,
        );
        for line in &new_sale.lines {
            let branch_id = new_sale.line_branch(line);
            if !catalog.branches.contains_key(branch_id) {
                let branch = self.catalog.branch(branch_id).await?;
                catalog.branches.insert(branch_id.to_string(), branch);
            }
            if !catalog.products.contains_key(&line.product_id) {
                let product = self.catalog.product(&line.product_id).await?;
                catalog.products.insert(line.product_id.clone(), product);
            }
        }

        let catalog = &catalog;
        let result = run_with_retry(&self.retry, "process_sale", move || {
            self.try_process(new_sale, catalog, actor)
        })
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            // lost a race against a submission of the same id
            Err(DbError::UniqueViolation { .. }) => self
                .replay(&new_sale.id)
                .await?
                .ok_or_else(|| DbError::Internal(format!("sale {} vanished", new_sale.id)))?,
            Err(err) => return Err(err),
        };

        info!(
            sale_id = %outcome.sale.id,
            branch_id = %outcome.sale.branch_id,
            amount_cents = outcome.sale.amount_cents,
            cost_cents = outcome.sale.total_cost_cents,
            replayed = outcome.replayed,
            "Sale processed"
        );
        Ok(outcome)
    }

    async fn try_process(
        &self,
        new_sale: &NewSale,
        catalog: &LineCatalog,
        actor: &Actor,
    ) -> DbResult<SaleOutcome> {
        let mut scans: HashMap<(String, String), Vec<CostLayer>> = HashMap::new();
        for line in &new_sale.lines {
            let key = (
                line.product_id.clone(),
                new_sale.line_branch(line).to_string(),
            );
            if !scans.contains_key(&key) {
                let scanned = scan_candidates(&self.pool, &key.0, &key.1).await?;
                scans.insert(key, scanned);
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut set = StockWorkingSet::new();
        for ((product_id, branch_id), scanned) in &scans {
            set.load_for_consumption(&mut *tx, product_id, branch_id, scanned)
                .await?;
        }

        let mut sale = new_record(new_sale, actor);
        let mut changes = Vec::with_capacity(new_sale.lines.len());
        let mut total_cost = Money::zero();
        for (idx, line) in new_sale.lines.iter().enumerate() {
            let branch_id = new_sale.line_branch(line);
            let product = catalog.product(&line.product_id)?;
            let consumed = set.consume(&line.product_id, branch_id, line.quantity)?;

            total_cost = checked_cost(total_cost, consumed.plan.total_cost())?;
            sale.items.push(SaleLine {
                sale_id: sale.id.clone(),
                line_no: idx as i64 + 1,
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                branch_id: branch_id.to_string(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                unit_cost_cents: consumed.plan.weighted_unit_cost().cents(),
                line_cost_cents: consumed.plan.total_cost_cents,
            });
            changes.push(StockChange {
                product,
                branch: catalog.branch(branch_id)?,
                movement_type: MovementType::Out,
                quantity: -line.quantity,
                previous_stock: consumed.previous_stock,
                new_stock: consumed.new_stock,
            });
        }
        sale.total_cost_cents = total_cost.cents();

        let entry = self.post_entry(&sale, total_cost, actor)?;
        sale.journal_entry_id = Some(entry.id.clone());

        set.flush(&mut *tx).await?;
        let reason = format!("Sale {}", sale.id);
        for change in changes {
            let record = change.into_record(&reason, Some(&sale.id), actor);
            movement::append(&mut *tx, record).await?;
        }
        insert_sale(&mut *tx, &sale).await?;
        journal::insert_entry(&mut *tx, &entry).await?;
        tx.commit().await?;

        Ok(SaleOutcome {
            sale,
            journal_entry: entry,
            replayed: false,
        })
    }

    /// Generates and validates the entry for a record about to be stored.
    fn post_entry(
        &self,
        sale: &SaleRecord,
        total_cost: Money,
        actor: &Actor,
    ) -> DbResult<JournalEntry> {
        let entry = self
            .generator
            .generate_for(sale, total_cost, actor)?
            .post()
            .inspect_err(|e| {
                if e.is_integrity_fault() {
                    error!(
                        sale_id = %sale.id,
                        error = %e,
                        "Refusing to post unbalanced journal entry"
                    );
                }
            })?;
        Ok(entry)
    }

    async fn replay(&self, id: &str) -> DbResult<Option<SaleOutcome>> {
        let mut conn = self.pool.acquire().await?;
        let Some(sale) = fetch_sale(&mut *conn, id).await? else {
            return Ok(None);
        };

        let entry_id = sale
            .journal_entry_id
            .clone()
            .ok_or_else(|| DbError::Internal(format!("sale {} has no journal entry", id)))?;
        let journal_entry = journal::fetch_entry(&mut *conn, &entry_id)
            .await?
            .ok_or_else(|| CoreError::JournalEntryNotFound(entry_id.clone()))?;

        warn!(sale_id = %id, "Sale id already committed, returning stored outcome");
        Ok(Some(SaleOutcome {
            sale,
            journal_entry,
            replayed: true,
        }))
    }

    // =========================================================================
    // Expenses
    // =========================================================================

    /// Records a non-inventory expense: debit the expense account named by
    /// the category (General Expense otherwise), credit Cash.
    pub async fn record_expense(&self, expense: &NewSale, actor: &Actor) -> DbResult<SaleOutcome> {
        if expense.record_type != RecordType::Expense {
            return Err(ValidationError::Inconsistent {
                field: "record type".to_string(),
                reason: "sales are recorded with process_sale".to_string(),
            }
            .into());
        }
        validate_new_sale(expense)?;

        if let Some(outcome) = self.replay(&expense.id).await? {
            return Ok(outcome);
        }
        self.catalog.branch(&expense.branch_id).await?;

        let result = run_with_retry(&self.retry, "record_expense", move || async move {
            let mut sale = new_record(expense, actor);
            let entry = self.post_entry(&sale, Money::zero(), actor)?;
            sale.journal_entry_id = Some(entry.id.clone());

            let mut tx = self.pool.begin().await?;
            insert_sale(&mut *tx, &sale).await?;
            journal::insert_entry(&mut *tx, &entry).await?;
            tx.commit().await?;

            Ok(SaleOutcome {
                sale,
                journal_entry: entry,
                replayed: false,
            })
        })
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(DbError::UniqueViolation { .. }) => self
                .replay(&expense.id)
                .await?
                .ok_or_else(|| DbError::Internal(format!("expense {} vanished", expense.id)))?,
            Err(err) => return Err(err),
        };

        let account = outcome
            .journal_entry
            .lines
            .first()
            .map(|l| l.account_code.as_str())
            .unwrap_or("");
        info!(
            expense_id = %outcome.sale.id,
            amount_cents = outcome.sale.amount_cents,
            account,
            "Expense recorded"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Void
    // =========================================================================

    /// COMPLETED → VOIDED. Every line goes back into stock as a new layer at
    /// its captured unit cost, and the journal entry is voided and reversed.
    pub async fn void_sale(&self, id: &str, actor: &Actor, reason: &str) -> DbResult<VoidOutcome> {
        validate_reason(reason)?;

        let snapshot = self
            .get(id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(id.to_string()))?;
        if snapshot.status != SaleStatus::Completed {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: id.to_string(),
                current_status: snapshot.status.as_str().to_string(),
            }
            .into());
        }

        let mut catalog = LineCatalog::default();
        for line in &snapshot.items {
            if !catalog.branches.contains_key(&line.branch_id) {
                let branch = self.catalog.branch(&line.branch_id).await?;
                catalog.branches.insert(line.branch_id.clone(), branch);
            }
            if !catalog.products.contains_key(&line.product_id) {
                let product = self.catalog.product(&line.product_id).await?;
                catalog.products.insert(line.product_id.clone(), product);
            }
        }

        let catalog = &catalog;
        let outcome = run_with_retry(&self.retry, "void_sale", move || {
            self.try_void(id, catalog, actor, reason)
        })
        .await?;

        info!(sale_id = %id, reversal_id = %outcome.reversal.id, "Sale voided");
        Ok(outcome)
    }

    async fn try_void(
        &self,
        id: &str,
        catalog: &LineCatalog,
        actor: &Actor,
        reason: &str,
    ) -> DbResult<VoidOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut sale = fetch_sale(&mut *tx, id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(id.to_string()))?;
        if sale.status != SaleStatus::Completed {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: id.to_string(),
                current_status: sale.status.as_str().to_string(),
            }
            .into());
        }

        let mut set = StockWorkingSet::new();
        let mut changes = Vec::with_capacity(sale.items.len());
        for line in &sale.items {
            set.load_aggregate(&mut *tx, &line.product_id, &line.branch_id)
                .await?;
            let received = set.receive(
                &line.product_id,
                &line.branch_id,
                line.quantity,
                line.unit_cost_cents,
                &actor.id,
                Some(id),
            )?;
            changes.push(StockChange {
                product: catalog.product(&line.product_id)?,
                branch: catalog.branch(&line.branch_id)?,
                movement_type: MovementType::Return,
                quantity: line.quantity,
                previous_stock: received.previous_stock,
                new_stock: received.new_stock,
            });
        }
        set.flush(&mut *tx).await?;

        let movement_reason = format!("Void of sale {}: {}", id, reason);
        for change in changes {
            movement::append(&mut *tx, change.into_record(&movement_reason, Some(id), actor))
                .await?;
        }

        let entry_id = sale
            .journal_entry_id
            .clone()
            .ok_or_else(|| DbError::Internal(format!("sale {} has no journal entry", id)))?;
        let original = journal::fetch_entry(&mut *tx, &entry_id)
            .await?
            .ok_or_else(|| CoreError::JournalEntryNotFound(entry_id.clone()))?;
        let reversal =
            journal::void_in_tx(&mut *tx, &self.generator, &original, actor, reason).await?;

        let result = sqlx::query(
            "UPDATE sales SET status = ?1, version = version + 1 \
             WHERE id = ?2 AND version = ?3 AND status = ?4",
        )
        .bind(SaleStatus::Voided)
        .bind(id)
        .bind(sale.version)
        .bind(SaleStatus::Completed)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!("sale {}", id)));
        }
        tx.commit().await?;

        sale.status = SaleStatus::Voided;
        sale.version += 1;
        Ok(VoidOutcome { sale, reversal })
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<SaleRecord>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale(&mut *conn, id).await
    }
}
