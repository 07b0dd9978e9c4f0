//! # Stock Transfer Coordinator
//!
//! Moves stock between branches in two phases. Cost travels with the goods:
//! the weighted average of the origin layers consumed at dispatch becomes the
//! cost of the single new layer created where the goods end up.
//!
//! ## Lifecycle
//! ```text
//!  initiate ─────────────────────────────────────────────────────────────┐
//!    origin: FIFO consume per item, OUT movement (correlation = id)      │
//!    capture unit_cost = Σ slice cost / qty, rounded                     │
//!    status PENDING                                                      │
//!                                                                        ▼
//!  complete (receiver)   target: new layer @ unit_cost, IN  ──► COMPLETED
//!  reject   (receiver)   origin: new layer @ unit_cost, IN  ──► REJECTED
//!  cancel   (sender)     origin: new layer @ unit_cost, IN  ──► CANCELLED
//! ```
//!
//! Only a PENDING transfer can be settled; the status flip is a
//! version-checked update inside the same transaction as the stock credit,
//! so two racing settlements cannot both credit stock.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use stockledger_core::fifo::LayerSlice;
use stockledger_core::types::{
    Actor, Branch, MovementType, NewTransferItem, Page, Product, StockTransfer, TransferFilter,
    TransferItem, TransferStatus,
};
use stockledger_core::validation::{
    clamp_page_size, parse_cursor, validate_note, validate_reason, validate_transfer_items,
};
use stockledger_core::CoreError;

use crate::error::{DbError, DbResult};
use crate::repository::catalog::CatalogCache;
use crate::repository::inventory::{scan_candidates, StockWorkingSet};
use crate::repository::movement::{self, StockChange};
use crate::repository::page_from_rows;
use crate::retry::{run_with_retry, RetryPolicy};

const TRANSFER_COLUMNS: &str = "seq, id, origin_branch_id, target_branch_id, status, sent_by, \
     sent_at, received_by, received_at, note, resolution_note, version";

#[derive(Debug, sqlx::FromRow)]
struct TransferItemRow {
    product_id: String,
    product_name: String,
    quantity: i64,
    unit_cost_cents: i64,
    source_layers: String,
}

impl TransferItemRow {
    fn into_item(self) -> DbResult<TransferItem> {
        let source_layers: Vec<LayerSlice> = serde_json::from_str(&self.source_layers)?;
        Ok(TransferItem {
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            unit_cost_cents: self.unit_cost_cents,
            source_layers,
        })
    }
}

fn invalid_state(transfer_id: &str, reason: impl Into<String>) -> DbError {
    CoreError::InvalidTransferState {
        transfer_id: transfer_id.to_string(),
        reason: reason.into(),
    }
    .into()
}

async fn fetch_items(
    conn: &mut SqliteConnection,
    transfer_id: &str,
) -> DbResult<Vec<TransferItem>> {
    let rows = sqlx::query_as::<_, TransferItemRow>(
        "SELECT product_id, product_name, quantity, unit_cost_cents, source_layers \
         FROM stock_transfer_items WHERE transfer_id = ?1 ORDER BY line_no",
    )
    .bind(transfer_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(TransferItemRow::into_item).collect()
}

async fn fetch_transfer(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<StockTransfer>> {
    let sql = format!("SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE id = ?1");
    let transfer = sqlx::query_as::<_, StockTransfer>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match transfer {
        Some(mut transfer) => {
            transfer.items = fetch_items(conn, &transfer.id).await?;
            Ok(Some(transfer))
        }
        None => Ok(None),
    }
}

/// Catalog data a transfer phase needs before its transaction opens.
struct Parties {
    origin: Branch,
    target: Branch,
    products: HashMap<String, Product>,
}

impl Parties {
    fn product(&self, id: &str) -> DbResult<&Product> {
        self.products
            .get(id)
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()).into())
    }
}

#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
    catalog: CatalogCache,
    retry: RetryPolicy,
    max_page_size: u32,
}

impl TransferRepository {
    pub fn new(
        pool: SqlitePool,
        catalog: CatalogCache,
        retry: RetryPolicy,
        max_page_size: u32,
    ) -> Self {
        TransferRepository {
            pool,
            catalog,
            retry,
            max_page_size,
        }
    }

    // =========================================================================
    // Phase 1
    // =========================================================================

    /// Dispatches stock from `origin_branch_id`. The goods leave the origin
    /// now and sit in transit until the transfer is settled.
    pub async fn initiate_transfer(
        &self,
        origin_branch_id: &str,
        target_branch_id: &str,
        items: &[NewTransferItem],
        note: Option<&str>,
        actor: &Actor,
    ) -> DbResult<StockTransfer> {
        validate_transfer_items(items)?;
        validate_note(note)?;

        let transfer_id = Uuid::new_v4().to_string();
        if origin_branch_id == target_branch_id {
            return Err(invalid_state(&transfer_id, "origin and target are the same branch"));
        }

        let origin = self.active_branch(&transfer_id, origin_branch_id).await?;
        let target = self.active_branch(&transfer_id, target_branch_id).await?;
        let mut products = HashMap::new();
        for item in items {
            if !products.contains_key(&item.product_id) {
                let product = self.catalog.product(&item.product_id).await?;
                products.insert(item.product_id.clone(), product);
            }
        }
        let parties = Parties {
            origin,
            target,
            products,
        };

        let transfer_id = transfer_id.as_str();
        let parties = &parties;
        let transfer = run_with_retry(&self.retry, "initiate_transfer", move || {
            self.try_initiate(transfer_id, parties, items, note, actor)
        })
        .await?;

        info!(
            transfer_id = %transfer.id,
            origin = %origin_branch_id,
            target = %target_branch_id,
            items = transfer.items.len(),
            "Transfer initiated"
        );
        Ok(transfer)
    }

    async fn active_branch(&self, transfer_id: &str, branch_id: &str) -> DbResult<Branch> {
        match self.catalog.branch(branch_id).await {
            Ok(branch) if branch.is_active => Ok(branch),
            Ok(_) => Err(invalid_state(
                transfer_id,
                format!("branch {} is not active", branch_id),
            )),
            Err(DbError::Domain(CoreError::BranchNotFound(_))) => Err(invalid_state(
                transfer_id,
                format!("branch {} does not exist", branch_id),
            )),
            Err(other) => Err(other),
        }
    }

    async fn try_initiate(
        &self,
        transfer_id: &str,
        parties: &Parties,
        items: &[NewTransferItem],
        note: Option<&str>,
        actor: &Actor,
    ) -> DbResult<StockTransfer> {
        let origin_id = parties.origin.id.as_str();

        let mut scans = HashMap::new();
        for item in items {
            if !scans.contains_key(&item.product_id) {
                let scanned = scan_candidates(&self.pool, &item.product_id, origin_id).await?;
                scans.insert(item.product_id.clone(), scanned);
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut set = StockWorkingSet::new();
        for (product_id, scanned) in &scans {
            set.load_for_consumption(&mut *tx, product_id, origin_id, scanned)
                .await?;
        }

        let mut captured = Vec::with_capacity(items.len());
        let mut changes = Vec::with_capacity(items.len());
        for item in items {
            let product = parties.product(&item.product_id)?;
            let consumed = set.consume(&item.product_id, origin_id, item.quantity)?;

            captured.push(TransferItem {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                quantity: item.quantity,
                unit_cost_cents: consumed.plan.weighted_unit_cost().cents(),
                source_layers: consumed.plan.slices.clone(),
            });
            changes.push(StockChange {
                product,
                branch: &parties.origin,
                movement_type: MovementType::Out,
                quantity: -item.quantity,
                previous_stock: consumed.previous_stock,
                new_stock: consumed.new_stock,
            });
        }
        set.flush(&mut *tx).await?;

        let transfer = StockTransfer {
            id: transfer_id.to_string(),
            origin_branch_id: origin_id.to_string(),
            target_branch_id: parties.target.id.clone(),
            status: TransferStatus::Pending,
            items: captured,
            sent_by: actor.id.clone(),
            sent_at: Utc::now(),
            received_by: None,
            received_at: None,
            note: note.map(str::to_string),
            resolution_note: None,
            version: 1,
        };
        insert_transfer(&mut *tx, &transfer).await?;

        let reason = format!("Transfer to {}", parties.target.name);
        for change in changes {
            movement::append(
                &mut *tx,
                change.into_record(&reason, Some(transfer_id), actor),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(transfer)
    }

    // =========================================================================
    // Phase 2
    // =========================================================================

    /// Receiver accepts: the goods land at the target at the captured cost.
    pub async fn complete_transfer(&self, id: &str, actor: &Actor) -> DbResult<StockTransfer> {
        self.settle(id, actor, TransferStatus::Completed, None).await
    }

    /// Receiver refuses: the goods go back to the origin.
    pub async fn reject_transfer(
        &self,
        id: &str,
        actor: &Actor,
        reason: &str,
    ) -> DbResult<StockTransfer> {
        validate_reason(reason)?;
        self.settle(id, actor, TransferStatus::Rejected, Some(reason))
            .await
    }

    /// Sender withdraws: the goods go back to the origin.
    pub async fn cancel_transfer(
        &self,
        id: &str,
        actor: &Actor,
        reason: &str,
    ) -> DbResult<StockTransfer> {
        validate_reason(reason)?;
        self.settle(id, actor, TransferStatus::Cancelled, Some(reason))
            .await
    }

    async fn settle(
        &self,
        id: &str,
        actor: &Actor,
        outcome: TransferStatus,
        resolution_note: Option<&str>,
    ) -> DbResult<StockTransfer> {
        // display data only; status is re-checked inside the transaction
        let snapshot = self
            .get(id)
            .await?
            .ok_or_else(|| CoreError::TransferNotFound(id.to_string()))?;
        if snapshot.status != TransferStatus::Pending {
            return Err(invalid_state(
                id,
                format!("transfer is {}", snapshot.status.as_str()),
            ));
        }

        let mut products = HashMap::new();
        for item in &snapshot.items {
            if !products.contains_key(&item.product_id) {
                let product = self.catalog.product(&item.product_id).await?;
                products.insert(item.product_id.clone(), product);
            }
        }
        let parties = Parties {
            origin: self.catalog.branch(&snapshot.origin_branch_id).await?,
            target: self.catalog.branch(&snapshot.target_branch_id).await?,
            products,
        };

        let parties = &parties;
        let transfer = run_with_retry(&self.retry, "settle_transfer", move || {
            self.try_settle(id, parties, outcome, resolution_note, actor)
        })
        .await?;

        info!(
            transfer_id = %id,
            status = transfer.status.as_str(),
            actor = %actor.id,
            "Transfer settled"
        );
        Ok(transfer)
    }

    async fn try_settle(
        &self,
        id: &str,
        parties: &Parties,
        outcome: TransferStatus,
        resolution_note: Option<&str>,
        actor: &Actor,
    ) -> DbResult<StockTransfer> {
        let mut tx = self.pool.begin().await?;
        let mut transfer = fetch_transfer(&mut *tx, id)
            .await?
            .ok_or_else(|| CoreError::TransferNotFound(id.to_string()))?;
        if transfer.status != TransferStatus::Pending {
            debug!(
                transfer_id = %id,
                status = transfer.status.as_str(),
                "Transfer already settled"
            );
            return Err(invalid_state(
                id,
                format!("transfer is {}", transfer.status.as_str()),
            ));
        }

        let (destination, reason) = match outcome {
            TransferStatus::Completed => (
                &parties.target,
                format!("Transfer from {}", parties.origin.name),
            ),
            TransferStatus::Rejected => (
                &parties.origin,
                format!("Transfer rejected by {}", parties.target.name),
            ),
            TransferStatus::Cancelled => (
                &parties.origin,
                format!("Transfer to {} cancelled", parties.target.name),
            ),
            TransferStatus::Pending => {
                return Err(DbError::Internal("cannot settle into PENDING".into()))
            }
        };

        let mut set = StockWorkingSet::new();
        let mut changes = Vec::with_capacity(transfer.items.len());
        for item in &transfer.items {
            set.load_aggregate(&mut *tx, &item.product_id, &destination.id)
                .await?;
            let received = set.receive(
                &item.product_id,
                &destination.id,
                item.quantity,
                item.unit_cost_cents,
                &actor.id,
                Some(id),
            )?;
            changes.push(StockChange {
                product: parties.product(&item.product_id)?,
                branch: destination,
                movement_type: MovementType::In,
                quantity: item.quantity,
                previous_stock: received.previous_stock,
                new_stock: received.new_stock,
            });
        }
        set.flush(&mut *tx).await?;

        for change in changes {
            movement::append(&mut *tx, change.into_record(&reason, Some(id), actor)).await?;
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE stock_transfers SET status = ?1, received_by = ?2, received_at = ?3, \
             resolution_note = ?4, version = version + 1 \
             WHERE id = ?5 AND version = ?6 AND status = ?7",
        )
        .bind(outcome)
        .bind(&actor.id)
        .bind(now)
        .bind(resolution_note)
        .bind(id)
        .bind(transfer.version)
        .bind(TransferStatus::Pending)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::conflict(format!("stock transfer {}", id)));
        }

        tx.commit().await?;

        transfer.status = outcome;
        transfer.received_by = Some(actor.id.clone());
        transfer.received_at = Some(now);
        transfer.resolution_note = resolution_note.map(str::to_string);
        transfer.version += 1;
        Ok(transfer)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: &str) -> DbResult<Option<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;
        fetch_transfer(&mut *conn, id).await
    }

    /// Newest-first page of transfers touching a branch and/or in a status.
    pub async fn list(
        &self,
        filter: &TransferFilter,
        limit: u32,
        cursor: Option<&str>,
    ) -> DbResult<Page<StockTransfer>> {
        let limit = clamp_page_size(limit, self.max_page_size);
        let cursor = parse_cursor(cursor)?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE 1 = 1"
        ));
        if let Some(branch_id) = &filter.branch_id {
            qb.push(" AND (origin_branch_id = ")
                .push_bind(branch_id.clone())
                .push(" OR target_branch_id = ")
                .push_bind(branch_id.clone())
                .push(")");
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(seq) = cursor {
            qb.push(" AND seq < ").push_bind(seq);
        }
        qb.push(" ORDER BY seq DESC LIMIT ")
            .push_bind(i64::from(limit) + 1);

        let mut conn = self.pool.acquire().await?;
        let rows = qb.build().fetch_all(&mut *conn).await?;
        let mut page: Page<StockTransfer> = page_from_rows(rows, limit)?;
        for transfer in &mut page.items {
            transfer.items = fetch_items(&mut *conn, &transfer.id).await?;
        }
        Ok(page)
    }
}

async fn insert_transfer(conn: &mut SqliteConnection, transfer: &StockTransfer) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_transfers (
            id, origin_branch_id, target_branch_id, status, sent_by, sent_at,
            received_by, received_at, note, resolution_note, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&transfer.id)
    .bind(&transfer.origin_branch_id)
    .bind(&transfer.target_branch_id)
    .bind(transfer.status)
    .bind(&transfer.sent_by)
    .bind(transfer.sent_at)
    .bind(&transfer.received_by)
    .bind(transfer.received_at)
    .bind(&transfer.note)
    .bind(&transfer.resolution_note)
    .bind(transfer.version)
    .execute(&mut *conn)
    .await?;

    for (line_no, item) in transfer.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO stock_transfer_items (
                transfer_id, line_no, product_id, product_name, quantity,
                unit_cost_cents, source_layers
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&transfer.id)
        .bind(line_no as i64 + 1)
        .bind(&item.product_id)
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_cost_cents)
        .bind(serde_json::to_string(&item.source_layers)?)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}
