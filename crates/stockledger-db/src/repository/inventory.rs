//! # Cost-Layer Store
//!
//! Sole writer of `aggregate_stock` and `cost_layers`.
//!
//! ## Invariant
//! ```text
//!  aggregate_stock(p, b).stock  ==  Σ cost_layers(p, b).remaining_stock
//! ```
//! Every operation that touches one side touches the other in the same
//! transaction, through a [`StockWorkingSet`].
//!
//! ## Query-then-lock
//! ```text
//!  pool ─► scan_candidates(p, b)            remaining > 0, FIFO order
//!              │  (not transactional)
//!              ▼
//!  tx  ─► load_for_consumption              re-read each layer by id
//!              │                            version differs ─► WriteConflict
//!              │                            Σ scanned ≠ aggregate ─► WriteConflict
//!              ▼
//!         consume / receive (in memory)
//!              ▼
//!         flush                             UPDATE ... AND version = ?
//! ```

use chrono::Utc;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use stockledger_core::fifo::{self, ConsumptionPlan};
use stockledger_core::types::{
    Actor, AggregateStock, Branch, CostLayer, MovementRecord, MovementType, Product,
};
use stockledger_core::validation::{
    checked_stock, clamp_page_size, validate_quantity, validate_reason, validate_unit_cost,
};
use stockledger_core::ValidationError;

use crate::error::{DbError, DbResult};
use crate::repository::catalog::CatalogCache;
use crate::repository::movement::{self, StockChange};
use crate::retry::{run_with_retry, RetryPolicy};

pub(crate) const LAYER_COLUMNS: &str = "id, product_id, branch_id, cost_cents, initial_stock, \
     remaining_stock, received_by, correlation_id, version, created_at";
pub(crate) const AGGREGATE_COLUMNS: &str =
    "id, product_id, branch_id, stock, low_stock_threshold, version, updated_at";

// =============================================================================
// Reads
// =============================================================================

/// Non-transactional FIFO candidate scan.
pub(crate) async fn scan_candidates(
    pool: &SqlitePool,
    product_id: &str,
    branch_id: &str,
) -> DbResult<Vec<CostLayer>> {
    let sql = format!(
        "SELECT {LAYER_COLUMNS} FROM cost_layers \
         WHERE product_id = ?1 AND branch_id = ?2 AND remaining_stock > 0 \
         ORDER BY created_at, seq"
    );
    let layers = sqlx::query_as::<_, CostLayer>(&sql)
        .bind(product_id)
        .bind(branch_id)
        .fetch_all(pool)
        .await?;
    Ok(layers)
}

async fn fetch_layer(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CostLayer>> {
    let sql = format!("SELECT {LAYER_COLUMNS} FROM cost_layers WHERE id = ?1");
    let layer = sqlx::query_as::<_, CostLayer>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(layer)
}

async fn fetch_aggregate(
    conn: &mut SqliteConnection,
    key: &str,
) -> DbResult<Option<AggregateStock>> {
    let sql = format!("SELECT {AGGREGATE_COLUMNS} FROM aggregate_stock WHERE id = ?1");
    let aggregate = sqlx::query_as::<_, AggregateStock>(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(aggregate)
}

fn empty_aggregate(product_id: &str, branch_id: &str) -> AggregateStock {
    AggregateStock {
        id: AggregateStock::key(product_id, branch_id),
        product_id: product_id.to_string(),
        branch_id: branch_id.to_string(),
        stock: 0,
        low_stock_threshold: 0,
        version: 1,
        updated_at: Utc::now(),
    }
}

// =============================================================================
// Working Set
// =============================================================================

#[derive(Debug)]
struct StockSlot {
    aggregate: AggregateStock,
    /// Row exists; otherwise it is inserted on flush.
    persisted: bool,
    dirty: bool,
    /// Candidate layers re-read in this transaction, FIFO order. Only
    /// present when the slot was loaded for consumption.
    layers: Option<Vec<CostLayer>>,
    touched: HashSet<String>,
}

/// Result of a FIFO stock-out inside a working set.
#[derive(Debug, Clone)]
pub(crate) struct Consumed {
    pub plan: ConsumptionPlan,
    pub previous_stock: i64,
    pub new_stock: i64,
}

/// Result of an intake inside a working set.
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub layer: CostLayer,
    pub previous_stock: i64,
    pub new_stock: i64,
}

/// Aggregates and layers read inside one transaction, mutated in memory
/// and written back with version checks.
#[derive(Debug, Default)]
pub(crate) struct StockWorkingSet {
    slots: HashMap<String, StockSlot>,
    new_layers: Vec<CostLayer>,
}

impl StockWorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-reads the scanned candidates and the aggregate for one key.
    ///
    /// Fails with `WriteConflict` when a candidate changed or vanished since
    /// the scan, or when the candidates no longer add up to the aggregate
    /// (a layer was created or drained after the scan).
    pub async fn load_for_consumption(
        &mut self,
        conn: &mut SqliteConnection,
        product_id: &str,
        branch_id: &str,
        scanned: &[CostLayer],
    ) -> DbResult<()> {
        let key = AggregateStock::key(product_id, branch_id);
        if let Some(slot) = self.slots.get(&key) {
            if slot.layers.is_some() {
                return Ok(());
            }
            return Err(DbError::Internal(format!(
                "{} loaded for intake before consumption",
                key
            )));
        }

        let mut layers = Vec::with_capacity(scanned.len());
        for candidate in scanned {
            match fetch_layer(conn, &candidate.id).await? {
                Some(layer) if layer.version == candidate.version => layers.push(layer),
                _ => {
                    return Err(DbError::conflict(format!(
                        "cost layer {} changed since scan",
                        candidate.id
                    )))
                }
            }
        }

        let (aggregate, persisted) = match fetch_aggregate(conn, &key).await? {
            Some(aggregate) => (aggregate, true),
            None => (empty_aggregate(product_id, branch_id), false),
        };

        let scanned_total: i64 = layers.iter().map(|l| l.remaining_stock).sum();
        if scanned_total != aggregate.stock {
            debug!(
                key = %key,
                aggregate = aggregate.stock,
                scanned = scanned_total,
                "Candidate scan is stale"
            );
            return Err(DbError::conflict(format!(
                "layer scan for {} is stale ({} scanned, {} aggregate)",
                key, scanned_total, aggregate.stock
            )));
        }

        self.slots.insert(
            key,
            StockSlot {
                aggregate,
                persisted,
                dirty: false,
                layers: Some(layers),
                touched: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Loads (or starts) the aggregate for a key that only receives stock.
    pub async fn load_aggregate(
        &mut self,
        conn: &mut SqliteConnection,
        product_id: &str,
        branch_id: &str,
    ) -> DbResult<()> {
        let key = AggregateStock::key(product_id, branch_id);
        if self.slots.contains_key(&key) {
            return Ok(());
        }

        let (aggregate, persisted) = match fetch_aggregate(conn, &key).await? {
            Some(aggregate) => (aggregate, true),
            None => (empty_aggregate(product_id, branch_id), false),
        };
        self.slots.insert(
            key,
            StockSlot {
                aggregate,
                persisted,
                dirty: false,
                layers: None,
                touched: HashSet::new(),
            },
        );
        Ok(())
    }

    /// FIFO stock-out against the loaded layers. Nothing changes when the
    /// layers cannot cover `quantity`.
    pub fn consume(
        &mut self,
        product_id: &str,
        branch_id: &str,
        quantity: i64,
    ) -> DbResult<Consumed> {
        let key = AggregateStock::key(product_id, branch_id);
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or_else(|| DbError::Internal(format!("{} not loaded", key)))?;
        let layers = slot
            .layers
            .as_mut()
            .ok_or_else(|| DbError::Internal(format!("{} not loaded for consumption", key)))?;

        let plan = fifo::plan_consumption(product_id, branch_id, layers, quantity)?;
        slot.touched.extend(fifo::apply_plan(layers, &plan));

        let previous_stock = slot.aggregate.stock;
        slot.aggregate.stock -= quantity;
        slot.dirty = true;

        Ok(Consumed {
            plan,
            previous_stock,
            new_stock: slot.aggregate.stock,
        })
    }

    /// Intake as a brand-new layer at `unit_cost_cents`.
    pub fn receive(
        &mut self,
        product_id: &str,
        branch_id: &str,
        quantity: i64,
        unit_cost_cents: i64,
        received_by: &str,
        correlation_id: Option<&str>,
    ) -> DbResult<Received> {
        validate_quantity(quantity)?;
        validate_unit_cost(unit_cost_cents)?;

        let key = AggregateStock::key(product_id, branch_id);
        let slot = self
            .slots
            .get_mut(&key)
            .ok_or_else(|| DbError::Internal(format!("{} not loaded", key)))?;

        let new_stock = checked_stock(slot.aggregate.stock, quantity)?;
        let layer = CostLayer {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            branch_id: branch_id.to_string(),
            cost_cents: unit_cost_cents,
            initial_stock: quantity,
            remaining_stock: quantity,
            received_by: received_by.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            version: 1,
            created_at: Utc::now(),
        };

        let previous_stock = slot.aggregate.stock;
        slot.aggregate.stock = new_stock;
        slot.dirty = true;
        self.new_layers.push(layer.clone());

        Ok(Received {
            layer,
            previous_stock,
            new_stock: slot.aggregate.stock,
        })
    }

    pub fn aggregate(&self, product_id: &str, branch_id: &str) -> Option<&AggregateStock> {
        self.slots
            .get(&AggregateStock::key(product_id, branch_id))
            .map(|slot| &slot.aggregate)
    }

    /// Writes every change back. Any version mismatch aborts with
    /// `WriteConflict`; the caller drops the transaction.
    pub async fn flush(&mut self, conn: &mut SqliteConnection) -> DbResult<()> {
        let now = Utc::now();

        for slot in self.slots.values_mut() {
            if let Some(layers) = slot.layers.as_mut() {
                for layer in layers.iter_mut().filter(|l| slot.touched.contains(&l.id)) {
                    let result = sqlx::query(
                        "UPDATE cost_layers SET remaining_stock = ?1, version = version + 1 \
                         WHERE id = ?2 AND version = ?3",
                    )
                    .bind(layer.remaining_stock)
                    .bind(&layer.id)
                    .bind(layer.version)
                    .execute(&mut *conn)
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::conflict(format!("cost layer {}", layer.id)));
                    }
                    layer.version += 1;
                }
                slot.touched.clear();
            }

            if !slot.dirty {
                continue;
            }
            let aggregate = &mut slot.aggregate;
            aggregate.updated_at = now;

            if slot.persisted {
                let result = sqlx::query(
                    "UPDATE aggregate_stock SET stock = ?1, version = version + 1, updated_at = ?2 \
                     WHERE id = ?3 AND version = ?4",
                )
                .bind(aggregate.stock)
                .bind(aggregate.updated_at)
                .bind(&aggregate.id)
                .bind(aggregate.version)
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(DbError::conflict(format!("aggregate stock {}", aggregate.id)));
                }
                aggregate.version += 1;
            } else {
                sqlx::query(
                    "INSERT INTO aggregate_stock \
                     (id, product_id, branch_id, stock, low_stock_threshold, version, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .bind(&aggregate.id)
                .bind(&aggregate.product_id)
                .bind(&aggregate.branch_id)
                .bind(aggregate.stock)
                .bind(aggregate.low_stock_threshold)
                .bind(aggregate.version)
                .bind(aggregate.updated_at)
                .execute(&mut *conn)
                .await
                .map_err(|e| match DbError::from(e) {
                    // someone else created the row first
                    DbError::UniqueViolation { .. } => {
                        DbError::conflict(format!("aggregate stock {}", aggregate.id))
                    }
                    other => other,
                })?;
                slot.persisted = true;
            }
            slot.dirty = false;
        }

        for layer in self.new_layers.drain(..) {
            sqlx::query(
                "INSERT INTO cost_layers \
                 (id, product_id, branch_id, cost_cents, initial_stock, remaining_stock, \
                  received_by, correlation_id, version, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .bind(&layer.id)
            .bind(&layer.product_id)
            .bind(&layer.branch_id)
            .bind(layer.cost_cents)
            .bind(layer.initial_stock)
            .bind(layer.remaining_stock)
            .bind(&layer.received_by)
            .bind(&layer.correlation_id)
            .bind(layer.version)
            .bind(layer.created_at)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }
}

// =============================================================================
// Repository
// =============================================================================

/// What a single stock operation did.
#[derive(Debug, Clone, Serialize)]
pub struct StockChangeOutcome {
    pub aggregate: AggregateStock,
    pub movement: MovementRecord,
    /// Layers drawn from, for stock-outs.
    pub plan: Option<ConsumptionPlan>,
    /// Layer created, for intakes.
    pub layer: Option<CostLayer>,
}

/// An aggregate whose stock does not match its layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StockDiscrepancy {
    pub product_id: String,
    pub branch_id: String,
    pub aggregate_stock: i64,
    pub layer_total: i64,
}

#[derive(Debug, Clone, Copy)]
struct StockRequest<'a> {
    product: &'a Product,
    branch: &'a Branch,
    quantity: i64,
    reason: &'a str,
    actor: &'a Actor,
}

#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
    catalog: CatalogCache,
    retry: RetryPolicy,
}

impl InventoryRepository {
    pub fn new(pool: SqlitePool, catalog: CatalogCache, retry: RetryPolicy) -> Self {
        InventoryRepository {
            pool,
            catalog,
            retry,
        }
    }

    /// Intake: a new layer of `quantity` at `unit_cost_cents`, logged IN.
    pub async fn add_stock(
        &self,
        product_id: &str,
        branch_id: &str,
        quantity: i64,
        unit_cost_cents: i64,
        reason: &str,
        actor: &Actor,
    ) -> DbResult<StockChangeOutcome> {
        validate_quantity(quantity)?;
        validate_unit_cost(unit_cost_cents)?;
        validate_reason(reason)?;

        let product = self.catalog.product(product_id).await?;
        let branch = self.catalog.branch(branch_id).await?;
        let request = StockRequest {
            product: &product,
            branch: &branch,
            quantity,
            reason,
            actor,
        };

        let outcome = run_with_retry(&self.retry, "add_stock", move || {
            self.try_receive(request, unit_cost_cents, MovementType::In)
        })
        .await?;

        info!(
            product_id,
            branch_id,
            quantity,
            stock = outcome.aggregate.stock,
            "Stock received"
        );
        Ok(outcome)
    }

    /// Standalone FIFO stock-out (shrinkage, internal use), logged OUT.
    pub async fn consume_fifo(
        &self,
        product_id: &str,
        branch_id: &str,
        quantity: i64,
        reason: &str,
        actor: &Actor,
    ) -> DbResult<StockChangeOutcome> {
        validate_quantity(quantity)?;
        validate_reason(reason)?;

        let product = self.catalog.product(product_id).await?;
        let branch = self.catalog.branch(branch_id).await?;
        let request = StockRequest {
            product: &product,
            branch: &branch,
            quantity,
            reason,
            actor,
        };

        let outcome = run_with_retry(&self.retry, "consume_fifo", move || {
            self.try_consume(request, MovementType::Out)
        })
        .await?;

        info!(
            product_id,
            branch_id,
            quantity,
            cost_cents = outcome.plan.as_ref().map(|p| p.total_cost_cents),
            "Stock consumed"
        );
        Ok(outcome)
    }

    /// Manual correction logged as ADJUSTMENT.
    ///
    /// A positive `delta` is an intake at `unit_cost_cents` (required); a
    /// negative one is a FIFO stock-out.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        branch_id: &str,
        delta: i64,
        unit_cost_cents: Option<i64>,
        reason: &str,
        actor: &Actor,
    ) -> DbResult<StockChangeOutcome> {
        let quantity = delta.checked_abs().unwrap_or(i64::MAX);
        validate_quantity(quantity)?;
        validate_reason(reason)?;

        let product = self.catalog.product(product_id).await?;
        let branch = self.catalog.branch(branch_id).await?;
        let request = StockRequest {
            product: &product,
            branch: &branch,
            quantity,
            reason,
            actor,
        };

        let outcome = if delta > 0 {
            let cost = unit_cost_cents.ok_or_else(|| ValidationError::Required {
                field: "unit cost".to_string(),
            })?;
            validate_unit_cost(cost)?;
            run_with_retry(&self.retry, "adjust_stock", move || {
                self.try_receive(request, cost, MovementType::Adjustment)
            })
            .await?
        } else {
            run_with_retry(&self.retry, "adjust_stock", move || {
                self.try_consume(request, MovementType::Adjustment)
            })
            .await?
        };

        info!(product_id, branch_id, delta, reason, "Stock adjusted");
        Ok(outcome)
    }

    async fn try_receive(
        &self,
        request: StockRequest<'_>,
        unit_cost_cents: i64,
        movement_type: MovementType,
    ) -> DbResult<StockChangeOutcome> {
        let product_id = request.product.id.as_str();
        let branch_id = request.branch.id.as_str();

        let mut tx = self.pool.begin().await?;
        let mut set = StockWorkingSet::new();
        set.load_aggregate(&mut *tx, product_id, branch_id).await?;

        let received = set.receive(
            product_id,
            branch_id,
            request.quantity,
            unit_cost_cents,
            &request.actor.id,
            None,
        )?;
        set.flush(&mut *tx).await?;

        let movement = movement::append(
            &mut *tx,
            StockChange {
                product: request.product,
                branch: request.branch,
                movement_type,
                quantity: request.quantity,
                previous_stock: received.previous_stock,
                new_stock: received.new_stock,
            }
            .into_record(request.reason, None, request.actor),
        )
        .await?;

        let aggregate = set
            .aggregate(product_id, branch_id)
            .cloned()
            .ok_or_else(|| DbError::Internal("aggregate missing after flush".into()))?;
        tx.commit().await?;

        Ok(StockChangeOutcome {
            aggregate,
            movement,
            plan: None,
            layer: Some(received.layer),
        })
    }

    async fn try_consume(
        &self,
        request: StockRequest<'_>,
        movement_type: MovementType,
    ) -> DbResult<StockChangeOutcome> {
        let product_id = request.product.id.as_str();
        let branch_id = request.branch.id.as_str();

        let scanned = scan_candidates(&self.pool, product_id, branch_id).await?;

        let mut tx = self.pool.begin().await?;
        let mut set = StockWorkingSet::new();
        set.load_for_consumption(&mut *tx, product_id, branch_id, &scanned)
            .await?;

        let consumed = set.consume(product_id, branch_id, request.quantity)?;
        set.flush(&mut *tx).await?;

        let movement = movement::append(
            &mut *tx,
            StockChange {
                product: request.product,
                branch: request.branch,
                movement_type,
                quantity: -request.quantity,
                previous_stock: consumed.previous_stock,
                new_stock: consumed.new_stock,
            }
            .into_record(request.reason, None, request.actor),
        )
        .await?;

        let aggregate = set
            .aggregate(product_id, branch_id)
            .cloned()
            .ok_or_else(|| DbError::Internal("aggregate missing after flush".into()))?;
        tx.commit().await?;

        Ok(StockChangeOutcome {
            aggregate,
            movement,
            plan: Some(consumed.plan),
            layer: None,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_stock(
        &self,
        product_id: &str,
        branch_id: &str,
    ) -> DbResult<Option<AggregateStock>> {
        let sql = format!("SELECT {AGGREGATE_COLUMNS} FROM aggregate_stock WHERE id = ?1");
        let aggregate = sqlx::query_as::<_, AggregateStock>(&sql)
            .bind(AggregateStock::key(product_id, branch_id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(aggregate)
    }

    /// Layers still holding stock, oldest first.
    pub async fn layers(&self, product_id: &str, branch_id: &str) -> DbResult<Vec<CostLayer>> {
        scan_candidates(&self.pool, product_id, branch_id).await
    }

    /// Sets the low-stock alert level; zero disables the alert.
    pub async fn set_low_stock_threshold(
        &self,
        product_id: &str,
        branch_id: &str,
        threshold: i64,
    ) -> DbResult<AggregateStock> {
        if threshold < 0 {
            return Err(ValidationError::OutOfRange {
                field: "low stock threshold".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        run_with_retry(&self.retry, "set_low_stock_threshold", move || async move {
            let mut aggregate = self
                .get_stock(product_id, branch_id)
                .await?
                .ok_or_else(|| {
                    DbError::not_found("AggregateStock", AggregateStock::key(product_id, branch_id))
                })?;

            let result = sqlx::query(
                "UPDATE aggregate_stock SET low_stock_threshold = ?1, version = version + 1, \
                 updated_at = ?2 WHERE id = ?3 AND version = ?4",
            )
            .bind(threshold)
            .bind(Utc::now())
            .bind(&aggregate.id)
            .bind(aggregate.version)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::conflict(format!("aggregate stock {}", aggregate.id)));
            }

            aggregate.low_stock_threshold = threshold;
            aggregate.version += 1;
            Ok(aggregate)
        })
        .await
    }

    /// Aggregates at or below their alert threshold, emptiest first.
    pub async fn low_stock(&self, branch_id: &str, limit: u32) -> DbResult<Vec<AggregateStock>> {
        let limit = clamp_page_size(limit, stockledger_core::MAX_PAGE_SIZE);
        let sql = format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregate_stock \
             WHERE branch_id = ?1 AND low_stock_threshold > 0 AND stock <= low_stock_threshold \
             ORDER BY stock, product_id LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, AggregateStock>(&sql)
            .bind(branch_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every aggregate whose stock differs from the sum of its layers.
    /// Empty on a healthy ledger.
    pub async fn find_discrepancies(&self) -> DbResult<Vec<StockDiscrepancy>> {
        let rows = sqlx::query_as::<_, StockDiscrepancy>(
            r#"
            SELECT a.product_id, a.branch_id,
                   a.stock AS aggregate_stock,
                   COALESCE(SUM(l.remaining_stock), 0) AS layer_total
            FROM aggregate_stock a
            LEFT JOIN cost_layers l
                   ON l.product_id = a.product_id AND l.branch_id = a.branch_id
            GROUP BY a.product_id, a.branch_id, a.stock
            HAVING a.stock <> COALESCE(SUM(l.remaining_stock), 0)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if !rows.is_empty() {
            warn!(count = rows.len(), "Aggregate stock does not match cost layers");
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{actor, ledger, ANNEX, CHIPS, COLA, MAIN};
    use stockledger_core::types::MovementQuery;
    use stockledger_core::{CoreError, MAX_QUANTITY};

    #[tokio::test]
    async fn test_add_stock_creates_layer_and_logs_in() {
        let db = ledger().await;
        let outcome = db
            .inventory()
            .add_stock(COLA, MAIN, 20, 1000, "purchase order 7", &actor())
            .await
            .unwrap();

        assert_eq!(outcome.aggregate.stock, 20);
        let layer = outcome.layer.unwrap();
        assert_eq!(layer.initial_stock, 20);
        assert_eq!(layer.remaining_stock, 20);
        assert_eq!(layer.received_by, "u-1");

        assert_eq!(outcome.movement.movement_type, MovementType::In);
        assert_eq!(outcome.movement.quantity, 20);
        assert_eq!(outcome.movement.previous_stock, 0);
        assert_eq!(outcome.movement.new_stock, 20);
        assert_eq!(outcome.movement.product_name, "Cola");
        assert_eq!(outcome.movement.branch_name, "Main Street");
    }

    #[tokio::test]
    async fn test_invalid_quantity_rejected_before_any_write() {
        let db = ledger().await;
        let inventory = db.inventory();

        for qty in [0, -3] {
            let err = inventory
                .add_stock(COLA, MAIN, qty, 1000, "oops", &actor())
                .await
                .unwrap_err();
            assert!(matches!(err.as_core(), Some(CoreError::InvalidQuantity { .. })));
        }
        let err = inventory
            .consume_fifo(COLA, MAIN, 0, "oops", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::InvalidQuantity { .. })));

        assert!(inventory.get_stock(COLA, MAIN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_quantities_rejected_without_overflow() {
        let db = ledger().await;
        let inventory = db.inventory();

        let err = inventory
            .add_stock(COLA, MAIN, 10_000_000_000_000_000, 1000, "huge", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));
        let err = inventory
            .consume_fifo(COLA, MAIN, 10_000_000_000_000_000, "huge", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));
        let err = inventory
            .adjust_stock(COLA, MAIN, i64::MIN, None, "huge", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));

        // two valid intakes may not push stock on hand past the bound
        inventory
            .add_stock(COLA, MAIN, MAX_QUANTITY, 1000, "lot A", &actor())
            .await
            .unwrap();
        let err = inventory
            .add_stock(COLA, MAIN, 1, 1000, "lot B", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));

        let stock = inventory.get_stock(COLA, MAIN).await.unwrap().unwrap();
        assert_eq!(stock.stock, MAX_QUANTITY);
        assert_eq!(inventory.layers(COLA, MAIN).await.unwrap().len(), 1);

        let outcome = inventory
            .consume_fifo(COLA, MAIN, MAX_QUANTITY, "clear out", &actor())
            .await
            .unwrap();
        assert_eq!(outcome.plan.unwrap().total_cost_cents, MAX_QUANTITY * 1000);
        assert!(inventory.find_discrepancies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fifo_consumption_oldest_first() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 20, 1000, "lot A", &actor()).await.unwrap();
        inventory.add_stock(COLA, MAIN, 10, 1200, "lot B", &actor()).await.unwrap();

        let outcome = inventory
            .consume_fifo(COLA, MAIN, 25, "shrinkage", &actor())
            .await
            .unwrap();
        let plan = outcome.plan.unwrap();
        assert_eq!(plan.total_cost_cents, 26000);
        assert_eq!(plan.slices.len(), 2);
        assert_eq!((plan.slices[0].unit_cost_cents, plan.slices[0].quantity), (1000, 20));
        assert_eq!((plan.slices[1].unit_cost_cents, plan.slices[1].quantity), (1200, 5));

        assert_eq!(outcome.aggregate.stock, 5);
        assert_eq!(outcome.movement.movement_type, MovementType::Out);
        assert_eq!(outcome.movement.quantity, -25);

        let remaining = inventory.layers(COLA, MAIN).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].cost_cents, 1200);
        assert_eq!(remaining[0].remaining_stock, 5);
        assert!(inventory.find_discrepancies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 3, 1000, "lot A", &actor()).await.unwrap();
        let before_layers = inventory.layers(COLA, MAIN).await.unwrap();
        let before_stock = inventory.get_stock(COLA, MAIN).await.unwrap().unwrap();

        let err = inventory
            .consume_fifo(COLA, MAIN, 5, "too many", &actor())
            .await
            .unwrap_err();
        match err.as_core() {
            Some(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(*available, 3);
                assert_eq!(*requested, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert_eq!(inventory.layers(COLA, MAIN).await.unwrap(), before_layers);
        assert_eq!(
            inventory.get_stock(COLA, MAIN).await.unwrap().unwrap(),
            before_stock
        );
        let movements = db
            .movements()
            .query(&MovementQuery::default())
            .await
            .unwrap();
        assert_eq!(movements.items.len(), 1);
    }

    #[tokio::test]
    async fn test_consuming_unknown_key_reports_zero_available() {
        let db = ledger().await;
        let err = db
            .inventory()
            .consume_fifo(CHIPS, ANNEX, 1, "nothing here", &actor())
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_adjust_stock_both_directions() {
        let db = ledger().await;
        let inventory = db.inventory();

        let up = inventory
            .adjust_stock(COLA, MAIN, 4, Some(900), "found in back room", &actor())
            .await
            .unwrap();
        assert_eq!(up.movement.movement_type, MovementType::Adjustment);
        assert_eq!(up.movement.quantity, 4);
        assert_eq!(up.layer.unwrap().cost_cents, 900);

        let down = inventory
            .adjust_stock(COLA, MAIN, -3, None, "damaged", &actor())
            .await
            .unwrap();
        assert_eq!(down.movement.movement_type, MovementType::Adjustment);
        assert_eq!(down.movement.quantity, -3);
        assert_eq!(down.aggregate.stock, 1);
        assert_eq!(down.plan.unwrap().total_cost_cents, 2700);

        let missing_cost = inventory
            .adjust_stock(COLA, MAIN, 2, None, "count", &actor())
            .await;
        assert!(missing_cost.is_err());
        let zero = inventory.adjust_stock(COLA, MAIN, 0, None, "count", &actor()).await;
        assert!(matches!(
            zero.unwrap_err().as_core(),
            Some(CoreError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[tokio::test]
    async fn test_low_stock_threshold() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 10, 1000, "lot", &actor()).await.unwrap();
        inventory.add_stock(CHIPS, MAIN, 2, 500, "lot", &actor()).await.unwrap();

        assert!(inventory.low_stock(MAIN, 10).await.unwrap().is_empty());

        let updated = inventory.set_low_stock_threshold(CHIPS, MAIN, 5).await.unwrap();
        assert!(updated.is_low());
        inventory.set_low_stock_threshold(COLA, MAIN, 5).await.unwrap();

        let low = inventory.low_stock(MAIN, 10).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product_id, CHIPS);

        let err = inventory
            .set_low_stock_threshold(COLA, ANNEX, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_stale_scan_is_a_write_conflict() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 5, 1000, "lot A", &actor()).await.unwrap();

        let scanned = scan_candidates(db.pool(), COLA, MAIN).await.unwrap();
        // a second intake lands between scan and transaction
        inventory.add_stock(COLA, MAIN, 5, 1100, "lot B", &actor()).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let mut set = StockWorkingSet::new();
        let err = set
            .load_for_consumption(&mut *tx, COLA, MAIN, &scanned)
            .await
            .unwrap_err();
        assert!(err.is_write_conflict());
    }

    #[tokio::test]
    async fn test_changed_layer_version_is_a_write_conflict() {
        let db = ledger().await;
        let inventory = db.inventory();
        inventory.add_stock(COLA, MAIN, 5, 1000, "lot A", &actor()).await.unwrap();

        let scanned = scan_candidates(db.pool(), COLA, MAIN).await.unwrap();
        inventory.consume_fifo(COLA, MAIN, 1, "sold", &actor()).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let mut set = StockWorkingSet::new();
        let err = set
            .load_for_consumption(&mut *tx, COLA, MAIN, &scanned)
            .await
            .unwrap_err();
        assert!(err.is_write_conflict());
    }
}
