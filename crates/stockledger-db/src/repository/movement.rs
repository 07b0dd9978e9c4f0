//! # Movement Ledger
//!
//! Append-only audit trail of every stock change.
//!
//! ```text
//!  write side (crate-internal)           read side (public)
//!  ──────────────────────────            ─────────────────────────────
//!  append(&mut tx, record)               MovementRepository::query
//!    called inside the transaction         product / branch / since
//!    of the operation that moved           filters, seq DESC, cursor
//!    the stock                             pages, bounded page size
//! ```
//!
//! There is no update or delete path; the table triggers reject both.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use chrono::Utc;
use stockledger_core::types::{
    Actor, Branch, MovementQuery, MovementRecord, MovementType, Page, Product,
};
use stockledger_core::validation::{clamp_page_size, parse_cursor};

use crate::error::DbResult;
use crate::repository::page_from_rows;

const MOVEMENT_COLUMNS: &str = "seq, id, product_id, product_name, branch_id, branch_name, \
     movement_type, quantity, previous_stock, new_stock, reason, correlation_id, \
     actor_id, actor_name, created_at";

/// A stock change about to be logged.
#[derive(Debug)]
pub(crate) struct StockChange<'a> {
    pub product: &'a Product,
    pub branch: &'a Branch,
    pub movement_type: MovementType,
    /// Signed: negative when stock leaves the branch.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
}

impl StockChange<'_> {
    pub fn into_record(
        self,
        reason: &str,
        correlation_id: Option<&str>,
        actor: &Actor,
    ) -> MovementRecord {
        MovementRecord {
            seq: 0,
            id: Uuid::new_v4().to_string(),
            product_id: self.product.id.clone(),
            product_name: self.product.name.clone(),
            branch_id: self.branch.id.clone(),
            branch_name: self.branch.name.clone(),
            movement_type: self.movement_type,
            quantity: self.quantity,
            previous_stock: self.previous_stock,
            new_stock: self.new_stock,
            reason: reason.to_string(),
            correlation_id: correlation_id.map(str::to_string),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Appends one record inside the caller's transaction and returns it with
/// its ledger position filled in.
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    mut record: MovementRecord,
) -> DbResult<MovementRecord> {
    let result = sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, product_id, product_name, branch_id, branch_name,
            movement_type, quantity, previous_stock, new_stock, reason,
            correlation_id, actor_id, actor_name, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(&record.id)
    .bind(&record.product_id)
    .bind(&record.product_name)
    .bind(&record.branch_id)
    .bind(&record.branch_name)
    .bind(record.movement_type)
    .bind(record.quantity)
    .bind(record.previous_stock)
    .bind(record.new_stock)
    .bind(&record.reason)
    .bind(&record.correlation_id)
    .bind(&record.actor_id)
    .bind(&record.actor_name)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    record.seq = result.last_insert_rowid();
    Ok(record)
}

/// Read access to the movement ledger.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
    max_page_size: u32,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool, max_page_size: u32) -> Self {
        MovementRepository {
            pool,
            max_page_size,
        }
    }

    /// Newest-first page of movements matching the filters.
    pub async fn query(&self, query: &MovementQuery) -> DbResult<Page<MovementRecord>> {
        let limit = clamp_page_size(query.limit, self.max_page_size);
        let cursor = parse_cursor(query.cursor.as_deref())?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE 1 = 1"
        ));
        if let Some(product_id) = &query.product_id {
            qb.push(" AND product_id = ").push_bind(product_id.clone());
        }
        if let Some(branch_id) = &query.branch_id {
            qb.push(" AND branch_id = ").push_bind(branch_id.clone());
        }
        if let Some(since) = query.since {
            qb.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(seq) = cursor {
            qb.push(" AND seq < ").push_bind(seq);
        }
        qb.push(" ORDER BY seq DESC LIMIT ")
            .push_bind(i64::from(limit) + 1);

        let rows = qb.build().fetch_all(&self.pool).await?;
        page_from_rows(rows, limit)
    }

    /// Every movement that carries `correlation_id` (a sale or transfer id),
    /// oldest first.
    pub async fn by_correlation(&self, correlation_id: &str) -> DbResult<Vec<MovementRecord>> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE correlation_id = ?1 ORDER BY seq"
        );
        let records = sqlx::query_as::<_, MovementRecord>(&sql)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}
