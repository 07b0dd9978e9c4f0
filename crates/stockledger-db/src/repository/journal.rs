//! # Journal Repository
//!
//! Persistence of double-entry journal entries and the chart of accounts.
//!
//! ## Posting Rules
//! ```text
//!  generator (core) ──► JournalEntry (DRAFT)
//!                            │ post(): Σdebit == Σcredit ?
//!                            │    no ──► UnbalancedJournal, tx dropped
//!                            ▼
//!                       insert_entry(&mut tx)     header + lines
//!
//!  void_entry
//!    original POSTED ──► VOID            (version-checked UPDATE)
//!    reversal        ──► POSTED          (lines swapped, ADJUSTMENT)
//! ```
//!
//! Lines are append-only; an entry is never edited after posting, only
//! voided and reversed.

use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{error, info, warn};

use stockledger_core::accounts::Account;
use stockledger_core::journal::{
    JournalEntry, JournalGenerator, JournalLine, JournalStatus, ReferenceType,
};
use stockledger_core::types::{Actor, Page};
use stockledger_core::validation::{clamp_page_size, parse_cursor, validate_reason};
use stockledger_core::CoreError;

use crate::error::{DbError, DbResult};
use crate::repository::page_from_rows;
use crate::retry::{run_with_retry, RetryPolicy};

const ENTRY_COLUMNS: &str = "seq, id, date, description, total_amount_cents, reference_id, \
     reference_type, branch_id, created_by, created_at, status, reverses_entry_id, version";

// =============================================================================
// Chart of Accounts
// =============================================================================

/// Inserts every account not already present. Returns how many were added.
pub(crate) async fn seed_chart(pool: &SqlitePool, chart: &[Account]) -> DbResult<u64> {
    let mut tx = pool.begin().await?;
    let mut added = 0;
    for account in chart {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO accounts
                (id, code, name, account_type, nature, is_group, level, parent_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&account.id)
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.account_type)
        .bind(account.nature)
        .bind(account.is_group)
        .bind(account.level)
        .bind(&account.parent_id)
        .execute(&mut *tx)
        .await?;
        added += result.rows_affected();
    }
    tx.commit().await?;

    if added > 0 {
        info!(added, "Seeded chart of accounts");
    }
    Ok(added)
}

/// The stored chart, ordered by code.
pub(crate) async fn load_chart(pool: &SqlitePool) -> DbResult<Vec<Account>> {
    let accounts = sqlx::query_as::<_, Account>(
        "SELECT id, code, name, account_type, nature, is_group, level, parent_id \
         FROM accounts ORDER BY code",
    )
    .fetch_all(pool)
    .await?;
    Ok(accounts)
}

// =============================================================================
// In-transaction helpers
// =============================================================================

/// Fails when `entry` was posted for a sale or expense that is stored.
async fn ensure_not_owned_by_sale(
    conn: &mut SqliteConnection,
    entry: &JournalEntry,
) -> DbResult<()> {
    if !matches!(
        entry.reference_type,
        ReferenceType::Sale | ReferenceType::Expense
    ) {
        return Ok(());
    }

    let owned: Option<String> = sqlx::query_scalar("SELECT id FROM sales WHERE id = ?1")
        .bind(&entry.reference_id)
        .fetch_optional(&mut *conn)
        .await?;
    match owned {
        Some(sale_id) => {
            warn!(
                entry_id = %entry.id,
                sale_id = %sale_id,
                "Refusing to void a sale's journal entry directly"
            );
            Err(CoreError::InvalidJournalStatus {
                entry_id: entry.id.clone(),
                current_status: format!("{} for sale {}", entry.status.as_str(), sale_id),
            }
            .into())
        }
        None => Ok(()),
    }
}

/// Writes a posted entry and its lines.
pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &JournalEntry,
) -> DbResult<()> {
    if entry.status != JournalStatus::Posted {
        return Err(CoreError::InvalidJournalStatus {
            entry_id: entry.id.clone(),
            current_status: entry.status.as_str().to_string(),
        }
        .into());
    }

    sqlx::query(
        r#"
        INSERT INTO journal_entries (
            id, date, description, total_amount_cents, reference_id, reference_type,
            branch_id, created_by, created_at, status, reverses_entry_id, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&entry.id)
    .bind(entry.date)
    .bind(&entry.description)
    .bind(entry.total_amount_cents)
    .bind(&entry.reference_id)
    .bind(entry.reference_type)
    .bind(&entry.branch_id)
    .bind(&entry.created_by)
    .bind(entry.created_at)
    .bind(entry.status)
    .bind(&entry.reverses_entry_id)
    .bind(entry.version)
    .execute(&mut *conn)
    .await?;

    for (line_no, line) in entry.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO journal_lines (
                entry_id, line_no, account_id, account_code, account_name,
                debit_cents, credit_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(line_no as i64 + 1)
        .bind(&line.account_id)
        .bind(&line.account_code)
        .bind(&line.account_name)
        .bind(line.debit_cents)
        .bind(line.credit_cents)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Reads an entry with its lines.
pub(crate) async fn fetch_entry(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<JournalEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = ?1");
    let entry = sqlx::query_as::<_, JournalEntry>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match entry {
        Some(mut entry) => {
            entry.lines = fetch_lines(conn, &entry.id).await?;
            Ok(Some(entry))
        }
        None => Ok(None),
    }
}

async fn fetch_lines(conn: &mut SqliteConnection, entry_id: &str) -> DbResult<Vec<JournalLine>> {
    let lines = sqlx::query_as::<_, JournalLine>(
        "SELECT account_id, account_code, account_name, debit_cents, credit_cents \
         FROM journal_lines WHERE entry_id = ?1 ORDER BY line_no",
    )
    .bind(entry_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(lines)
}

/// Marks `original` VOID and posts its reversal. Returns the reversal.
pub(crate) async fn void_in_tx(
    conn: &mut SqliteConnection,
    generator: &JournalGenerator,
    original: &JournalEntry,
    actor: &Actor,
    reason: &str,
) -> DbResult<JournalEntry> {
    let reversal = generator
        .reversal_of(original, actor, reason)?
        .post()
        .inspect_err(|e| error!(entry_id = %original.id, error = %e, "Reversal does not balance"))?;

    let result = sqlx::query(
        "UPDATE journal_entries SET status = ?1, version = version + 1 \
         WHERE id = ?2 AND version = ?3 AND status = ?4",
    )
    .bind(JournalStatus::Void)
    .bind(&original.id)
    .bind(original.version)
    .bind(JournalStatus::Posted)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::conflict(format!("journal entry {}", original.id)));
    }

    insert_entry(conn, &reversal).await?;
    Ok(reversal)
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct JournalRepository {
    pool: SqlitePool,
    generator: Arc<JournalGenerator>,
    retry: RetryPolicy,
    max_page_size: u32,
}

impl JournalRepository {
    pub fn new(
        pool: SqlitePool,
        generator: Arc<JournalGenerator>,
        retry: RetryPolicy,
        max_page_size: u32,
    ) -> Self {
        JournalRepository {
            pool,
            generator,
            retry,
            max_page_size,
        }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<JournalEntry>> {
        let mut conn = self.pool.acquire().await?;
        fetch_entry(&mut *conn, id).await
    }

    /// Entries referencing a sale, expense or (for reversals) another entry.
    pub async fn by_reference(&self, reference_id: &str) -> DbResult<Vec<JournalEntry>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE reference_id = ?1 ORDER BY seq"
        );
        let mut entries = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(reference_id)
            .fetch_all(&mut *conn)
            .await?;
        for entry in &mut entries {
            entry.lines = fetch_lines(&mut *conn, &entry.id).await?;
        }
        Ok(entries)
    }

    /// Newest-first page of entries with their lines.
    pub async fn list(&self, limit: u32, cursor: Option<&str>) -> DbResult<Page<JournalEntry>> {
        let limit = clamp_page_size(limit, self.max_page_size);
        let cursor = parse_cursor(cursor)?;

        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries \
             WHERE (?1 IS NULL OR seq < ?1) ORDER BY seq DESC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(cursor)
            .bind(i64::from(limit) + 1)
            .fetch_all(&mut *conn)
            .await?;

        let mut page: Page<JournalEntry> = page_from_rows(rows, limit)?;
        for entry in &mut page.items {
            entry.lines = fetch_lines(&mut *conn, &entry.id).await?;
        }
        Ok(page)
    }

    /// Voids a posted entry and appends its reversal.
    ///
    /// Entries that belong to a stored sale or expense are refused; those go
    /// through `SaleRepository::void_sale` so the stock and the sale status
    /// move together with the journal.
    pub async fn void_entry(
        &self,
        id: &str,
        actor: &Actor,
        reason: &str,
    ) -> DbResult<JournalEntry> {
        validate_reason(reason)?;

        let reversal = run_with_retry(&self.retry, "void_entry", move || async move {
            let mut tx = self.pool.begin().await?;
            let original = fetch_entry(&mut *tx, id)
                .await?
                .ok_or_else(|| CoreError::JournalEntryNotFound(id.to_string()))?;
            ensure_not_owned_by_sale(&mut *tx, &original).await?;
            let reversal = void_in_tx(&mut *tx, &self.generator, &original, actor, reason).await?;
            tx.commit().await?;
            Ok(reversal)
        })
        .await?;

        info!(entry_id = %id, reversal_id = %reversal.id, "Journal entry voided");
        Ok(reversal)
    }

    /// The chart of accounts, ordered by code.
    pub async fn accounts(&self) -> DbResult<Vec<Account>> {
        load_chart(&self.pool).await
    }
}
