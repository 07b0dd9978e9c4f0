//! # Branch Repository
//!
//! Store locations. Static reference data from the ledger's point of view;
//! the ledger itself never writes here.

use sqlx::SqlitePool;
use tracing::debug;

use stockledger_core::types::Branch;

use crate::error::DbResult;
use crate::repository::catalog::CatalogCache;

#[derive(Debug, Clone)]
pub struct BranchRepository {
    pool: SqlitePool,
    cache: CatalogCache,
}

impl BranchRepository {
    pub fn new(pool: SqlitePool, cache: CatalogCache) -> Self {
        BranchRepository { pool, cache }
    }

    /// Inserts or renames/reactivates a branch.
    pub async fn upsert(&self, branch: &Branch) -> DbResult<()> {
        debug!(id = %branch.id, name = %branch.name, "Upserting branch");

        sqlx::query(
            r#"
            INSERT INTO branches (id, name, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active
            "#,
        )
        .bind(&branch.id)
        .bind(&branch.name)
        .bind(branch.is_active)
        .bind(branch.created_at)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate_branch(&branch.id).await;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>(
            "SELECT id, name, is_active, created_at FROM branches WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(branch)
    }

    /// Active branches by name.
    pub async fn list_active(&self) -> DbResult<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>(
            "SELECT id, name, is_active, created_at FROM branches \
             WHERE is_active = 1 ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;

    fn branch(id: &str, name: &str, active: bool) -> Branch {
        Branch {
            id: id.to_string(),
            name: name.to_string(),
            is_active: active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_active_skips_closed_branches() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.branches();
        repo.upsert(&branch("b-2", "Uptown", true)).await.unwrap();
        repo.upsert(&branch("b-1", "Downtown", true)).await.unwrap();
        repo.upsert(&branch("b-3", "Old Mall", false)).await.unwrap();

        let names: Vec<String> = repo
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Downtown", "Uptown"]);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_cached_branch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.branches();
        repo.upsert(&branch("b-1", "Downtown", true)).await.unwrap();
        assert!(db.catalog_cache().branch("b-1").await.unwrap().is_active);

        repo.upsert(&branch("b-1", "Downtown", false)).await.unwrap();
        assert!(!db.catalog_cache().branch("b-1").await.unwrap().is_active);
        assert!(!repo.get("b-1").await.unwrap().unwrap().is_active);
    }
}
