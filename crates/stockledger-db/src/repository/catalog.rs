//! # Catalog Repository & Cache
//!
//! Products are owned by the catalog service; the ledger only reads names
//! and categories for display on movements, transfers and sale lines.
//!
//! ```text
//!  ledger op ──► CatalogCache::product(id)
//!                   │ hit ──► Product (may be up to TTL old)
//!                   │ miss
//!                   ▼
//!              products table ──► insert into cache ──► Product
//!
//!  CatalogRepository::upsert ──► products table ──► invalidate(id)
//! ```
//!
//! Stock correctness never depends on this cache: stock and layers are
//! always re-read inside the ledger transaction.

use moka::future::Cache;
use sqlx::SqlitePool;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use stockledger_core::types::{Branch, Product};
use stockledger_core::CoreError;

use crate::error::DbResult;

const PRODUCT_COLUMNS: &str = "id, name, category, price_cents, is_active, created_at, updated_at";
const BRANCH_COLUMNS: &str = "id, name, is_active, created_at";

// =============================================================================
// Read-through Cache
// =============================================================================

/// Read-through cache of products and branches with a time-to-live and
/// explicit invalidation.
#[derive(Clone)]
pub struct CatalogCache {
    pool: SqlitePool,
    products: Cache<String, Product>,
    branches: Cache<String, Branch>,
}

impl fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCache")
            .field("products", &self.products.entry_count())
            .field("branches", &self.branches.entry_count())
            .finish()
    }
}

impl CatalogCache {
    pub fn new(pool: SqlitePool, ttl: Duration, max_capacity: u64) -> Self {
        CatalogCache {
            pool,
            products: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            branches: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// The product, from cache or storage. `ProductNotFound` when it does
    /// not exist.
    pub async fn product(&self, id: &str) -> DbResult<Product> {
        if let Some(product) = self.products.get(id).await {
            return Ok(product);
        }

        debug!(product_id = %id, "Catalog cache miss");
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(id.to_string()))?;

        self.products.insert(id.to_string(), product.clone()).await;
        Ok(product)
    }

    /// The branch, from cache or storage. `BranchNotFound` when it does not
    /// exist.
    pub async fn branch(&self, id: &str) -> DbResult<Branch> {
        if let Some(branch) = self.branches.get(id).await {
            return Ok(branch);
        }

        let sql = format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1");
        let branch = sqlx::query_as::<_, Branch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::BranchNotFound(id.to_string()))?;

        self.branches.insert(id.to_string(), branch.clone()).await;
        Ok(branch)
    }

    /// Drops one product so the next read goes to storage.
    pub async fn invalidate(&self, product_id: &str) {
        self.products.invalidate(product_id).await;
    }

    pub async fn invalidate_branch(&self, branch_id: &str) {
        self.branches.invalidate(branch_id).await;
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        self.products.invalidate_all();
        self.branches.invalidate_all();
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Product reference data.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
    cache: CatalogCache,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool, cache: CatalogCache) -> Self {
        CatalogRepository { pool, cache }
    }

    /// Inserts or replaces a product and drops its cache entry.
    pub async fn upsert(&self, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, name = %product.name, "Upserting product");

        sqlx::query(
            r#"
            INSERT INTO products
                (id, name, category, price_cents, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                price_cents = excluded.price_cents,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.price_cents)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        self.cache.invalidate(&product.id).await;
        Ok(())
    }

    /// Reads straight from storage, bypassing the cache.
    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;

    fn product(id: &str, name: &str) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            name: name.to_string(),
            category: "drinks".to_string(),
            price_cents: 250,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert(&product("p-1", "Cola")).await.unwrap();

        let stored = db.catalog().get("p-1").await.unwrap().unwrap();
        assert_eq!(stored.name, "Cola");
        assert!(db.catalog().get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert(&product("p-1", "Cola")).await.unwrap();

        let cache = db.catalog_cache();
        assert_eq!(cache.product("p-1").await.unwrap().name, "Cola");

        // a write that bypasses the repository is not seen until invalidation
        sqlx::query("UPDATE products SET name = 'Cola Zero' WHERE id = 'p-1'")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(cache.product("p-1").await.unwrap().name, "Cola");

        cache.invalidate("p-1").await;
        assert_eq!(cache.product("p-1").await.unwrap().name, "Cola Zero");
    }

    #[tokio::test]
    async fn test_upsert_invalidates_cache() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.catalog().upsert(&product("p-1", "Cola")).await.unwrap();
        assert_eq!(db.catalog_cache().product("p-1").await.unwrap().name, "Cola");

        db.catalog().upsert(&product("p-1", "Cola Light")).await.unwrap();
        assert_eq!(
            db.catalog_cache().product("p-1").await.unwrap().name,
            "Cola Light"
        );
    }

    #[tokio::test]
    async fn test_unknown_ids_map_to_domain_errors() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db.catalog_cache().product("ghost").await.unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::ProductNotFound(id)) if id == "ghost"));

        let err = db.catalog_cache().branch("nowhere").await.unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::BranchNotFound(_))));
    }
}
