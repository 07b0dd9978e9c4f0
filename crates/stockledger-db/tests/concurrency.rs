//! Concurrent access tests for the stock ledger.
//!
//! Every test runs against a file database in WAL mode with several pooled
//! connections, so transactions really interleave. Tasks are released
//! together with a barrier and joined with `join_all`.
//!
//! What must hold no matter the interleaving:
//! - stock never goes negative and is never sold twice
//! - aggregate stock equals the sum of remaining layer stock
//! - a transfer is settled at most once

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;

use stockledger_core::types::{
    Actor, Branch, MovementQuery, NewSale, NewSaleLine, NewTransferItem, PaymentMethod, Product,
    RecordType,
};
use stockledger_core::CoreError;
use stockledger_db::{Database, DbConfig, DbError, RetryPolicy};

const MAIN: &str = "main";
const ANNEX: &str = "annex";
const COLA: &str = "p-cola";

async fn file_ledger() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("ledger.db"))
        .max_connections(4)
        .retry_policy(RetryPolicy::new(
            50,
            Duration::from_millis(1),
            Duration::from_millis(20),
        ));
    let db = Database::new(config).await.unwrap();

    let now = Utc::now();
    for (id, name) in [(MAIN, "Main Street"), (ANNEX, "Annex")] {
        db.branches()
            .upsert(&Branch {
                id: id.to_string(),
                name: name.to_string(),
                is_active: true,
                created_at: now,
            })
            .await
            .unwrap();
    }
    db.catalog()
        .upsert(&Product {
            id: COLA.to_string(),
            name: "Cola".to_string(),
            category: "drinks".to_string(),
            price_cents: 250,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    (dir, db)
}

fn clerk(n: usize) -> Actor {
    Actor::new(format!("u-{n}"), format!("Clerk {n}"))
}

fn one_cola(id: String) -> NewSale {
    NewSale {
        id,
        record_type: RecordType::Income,
        amount_cents: 250,
        date: Utc::now(),
        description: "Counter sale".to_string(),
        category: "retail".to_string(),
        payment_method: PaymentMethod::Cash,
        branch_id: MAIN.to_string(),
        lines: vec![NewSaleLine {
            product_id: COLA.to_string(),
            branch_id: None,
            quantity: 1,
            unit_price_cents: 250,
        }],
    }
}

/// Failures a racing operation may legitimately end with.
fn is_expected_loss(err: &DbError) -> bool {
    matches!(
        err.as_core(),
        Some(CoreError::InsufficientStock { .. }) | Some(CoreError::ConcurrencyExhausted { .. })
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sales_never_oversell() {
    let (_dir, db) = file_ledger().await;
    db.inventory()
        .add_stock(COLA, MAIN, 6, 1000, "lot A", &clerk(0))
        .await
        .unwrap();
    db.inventory()
        .add_stock(COLA, MAIN, 4, 1200, "lot B", &clerk(0))
        .await
        .unwrap();

    let tasks = 16;
    let barrier = Arc::new(Barrier::new(tasks));
    let handles = (0..tasks).map(|n| {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            db.sales()
                .process_sale(&one_cola(format!("s-{n}")), &clerk(n))
                .await
        })
    });

    let mut sold = 0;
    let mut cost = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(outcome) => {
                sold += 1;
                cost += outcome.sale.total_cost_cents;
            }
            Err(err) => assert!(is_expected_loss(&err), "unexpected failure: {err}"),
        }
    }

    assert!(sold <= 10);
    let stock = db
        .inventory()
        .get_stock(COLA, MAIN)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, 10 - sold);
    assert!(db.inventory().find_discrepancies().await.unwrap().is_empty());

    // whatever the order, FIFO drains lot A before lot B
    let expected_cost: i64 = (0..sold).map(|i| if i < 6 { 1000 } else { 1200 }).sum();
    assert_eq!(cost, expected_cost);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_intake_and_consumption_keep_invariant() {
    let (_dir, db) = file_ledger().await;
    db.inventory()
        .add_stock(COLA, MAIN, 20, 1000, "opening", &clerk(0))
        .await
        .unwrap();

    let tasks = 12;
    let barrier = Arc::new(Barrier::new(tasks));
    let handles = (0..tasks).map(|n| {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            let inventory = db.inventory();
            if n % 2 == 0 {
                inventory
                    .add_stock(COLA, MAIN, 3, 1100, "delivery", &clerk(n))
                    .await
                    .map(|o| o.movement.quantity)
            } else {
                inventory
                    .consume_fifo(COLA, MAIN, 2, "shrinkage", &clerk(n))
                    .await
                    .map(|o| o.movement.quantity)
            }
        })
    });

    let mut net = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(delta) => net += delta,
            Err(err) => assert!(is_expected_loss(&err), "unexpected failure: {err}"),
        }
    }

    let stock = db
        .inventory()
        .get_stock(COLA, MAIN)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(stock, 20 + net);
    assert!(db.inventory().find_discrepancies().await.unwrap().is_empty());

    let query = MovementQuery {
        product_id: Some(COLA.to_string()),
        branch_id: Some(MAIN.to_string()),
        limit: 100,
        ..Default::default()
    };
    let page = db.movements().query(&query).await.unwrap();
    assert!(page.next_cursor.is_none());
    let logged: i64 = page.items.iter().map(|m| m.quantity).sum();
    assert_eq!(logged, stock);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_settlements_credit_once() {
    let (_dir, db) = file_ledger().await;
    db.inventory()
        .add_stock(COLA, MAIN, 10, 1000, "opening", &clerk(0))
        .await
        .unwrap();
    let transfer = db
        .transfers()
        .initiate_transfer(
            MAIN,
            ANNEX,
            &[NewTransferItem {
                product_id: COLA.to_string(),
                quantity: 7,
            }],
            None,
            &clerk(0),
        )
        .await
        .unwrap();

    let tasks = 6;
    let barrier = Arc::new(Barrier::new(tasks));
    let handles = (0..tasks).map(|n| {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        let id = transfer.id.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            let transfers = db.transfers();
            if n % 2 == 0 {
                transfers.complete_transfer(&id, &clerk(n)).await
            } else {
                transfers.cancel_transfer(&id, &clerk(n), "changed plans").await
            }
        })
    });

    let mut settled = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(_) => settled += 1,
            Err(err) => assert!(
                matches!(
                    err.as_core(),
                    Some(CoreError::InvalidTransferState { .. })
                        | Some(CoreError::ConcurrencyExhausted { .. })
                ),
                "unexpected failure: {err}"
            ),
        }
    }
    assert_eq!(settled, 1);

    let main = db.inventory().get_stock(COLA, MAIN).await.unwrap().unwrap().stock;
    let annex = db
        .inventory()
        .get_stock(COLA, ANNEX)
        .await
        .unwrap()
        .map(|a| a.stock)
        .unwrap_or(0);
    assert_eq!(main + annex, 10);
    assert!(annex == 0 || annex == 7);
    assert!(db.inventory().find_discrepancies().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_sale_id_submitted_concurrently_commits_once() {
    let (_dir, db) = file_ledger().await;
    db.inventory()
        .add_stock(COLA, MAIN, 10, 1000, "opening", &clerk(0))
        .await
        .unwrap();

    let tasks = 5;
    let barrier = Arc::new(Barrier::new(tasks));
    let handles = (0..tasks).map(|n| {
        let db = db.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            db.sales()
                .process_sale(&one_cola("s-dup".to_string()), &clerk(n))
                .await
        })
    });

    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let fresh = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(o) if !o.replayed))
        .count();
    assert_eq!(fresh, 1);

    let stock = db.inventory().get_stock(COLA, MAIN).await.unwrap().unwrap().stock;
    assert_eq!(stock, 9);
}
