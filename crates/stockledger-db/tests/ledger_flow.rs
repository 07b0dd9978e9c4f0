//! End-to-end flows across the ledger components on an in-memory database.

use chrono::{Duration, Utc};

use stockledger_core::journal::JournalStatus;
use stockledger_core::types::{
    Actor, Branch, MovementType, NewSale, NewSaleLine, NewTransferItem, PaymentMethod, Product,
    RecordType,
};
use stockledger_db::{Database, DbConfig};

const MAIN: &str = "main";
const ANNEX: &str = "annex";
const COLA: &str = "p-cola";

async fn ledger() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
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
            price_cents: 2300,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    db
}

fn manager() -> Actor {
    Actor::new("u-1", "Alice")
}

fn sale_at(id: &str, branch_id: &str, quantity: i64, unit_price_cents: i64) -> NewSale {
    NewSale {
        id: id.to_string(),
        record_type: RecordType::Income,
        amount_cents: quantity * unit_price_cents,
        date: Utc::now(),
        description: "Counter sale".to_string(),
        category: "retail".to_string(),
        payment_method: PaymentMethod::Card,
        branch_id: branch_id.to_string(),
        lines: vec![NewSaleLine {
            product_id: COLA.to_string(),
            branch_id: None,
            quantity,
            unit_price_cents,
        }],
    }
}

#[tokio::test]
async fn test_transferred_goods_sell_at_origin_cost() {
    let db = ledger().await;
    let inventory = db.inventory();
    inventory.add_stock(COLA, MAIN, 20, 1000, "lot A", &manager()).await.unwrap();
    inventory.add_stock(COLA, MAIN, 10, 1200, "lot B", &manager()).await.unwrap();

    let transfer = db
        .transfers()
        .initiate_transfer(
            MAIN,
            ANNEX,
            &[NewTransferItem {
                product_id: COLA.to_string(),
                quantity: 25,
            }],
            Some("stock the annex"),
            &manager(),
        )
        .await
        .unwrap();
    db.transfers().complete_transfer(&transfer.id, &manager()).await.unwrap();

    // 25 units worth 260.00 left main; 25 units worth 260.00 arrived
    let valuation = db.reports().inventory_valuation(None).await.unwrap();
    assert_eq!(valuation.total_units, 30);
    assert_eq!(valuation.total_value_cents, 26000 + 5 * 1200);

    let outcome = db
        .sales()
        .process_sale(&sale_at("s-1", ANNEX, 5, 2300), &manager())
        .await
        .unwrap();
    assert_eq!(outcome.sale.total_cost_cents, 5 * 1040);
    assert_eq!(outcome.journal_entry.total_debit(), outcome.journal_entry.total_credit());

    let trail = db.movements().by_correlation(&transfer.id).await.unwrap();
    let kinds: Vec<_> = trail.iter().map(|m| (m.movement_type, m.branch_id.as_str())).collect();
    assert_eq!(kinds, vec![(MovementType::Out, MAIN), (MovementType::In, ANNEX)]);
    assert!(inventory.find_discrepancies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_month_of_trading_reports() {
    let db = ledger().await;
    db.inventory().add_stock(COLA, MAIN, 3, 15000, "lot", &manager()).await.unwrap();

    db.sales()
        .process_sale(&sale_at("s-1", MAIN, 1, 23000), &manager())
        .await
        .unwrap();
    db.sales()
        .process_sale(&sale_at("s-2", MAIN, 1, 23000), &manager())
        .await
        .unwrap();
    db.sales()
        .record_expense(
            &NewSale {
                id: "x-1".to_string(),
                record_type: RecordType::Expense,
                amount_cents: 10000,
                date: Utc::now(),
                description: "Shop rent".to_string(),
                category: "Rent".to_string(),
                payment_method: PaymentMethod::BankTransfer,
                branch_id: MAIN.to_string(),
                lines: Vec::new(),
            },
            &manager(),
        )
        .await
        .unwrap();
    let voided = db.sales().void_sale("s-2", &manager(), "card declined").await.unwrap();
    assert_eq!(voided.reversal.status, JournalStatus::Posted);

    let start = Utc::now() - Duration::hours(1);
    let end = Utc::now() + Duration::hours(1);
    let pnl = db.reports().profit_and_loss(start, end, None).await.unwrap();
    assert_eq!(pnl.revenue_cents, 20000);
    assert_eq!(pnl.cogs_cents, 15000);
    assert_eq!(pnl.expenses_cents, 10000);
    assert_eq!(pnl.net_profit_cents, -5000);

    let valuation = db.reports().inventory_valuation(Some(MAIN)).await.unwrap();
    assert_eq!(valuation.total_units, 2);
    assert_eq!(valuation.total_value_cents, 30000);

    let entries = db.journal().list(10, None).await.unwrap();
    assert_eq!(entries.items.len(), 4);
    assert!(entries
        .items
        .iter()
        .all(|e| e.total_debit() == e.total_credit()));
}
