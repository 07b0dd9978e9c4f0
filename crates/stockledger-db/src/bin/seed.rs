//! # Demo Ledger Seeder
//!
//! Populates a database with two branches, a small catalog, purchase
//! layers, one completed transfer, a few sales and an expense, then
//! prints the resulting reports.
//!
//! ## Usage
//! ```bash
//! # Seed the database named in the ledger config (default ./stockledger.db)
//! cargo run -p stockledger-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockledger-db --bin seed -- --db ./data/ledger.db
//!
//! # Use a config file
//! cargo run -p stockledger-db --bin seed -- --config ./ledger.toml
//! ```
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - Default: `info,stockledger=debug,sqlx=warn`

use chrono::{Datelike, Utc};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stockledger_core::types::{
    Actor, Branch, NewSale, NewSaleLine, NewTransferItem, PaymentMethod, Product, RecordType,
};
use stockledger_db::{Database, LedgerConfig};

const BRANCHES: &[(&str, &str)] = &[("main", "Main Street"), ("annex", "Harbour Annex")];

/// (id, name, category, tax-inclusive shelf price)
const PRODUCTS: &[(&str, &str, &str, i64)] = &[
    ("bev-cola", "Cola 500ml", "beverages", 230),
    ("bev-water", "Still Water 1L", "beverages", 115),
    ("snk-chips", "Salted Chips", "snacks", 345),
    ("gro-rice", "Basmati Rice 5kg", "grocery", 2300),
];

/// Purchase lots received at the main branch: (product, quantity, unit cost).
const PURCHASES: &[(&str, i64, i64)] = &[
    ("bev-cola", 48, 120),
    ("bev-cola", 24, 135),
    ("bev-water", 60, 60),
    ("snk-chips", 30, 210),
    ("gro-rice", 10, 1500),
    ("gro-rice", 10, 1620),
];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockledger=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<String> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stock Ledger Demo Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (overrides config)");
                println!("  -c, --config <PATH>   Ledger config file (TOML)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            other => warn!(argument = %other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let mut config = LedgerConfig::load_or_default(config_path);
    if let Some(path) = db_path {
        config.database.path = PathBuf::from(path);
    }

    println!("Stock Ledger Demo Seeder");
    println!("========================");
    println!("Database: {}", config.database.path.display());
    println!();

    let db = Database::new(config.db_config()).await?;
    println!("✓ Connected, migrations applied");

    if db.catalog().get(PRODUCTS[0].0).await?.is_some() {
        println!("⚠ Demo catalog already present, skipping seed.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let manager = Actor::new("u-manager", "Store Manager");
    let clerk = Actor::new("u-clerk", "Annex Clerk");
    let now = Utc::now();

    for (id, name) in BRANCHES {
        db.branches()
            .upsert(&Branch {
                id: id.to_string(),
                name: name.to_string(),
                is_active: true,
                created_at: now,
            })
            .await?;
    }
    for (id, name, category, price_cents) in PRODUCTS {
        db.catalog()
            .upsert(&Product {
                id: id.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                price_cents: *price_cents,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
    }
    println!("✓ {} branches, {} products", BRANCHES.len(), PRODUCTS.len());

    for (product_id, quantity, cost_cents) in PURCHASES {
        db.inventory()
            .add_stock(product_id, "main", *quantity, *cost_cents, "Supplier delivery", &manager)
            .await?;
    }
    println!("✓ {} purchase lots received at main", PURCHASES.len());

    let transfer = db
        .transfers()
        .initiate_transfer(
            "main",
            "annex",
            &[
                NewTransferItem {
                    product_id: "bev-cola".to_string(),
                    quantity: 60,
                },
                NewTransferItem {
                    product_id: "snk-chips".to_string(),
                    quantity: 12,
                },
            ],
            Some("Weekend restock"),
            &manager,
        )
        .await?;
    db.transfers().complete_transfer(&transfer.id, &clerk).await?;
    for item in &transfer.items {
        println!(
            "✓ Moved {} x {} to annex at {} per unit",
            item.quantity, item.product_name, item.unit_cost_cents
        );
    }

    let baskets: &[(&str, &[(&str, i64)])] = &[
        ("annex", &[("bev-cola", 6), ("snk-chips", 2)]),
        ("annex", &[("bev-cola", 12)]),
        ("main", &[("gro-rice", 3), ("bev-water", 4)]),
        ("main", &[("gro-rice", 9)]),
    ];
    for (n, (branch_id, lines)) in baskets.iter().enumerate() {
        let lines: Vec<NewSaleLine> = lines
            .iter()
            .map(|(product_id, quantity)| {
                let price = PRODUCTS
                    .iter()
                    .find(|p| p.0 == *product_id)
                    .map_or(0, |p| p.3);
                NewSaleLine {
                    product_id: product_id.to_string(),
                    branch_id: None,
                    quantity: *quantity,
                    unit_price_cents: price,
                }
            })
            .collect();
        let amount_cents: i64 = lines.iter().map(|l| l.quantity * l.unit_price_cents).sum();
        let outcome = db
            .sales()
            .process_sale(
                &NewSale {
                    id: format!("demo-sale-{}", n + 1),
                    record_type: RecordType::Income,
                    amount_cents,
                    date: Utc::now(),
                    description: "Counter sale".to_string(),
                    category: "retail".to_string(),
                    payment_method: if n % 2 == 0 {
                        PaymentMethod::Cash
                    } else {
                        PaymentMethod::Card
                    },
                    branch_id: branch_id.to_string(),
                    lines,
                },
                &clerk,
            )
            .await?;
        info!(
            sale_id = %outcome.sale.id,
            amount = %outcome.sale.amount(),
            cost = %outcome.sale.total_cost(),
            "Demo sale posted"
        );
    }
    println!("✓ {} sales posted", baskets.len());

    db.sales()
        .record_expense(
            &NewSale {
                id: "demo-expense-1".to_string(),
                record_type: RecordType::Expense,
                amount_cents: 115_000,
                date: Utc::now(),
                description: "Monthly shop rent".to_string(),
                category: "Rent".to_string(),
                payment_method: PaymentMethod::BankTransfer,
                branch_id: "main".to_string(),
                lines: Vec::new(),
            },
            &manager,
        )
        .await?;
    println!("✓ Rent expense posted");

    let today = Utc::now();
    let summary = db
        .reports()
        .refresh_monthly_summary(today.year(), today.month(), None)
        .await?;
    let valuation = db.reports().inventory_valuation(None).await?;

    println!();
    println!("Period {}", summary.period);
    println!("  Revenue        {:>10}", summary.revenue_cents);
    println!("  COGS           {:>10}", summary.cogs_cents);
    println!("  Gross profit   {:>10}", summary.gross_profit_cents);
    println!("  Expenses       {:>10}", summary.expenses_cents);
    println!("  Net profit     {:>10}", summary.net_profit_cents);
    println!("  Sales          {:>10}", summary.sale_count);
    println!();
    println!("Inventory on hand");
    for branch in &valuation.branches {
        println!(
            "  {:<8} {:>5} units {:>10}",
            branch.branch_id, branch.units, branch.value_cents
        );
    }

    let discrepancies = db.inventory().find_discrepancies().await?;
    if !discrepancies.is_empty() {
        warn!(count = discrepancies.len(), "Stock aggregates disagree with layers");
    }

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
