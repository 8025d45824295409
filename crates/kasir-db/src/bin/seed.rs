//! # Seed Data Generator
//!
//! Fills a development database with a catalog, stock receipts and a day of
//! sales, then prints today's financial summary.
//!
//! ## Usage
//! ```bash
//! # 40 products (default), database from kasir.toml / KASIR_DB_PATH
//! cargo run -p kasir-db --bin seed
//!
//! # Custom amount and database path
//! cargo run -p kasir-db --bin seed -- --count 120 --db ./data/kasir_dev.db
//! ```
//!
//! ## Generated Data
//! - Products across four categories, code `{PREFIX}-{NNNN}`, EAN-13 style
//!   barcode, some with a carton alternate unit
//! - One purchase receipt per product
//! - Sales of one to three lines, roughly one per product
//! - A couple of expenses

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::Utc;
use kasir_core::report::DateWindow;
use kasir_core::{Category, Money};
use kasir_db::logging::init_tracing;
use kasir_db::{
    CreateSaleRequest, Database, KasirConfig, NewExpense, NewProduct, ProductDetails,
    ReceiveStock, SaleItemInput,
};

/// Categories with their code prefix and sample names.
const CATEGORIES: &[(&str, &str, &[&str])] = &[
    (
        "minuman",
        "MNM",
        &[
            "Teh Botol",
            "Aqua 600ml",
            "Kopi Kapal Api",
            "Susu Ultra",
            "Pocari Sweat",
            "Fanta Merah",
            "Good Day Mocca",
            "Yakult",
        ],
    ),
    (
        "makanan",
        "MKN",
        &[
            "Indomie Goreng",
            "Indomie Soto",
            "Chitato",
            "Roti Tawar",
            "Beng-Beng",
            "Oreo",
            "Taro Net",
            "Silverqueen",
        ],
    ),
    (
        "sembako",
        "SBK",
        &[
            "Beras 5kg",
            "Gula Pasir 1kg",
            "Minyak Goreng 2L",
            "Telur 1kg",
            "Tepung Terigu",
            "Garam Dapur",
            "Kecap Manis",
            "Saus Sambal",
        ],
    ),
    (
        "kebersihan",
        "KBR",
        &[
            "Sabun Lifebuoy",
            "Rinso 800g",
            "Sunlight 755ml",
            "Pepsodent",
            "Shampoo Sunsilk",
            "Tisu Paseo",
            "Baygon",
            "So Klin",
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 40;
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(40);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kasir POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>      Number of products to generate (default: 40)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("      --config <PATH>  Config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = KasirConfig::load_or_default(config_path);
    if db_path.is_some() {
        config.database.path = db_path;
    }
    init_tracing(&config.logging.filter);

    println!("🌱 Kasir POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", config.database_path().display());
    println!("Products: {}", count);
    println!();

    let db = Database::new(config.db_config()).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let categories: HashMap<String, Category> = CATEGORIES
        .iter()
        .map(|(id, prefix, _)| {
            (
                id.to_string(),
                Category {
                    id: id.to_string(),
                    name: id.to_string(),
                    prefix: prefix.to_string(),
                },
            )
        })
        .collect();

    // Catalog
    println!();
    println!("Generating products...");
    let start = std::time::Instant::now();
    let mut product_ids = Vec::with_capacity(count);

    for seed in 0..count {
        let new = generate_product(seed);
        match db.products().create(new, &categories).await {
            Ok(product) => product_ids.push(product.id),
            Err(e) => eprintln!("Failed to insert product {}: {}", seed, e),
        }
    }
    println!("✓ Generated {} products in {:?}", product_ids.len(), start.elapsed());

    // Receipts
    println!();
    println!("Receiving stock...");
    let inventory = db.inventory();
    for (seed, product_id) in product_ids.iter().enumerate() {
        let product = db.products().get_active(product_id).await?;
        let receipt = ReceiveStock {
            product_id: product_id.clone(),
            quantity: 12 + (seed % 5) as i64 * 6,
            unit: None,
            // Every third supplier charges a little more than last time.
            unit_cost: if seed % 3 == 0 {
                product.purchase_price + Money::from_minor(200)
            } else {
                product.purchase_price
            },
            supplier_ref: Some(format!("PO-{:05}", seed + 1)),
            notes: None,
            created_by: Some("seed".to_string()),
        };
        inventory.receive_stock(receipt).await?;
    }
    println!("✓ Received stock for {} products", product_ids.len());

    // Sales
    println!();
    println!("Recording sales...");
    let sales = db.sale_service();
    let mut recorded = 0;
    for seed in 0..product_ids.len() {
        let lines = 1 + seed % 3;
        let items: Vec<SaleItemInput> = (0..lines)
            .map(|offset| {
                let product_id = &product_ids[(seed * 7 + offset * 3) % product_ids.len()];
                SaleItemInput::new(product_id.clone(), 1 + ((seed + offset) % 4) as i64)
            })
            .collect();

        match sales.create_sale(CreateSaleRequest::finalized(items)).await {
            Ok(_) => recorded += 1,
            Err(e) => eprintln!("  Sale {} skipped: {}", seed, e),
        }
    }
    println!("✓ Recorded {} sales", recorded);

    // Expenses
    for (description, category, amount) in [
        ("Listrik bulan ini", "utilitas", 350_000),
        ("Kantong plastik", "operasional", 45_000),
    ] {
        db.expenses()
            .create(NewExpense {
                description: description.to_string(),
                category: category.to_string(),
                amount: Money::from_minor(amount),
                payment_method: Default::default(),
                expense_date: None,
                created_by: Some("seed".to_string()),
            })
            .await?;
    }
    println!("✓ Recorded expenses");

    // Summary
    let today = DateWindow::day(Utc::now().date_naive());
    let summary = db.finance().compute_financial_summary(today).await?;
    let low = db.inventory().low_stock_report().await?;

    println!();
    println!("Today ({})", today.start);
    println!("  Sales:        {}", summary.sale_count);
    println!("  Items sold:   {}", summary.items_sold);
    println!("  Revenue:      {}", summary.revenue);
    println!("  HPP:          {}", summary.hpp);
    println!("  Gross profit: {} ({:.2}%)", summary.gross_profit, summary.gross_margin_pct);
    println!("  Expenses:     {}", summary.expenses);
    println!("  Net profit:   {} ({:.2}%)", summary.net_profit, summary.net_margin_pct);
    println!("  Low stock:    {} products", low.len());

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}

/// Builds a deterministic product for `seed`.
fn generate_product(seed: usize) -> NewProduct {
    let (category_id, prefix, names) = CATEGORIES[seed % CATEGORIES.len()];
    let name = names[(seed / CATEGORIES.len()) % names.len()];
    let batch = seed / (CATEGORIES.len() * names.len());

    let name = if batch == 0 {
        name.to_string()
    } else {
        format!("{} #{}", name, batch + 1)
    };

    // Rp 2.000 - Rp 41.500 in steps of 500, cost 70-85% of price
    let selling = 2_000 + ((seed * 37) % 80) as i64 * 500;
    let cost_pct = 70 + (seed % 16) as i64;
    let purchase = selling * cost_pct / 100;

    // Every fourth product also sells by the carton
    let (alt_unit, alt_unit_factor) = if seed % 4 == 0 {
        (Some("dus".to_string()), Some(24))
    } else {
        (None, None)
    };

    NewProduct {
        code: format!("{}-{:04}", prefix, seed + 1),
        details: ProductDetails {
            name,
            barcode: Some(format!("899{:010}", seed + 1)),
            category_id: Some(category_id.to_string()),
            purchase_price: Money::from_minor(purchase),
            selling_price: Money::from_minor(selling),
            unit: "pcs".to_string(),
            alt_unit,
            alt_unit_factor,
            min_stock: 5 + (seed % 6) as i64,
        },
        opening_stock: (seed % 4) as i64 * 3,
        created_by: Some("seed".to_string()),
    }
}
