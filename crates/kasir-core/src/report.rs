//! # Report Math
//!
//! Derived figures for the read side: HPP and margins, the financial
//! summary, low-stock classification and stock valuation.
//!
//! The database layer fetches rows; everything here is arithmetic over
//! those rows, so the numbers are testable without a database.
//!
//! ## HPP Composition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SoldLine (one per finalized, active sale item in the window)          │
//! │      │                                                                  │
//! │      ▼  group by product                                               │
//! │  ProductHpp { quantity_sold, revenue, hpp, margin, margin_pct }        │
//! │      │                                                                  │
//! │      ▼  Σ                                                               │
//! │  HppReport { total_revenue, total_hpp, total_margin }                  │
//! │      │                                                                  │
//! │      ▼  + expenses                                                      │
//! │  FinancialSummary { gross_profit, net_profit, margins % }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{Product, StockStatus};
use crate::validation::validate_date_range;

// =============================================================================
// Report Window
// =============================================================================

/// Inclusive date window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DateWindow {
    #[ts(as = "String")]
    pub start: NaiveDate,
    #[ts(as = "String")]
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        validate_date_range(start, end)?;
        Ok(Self { start, end })
    }

    /// Single day window.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Half-open UTC bounds `[start 00:00, end+1 00:00)`.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = NaiveTime::default();
        let from = Utc.from_utc_datetime(&self.start.and_time(midnight));
        let next = self.end.succ_opt().unwrap_or(NaiveDate::MAX);
        let until = Utc.from_utc_datetime(&next.and_time(midnight));
        (from, until)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let (from, until) = self.bounds();
        at >= from && at < until
    }
}

// =============================================================================
// HPP
// =============================================================================

/// Which cost HPP is computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum HppCostBasis {
    /// The product's purchase price today. Historical margins move when
    /// cost changes.
    #[default]
    Current,
    /// The unit cost captured on the sale item when stock left. Falls back
    /// to current cost for items that carry no snapshot.
    Snapshot,
}

impl fmt::Display for HppCostBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HppCostBasis::Current => f.write_str("current"),
            HppCostBasis::Snapshot => f.write_str("snapshot"),
        }
    }
}

impl FromStr for HppCostBasis {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(HppCostBasis::Current),
            "snapshot" => Ok(HppCostBasis::Snapshot),
            _ => Err(ValidationError::NotAllowed {
                field: "hpp_cost_basis".to_string(),
                allowed: vec!["current".to_string(), "snapshot".to_string()],
            }),
        }
    }
}

/// One sold line feeding the HPP computation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SoldLine {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    /// Line total actually charged.
    pub revenue: Money,
    pub current_cost: Money,
    pub snapshot_cost: Option<Money>,
}

impl SoldLine {
    pub fn unit_cost(&self, basis: HppCostBasis) -> Money {
        match basis {
            HppCostBasis::Current => self.current_cost,
            HppCostBasis::Snapshot => self.snapshot_cost.unwrap_or(self.current_cost),
        }
    }
}

/// Per-product HPP breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductHpp {
    pub product_id: String,
    pub product_name: String,
    pub quantity_sold: i64,
    pub revenue: Money,
    pub hpp: Money,
    pub margin: Money,
    pub margin_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct HppReport {
    pub window: DateWindow,
    pub basis: HppCostBasis,
    pub total_revenue: Money,
    pub total_hpp: Money,
    pub total_margin: Money,
    pub margin_pct: f64,
    pub items_sold: i64,
    /// Highest revenue first.
    pub products: Vec<ProductHpp>,
}

/// Report totals clamp instead of overflowing on stored figures.
fn saturating_sum(amounts: impl Iterator<Item = Money>) -> Money {
    amounts.fold(Money::zero(), |acc, amount| acc.saturating_add(amount))
}

/// Groups sold lines by product and totals them.
pub fn compute_hpp(window: DateWindow, basis: HppCostBasis, lines: &[SoldLine]) -> HppReport {
    let mut grouped: BTreeMap<&str, ProductHpp> = BTreeMap::new();

    for line in lines {
        let entry = grouped
            .entry(line.product_id.as_str())
            .or_insert_with(|| ProductHpp {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                quantity_sold: 0,
                revenue: Money::zero(),
                hpp: Money::zero(),
                margin: Money::zero(),
                margin_pct: 0.0,
            });
        entry.quantity_sold += line.quantity;
        entry.revenue = entry.revenue.saturating_add(line.revenue);
        entry.hpp = entry
            .hpp
            .saturating_add(line.unit_cost(basis).saturating_multiply_quantity(line.quantity));
    }

    let mut products: Vec<ProductHpp> = grouped
        .into_values()
        .map(|mut p| {
            p.margin = p.revenue - p.hpp;
            p.margin_pct = p.margin.percentage_of(p.revenue);
            p
        })
        .collect();
    products.sort_by(|a, b| {
        b.revenue
            .cmp(&a.revenue)
            .then_with(|| a.product_name.cmp(&b.product_name))
    });

    let total_revenue = saturating_sum(products.iter().map(|p| p.revenue));
    let total_hpp = saturating_sum(products.iter().map(|p| p.hpp));
    let total_margin = total_revenue - total_hpp;

    HppReport {
        window,
        basis,
        total_revenue,
        total_hpp,
        total_margin,
        margin_pct: total_margin.percentage_of(total_revenue),
        items_sold: products.iter().map(|p| p.quantity_sold).sum(),
        products,
    }
}

// =============================================================================
// Financial Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FinancialSummary {
    pub window: DateWindow,
    pub revenue: Money,
    pub hpp: Money,
    pub gross_profit: Money,
    pub expenses: Money,
    pub net_profit: Money,
    /// Percent of revenue, 0 when revenue is 0.
    pub gross_margin_pct: f64,
    pub net_margin_pct: f64,
    pub sale_count: i64,
    pub items_sold: i64,
}

impl FinancialSummary {
    pub fn compose(hpp: &HppReport, expenses: Money, sale_count: i64) -> Self {
        let gross_profit = hpp.total_revenue - hpp.total_hpp;
        let net_profit = gross_profit - expenses;

        Self {
            window: hpp.window,
            revenue: hpp.total_revenue,
            hpp: hpp.total_hpp,
            gross_profit,
            expenses,
            net_profit,
            gross_margin_pct: gross_profit.percentage_of(hpp.total_revenue),
            net_margin_pct: net_profit.percentage_of(hpp.total_revenue),
            sale_count,
            items_sold: hpp.items_sold,
        }
    }
}

// =============================================================================
// Low Stock
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LowStockEntry {
    pub product_id: String,
    pub code: String,
    pub name: String,
    pub stock: i64,
    pub min_stock: i64,
    pub unit: String,
    pub status: StockStatus,
}

/// Active products at or below their threshold, emptiest first.
pub fn low_stock(products: &[Product]) -> Vec<LowStockEntry> {
    let mut entries: Vec<LowStockEntry> = products
        .iter()
        .filter(|p| p.is_active)
        .filter_map(|p| {
            p.stock_status().map(|status| LowStockEntry {
                product_id: p.id.clone(),
                code: p.code.clone(),
                name: p.name.clone(),
                stock: p.stock,
                min_stock: p.min_stock,
                unit: p.unit.clone(),
                status,
            })
        })
        .collect();
    entries.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
    entries
}

// =============================================================================
// Stock Value
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockValueRow {
    pub product_id: String,
    pub code: String,
    pub name: String,
    pub stock: i64,
    pub purchase_price: Money,
    pub selling_price: Money,
    /// `stock × purchase_price`
    pub cost_value: Money,
    /// `stock × selling_price`
    pub retail_value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockValueReport {
    pub rows: Vec<StockValueRow>,
    pub total_cost_value: Money,
    pub total_retail_value: Money,
    /// `total_retail_value − total_cost_value`
    pub potential_margin: Money,
}

pub fn stock_value(products: &[Product]) -> StockValueReport {
    let rows: Vec<StockValueRow> = products
        .iter()
        .filter(|p| p.is_active)
        .map(|p| StockValueRow {
            product_id: p.id.clone(),
            code: p.code.clone(),
            name: p.name.clone(),
            stock: p.stock,
            purchase_price: p.purchase_price,
            selling_price: p.selling_price,
            cost_value: p.purchase_price.saturating_multiply_quantity(p.stock),
            retail_value: p.selling_price.saturating_multiply_quantity(p.stock),
        })
        .collect();

    let total_cost_value = saturating_sum(rows.iter().map(|r| r.cost_value));
    let total_retail_value = saturating_sum(rows.iter().map(|r| r.retail_value));

    StockValueReport {
        rows,
        total_cost_value,
        total_retail_value,
        potential_margin: total_retail_value - total_cost_value,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> DateWindow {
        let d = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        DateWindow::day(d)
    }

    fn sold(product: &str, qty: i64, revenue: i64, current: i64, snapshot: Option<i64>) -> SoldLine {
        SoldLine {
            product_id: product.to_string(),
            product_name: format!("Produk {}", product),
            quantity: qty,
            revenue: Money::from_minor(revenue),
            current_cost: Money::from_minor(current),
            snapshot_cost: snapshot.map(Money::from_minor),
        }
    }

    fn product(id: &str, stock: i64, min_stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            code: format!("C-{}", id),
            barcode: None,
            name: format!("Produk {}", id),
            category_id: None,
            purchase_price: Money::from_minor(1000),
            selling_price: Money::from_minor(1500),
            stock,
            unit: "pcs".to_string(),
            alt_unit: None,
            alt_unit_factor: None,
            min_stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_window_bounds_are_half_open() {
        let w = window();
        let (from, until) = w.bounds();
        assert_eq!(from.to_rfc3339(), "2026-10-18T00:00:00+00:00");
        assert_eq!(until.to_rfc3339(), "2026-10-19T00:00:00+00:00");
        assert!(w.contains(from));
        assert!(!w.contains(until));
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        let a = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        assert!(DateWindow::new(a, b).is_err());
        assert!(DateWindow::new(b, a).is_ok());
    }

    #[test]
    fn test_hpp_single_sale_scenario() {
        // 3 units sold at 1500, cost 1000
        let report = compute_hpp(window(), HppCostBasis::Current, &[sold("p", 3, 4500, 1000, None)]);
        assert_eq!(report.total_hpp.minor(), 3000);
        assert_eq!(report.total_revenue.minor(), 4500);
        assert_eq!(report.total_margin.minor(), 1500);
        assert_eq!(report.margin_pct, 33.33);
        assert_eq!(report.items_sold, 3);
        assert_eq!(report.products.len(), 1);
    }

    #[test]
    fn test_hpp_groups_and_orders_by_revenue() {
        let lines = vec![
            sold("a", 1, 1500, 1000, None),
            sold("b", 2, 10_000, 4000, None),
            sold("a", 2, 3000, 1000, None),
        ];
        let report = compute_hpp(window(), HppCostBasis::Current, &lines);

        assert_eq!(report.products[0].product_id, "b");
        assert_eq!(report.products[1].quantity_sold, 3);
        assert_eq!(report.products[1].hpp.minor(), 3000);
        assert_eq!(report.total_hpp.minor(), 11_000);
    }

    #[test]
    fn test_hpp_cost_basis() {
        // cost went up from 1000 to 1200 after the sale
        let lines = vec![sold("p", 3, 4500, 1200, Some(1000)), sold("p", 1, 1500, 1200, None)];

        let current = compute_hpp(window(), HppCostBasis::Current, &lines);
        assert_eq!(current.total_hpp.minor(), 4800);

        let snapshot = compute_hpp(window(), HppCostBasis::Snapshot, &lines);
        assert_eq!(snapshot.total_hpp.minor(), 4200);
    }

    #[test]
    fn test_empty_window_has_zero_margins() {
        let report = compute_hpp(window(), HppCostBasis::Current, &[]);
        let summary = FinancialSummary::compose(&report, Money::from_minor(2000), 0);
        assert_eq!(summary.revenue, Money::zero());
        assert_eq!(summary.net_profit.minor(), -2000);
        assert_eq!(summary.gross_margin_pct, 0.0);
        assert_eq!(summary.net_margin_pct, 0.0);
    }

    #[test]
    fn test_financial_summary() {
        let report = compute_hpp(window(), HppCostBasis::Current, &[sold("p", 3, 4500, 1000, None)]);
        let summary = FinancialSummary::compose(&report, Money::from_minor(500), 1);
        assert_eq!(summary.gross_profit.minor(), 1500);
        assert_eq!(summary.net_profit.minor(), 1000);
        assert_eq!(summary.net_margin_pct, 22.22);
        assert_eq!(summary.sale_count, 1);
        assert_eq!(summary.items_sold, 3);
    }

    #[test]
    fn test_low_stock_tags() {
        let mut inactive = product("x", 0, 5);
        inactive.is_active = false;
        let products = vec![product("a", 7, 5), product("b", 3, 5), product("c", 0, 5), inactive];

        let report = low_stock(&products);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].product_id, "c");
        assert_eq!(report[0].status, StockStatus::Habis);
        assert_eq!(report[1].status, StockStatus::Menipis);
    }

    #[test]
    fn test_stock_value() {
        let report = stock_value(&[product("a", 7, 5), product("b", 2, 5)]);
        assert_eq!(report.rows[0].cost_value.minor(), 7000);
        assert_eq!(report.rows[0].retail_value.minor(), 10_500);
        assert_eq!(report.total_cost_value.minor(), 9000);
        assert_eq!(report.total_retail_value.minor(), 13_500);
        assert_eq!(report.potential_margin.minor(), 4500);
    }

    #[test]
    fn test_cost_basis_parsing() {
        assert_eq!("Snapshot".parse::<HppCostBasis>().unwrap(), HppCostBasis::Snapshot);
        assert!("fifo".parse::<HppCostBasis>().is_err());
        assert_eq!(HppCostBasis::default(), HppCostBasis::Current);
    }
}
