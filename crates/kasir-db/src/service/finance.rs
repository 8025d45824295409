//! # Cost & Financial Aggregator
//!
//! Read-only. HPP (cost of goods sold) and profit for a date window, built
//! from finalized, active sale lines and active expenses. Takes no locks and
//! may trail concurrent writers slightly.

use tracing::debug;

use kasir_core::report::{compute_hpp, DateWindow, FinancialSummary, HppCostBasis, HppReport};

use crate::error::DbResult;
use crate::pool::Database;

#[derive(Debug, Clone)]
pub struct FinanceService {
    db: Database,
}

impl FinanceService {
    pub fn new(db: Database) -> Self {
        FinanceService { db }
    }

    /// HPP with the configured cost basis.
    pub async fn compute_hpp(&self, window: DateWindow) -> DbResult<HppReport> {
        let basis = self.db.settings().hpp_cost_basis;
        self.compute_hpp_with(window, basis).await
    }

    /// HPP with an explicit cost basis.
    pub async fn compute_hpp_with(
        &self,
        window: DateWindow,
        basis: HppCostBasis,
    ) -> DbResult<HppReport> {
        let lines = self.db.sales().sold_lines(&window).await?;
        let report = compute_hpp(window, basis, &lines);

        debug!(
            start = %window.start,
            end = %window.end,
            %basis,
            revenue = %report.total_revenue,
            hpp = %report.total_hpp,
            "Computed HPP"
        );
        Ok(report)
    }

    /// Revenue, HPP, expenses and both profits for the window.
    pub async fn compute_financial_summary(&self, window: DateWindow) -> DbResult<FinancialSummary> {
        let hpp = self.compute_hpp(window).await?;
        let expenses = self.db.expenses().total_in_range(&window).await?;
        let sale_count = self.db.sales().count_finalized(&window).await?;

        Ok(FinancialSummary::compose(&hpp, expenses, sale_count))
    }
}
