//! # Expense Repository
//!
//! Operating expenses. Outside the stock ledger; only the financial summary
//! reads them.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use kasir_core::report::DateWindow;
use kasir_core::validation::{validate_label, validate_positive};
use kasir_core::{Expense, Money, PaymentMethod};

use crate::error::{DbError, DbResult};

const EXPENSE_COLUMNS: &str = "id, description, category, amount, payment_method, expense_date, \
     created_by, is_active, created_at";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewExpense {
    pub description: String,
    pub category: String,
    pub amount: Money,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Defaults to now.
    pub expense_date: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

/// Repository for expense database operations.
#[derive(Debug, Clone)]
pub struct ExpenseRepository {
    pool: SqlitePool,
}

impl ExpenseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ExpenseRepository { pool }
    }

    pub async fn create(&self, new: NewExpense) -> DbResult<Expense> {
        validate_label("description", &new.description, 255)?;
        validate_label("category", &new.category, 50)?;
        validate_positive("amount", new.amount)?;

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO expenses (
                id, description, category, amount, payment_method,
                expense_date, created_by, is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING {}",
            EXPENSE_COLUMNS
        );
        let expense = sqlx::query_as::<_, Expense>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(new.description.trim())
            .bind(new.category.trim())
            .bind(new.amount)
            .bind(new.payment_method)
            .bind(new.expense_date.unwrap_or(now))
            .bind(&new.created_by)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

        info!(expense_id = %expense.id, amount = %expense.amount, "Expense recorded");
        Ok(expense)
    }

    /// Expenses dated inside `window`, oldest first.
    pub async fn list(&self, window: &DateWindow, include_deleted: bool) -> DbResult<Vec<Expense>> {
        let (from, until) = window.bounds();
        let sql = format!(
            "SELECT {} FROM expenses
             WHERE expense_date >= ? AND expense_date < ? AND (is_active = 1 OR ?)
             ORDER BY expense_date, created_at",
            EXPENSE_COLUMNS
        );
        let expenses = sqlx::query_as::<_, Expense>(&sql)
            .bind(from)
            .bind(until)
            .bind(include_deleted)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = expenses.len(), "Listed expenses");
        Ok(expenses)
    }

    pub async fn soft_delete(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE expenses SET is_active = 0 WHERE id = ? AND is_active = 1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Expense", id));
        }

        Ok(())
    }

    /// Sum of active expenses dated inside `window`.
    pub async fn total_in_range(&self, window: &DateWindow) -> DbResult<Money> {
        let (from, until) = window.bounds();
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM expenses
             WHERE is_active = 1 AND expense_date >= ? AND expense_date < ?",
        )
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_minor(total))
    }
}
