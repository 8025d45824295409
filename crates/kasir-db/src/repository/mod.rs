//! # Repository Module
//!
//! Table-level database access for the ledger.
//!
//! ## Two Kinds of Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  &self methods              run on the pool, one statement each         │
//! │  ├── get_by_id, list, create, soft_delete ...                          │
//! │                                                                         │
//! │  Type::*_in(conn, ..)       run on the caller's connection              │
//! │  ├── ProductRepository::try_decrement_in                               │
//! │  ├── StockMovementRepository::append_in                                │
//! │  └── SaleRepository::insert_sale_in ...                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  composed by the services inside one Transaction                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog and stock primitives
//! - [`ledger::StockMovementRepository`] - Append-only stock ledger
//! - [`sale::SaleRepository`] - Sales and sale items
//! - [`expense::ExpenseRepository`] - Operating expenses

pub mod expense;
pub mod ledger;
pub mod product;
pub mod sale;
