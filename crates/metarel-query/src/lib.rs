//! SQL statement construction for Metarel.
//!
//! `metarel-query` is the pure layer between entity semantics and the
//! database: it takes column-level filter trees and row data and compiles
//! them into `(String, Vec<Value>)` statement pairs with `$n` placeholders.
//! Nothing here talks to a database or knows about models; the facade's
//! filter compiler lowers entity filters into the [`RowFilter`] trees this
//! crate consumes.

pub mod builder;
pub mod filter;

pub use builder::{DeleteStatement, InsertStatement, QueryBuilder, SelectQuery, TableRef, UpdateStatement};
pub use filter::{ColumnRef, RowFilter, RowOrderBy};
