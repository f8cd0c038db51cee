//! The statement-execution boundary.

use std::future::Future;
use std::sync::Arc;

use asupersync::{Cx, Outcome};

use crate::data::Row;
use crate::error::Error;
use crate::value::Value;

/// Executes parameterized SQL statements against a database.
///
/// This is the engine's only contact with a driver: statements are compiled
/// upstream into `(sql, params)` pairs with `$n` placeholders, and every
/// result comes back as untyped [`Row`]s. Statements without a result set
/// (e.g. `DELETE` without `RETURNING`) resolve to an empty vector.
///
/// Implementations must be safe to share across tasks.
pub trait SqlExecutor: Send + Sync {
    /// Execute one statement and collect its result rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;
}

impl<E: SqlExecutor> SqlExecutor for Arc<E> {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        (**self).query(cx, sql, params)
    }
}
