//! Row-level data access for Metarel.
//!
//! [`TableAccessor`] is the thin asynchronous layer over one table (or one
//! derived/base table pair): it compiles row queries with the shared
//! [`QueryBuilder`] and executes them through the injected [`SqlExecutor`].
//! Everything here speaks physical columns and flat [`Row`]s; entity
//! semantics (property codes, relations, events) live a layer up.

use asupersync::{Cx, Outcome};
use metarel_core::{try_outcome, Error, Pagination, Row, SqlExecutor, Value};
use metarel_query::{
    ColumnRef, DeleteStatement, InsertStatement, QueryBuilder, RowFilter, RowOrderBy, SelectQuery,
    TableRef, UpdateStatement,
};
use tracing::debug;

/// The table (pair) an accessor operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Schema override; the builder's default schema applies when absent.
    pub schema: Option<String>,
    /// The primary table.
    pub table: String,
    /// Base table joined on id equality for derived-model reads.
    pub base_table: Option<String>,
}

impl TableSpec {
    /// A plain single-table spec in the default schema.
    pub fn new(table: impl Into<String>) -> Self {
        TableSpec {
            schema: None,
            table: table.into(),
            base_table: None,
        }
    }
}

/// The shape of a row-level read.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    /// Columns to select; empty selects every column.
    pub columns: Vec<ColumnRef>,
    pub filters: Vec<RowFilter>,
    pub order_by: Vec<RowOrderBy>,
    pub pagination: Option<Pagination>,
}

impl RowQuery {
    /// A full-row query with only filters.
    pub fn filtered(filters: Vec<RowFilter>) -> Self {
        RowQuery {
            filters,
            ..RowQuery::default()
        }
    }
}

/// CRUD over one table through an executor.
///
/// Borrowed construction is deliberate: the entity manager builds accessors
/// per operation from its shared executor and builder.
pub struct TableAccessor<'a, E: SqlExecutor> {
    executor: &'a E,
    builder: &'a QueryBuilder,
    spec: TableSpec,
}

impl<'a, E: SqlExecutor> TableAccessor<'a, E> {
    pub fn new(executor: &'a E, builder: &'a QueryBuilder, spec: TableSpec) -> Self {
        TableAccessor {
            executor,
            builder,
            spec,
        }
    }

    fn table_ref(&self) -> TableRef {
        TableRef {
            schema: self.spec.schema.clone(),
            name: self.spec.table.clone(),
        }
    }

    fn base_table_ref(&self) -> Option<TableRef> {
        self.spec.base_table.as_ref().map(|name| TableRef {
            schema: self.spec.schema.clone(),
            name: name.clone(),
        })
    }

    /// Find all rows matching a query. Joins the base table when the spec
    /// names one.
    pub async fn find(&self, cx: &Cx, query: &RowQuery) -> Outcome<Vec<Row>, Error> {
        let select = SelectQuery {
            table: self.table_ref(),
            base_table: self.base_table_ref(),
            columns: query.columns.clone(),
            filters: query.filters.clone(),
            order_by: query.order_by.clone(),
            pagination: query.pagination,
        };
        let (sql, params) = match self.builder.select(&select) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "find rows");
        self.executor.query(cx, &sql, &params).await
    }

    /// Find the single row with the given id.
    pub async fn find_by_id(&self, cx: &Cx, id: Value) -> Outcome<Option<Row>, Error> {
        let column = match &self.spec.base_table {
            Some(_) => ColumnRef::qualified(self.spec.table.clone(), "id"),
            None => ColumnRef::new("id"),
        };
        let query = RowQuery::filtered(vec![RowFilter::Relational {
            operator: metarel_core::RelationalOp::Eq,
            column,
            value: id,
        }]);
        let rows = try_outcome!(self.find(cx, &query).await);
        Outcome::Ok(rows.into_iter().next())
    }

    /// Count rows matching the filters.
    pub async fn count(&self, cx: &Cx, filters: Vec<RowFilter>) -> Outcome<i64, Error> {
        let select = SelectQuery {
            table: self.table_ref(),
            base_table: self.base_table_ref(),
            filters,
            ..SelectQuery::from(self.table_ref())
        };
        let (sql, params) = match self.builder.count(&select) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "count rows");
        let rows = try_outcome!(self.executor.query(cx, &sql, &params).await);
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Outcome::Ok(count)
    }

    /// Insert one row and return it as stored.
    pub async fn create(&self, cx: &Cx, row: Row) -> Outcome<Row, Error> {
        let statement = InsertStatement {
            table: self.table_ref(),
            row,
            on_conflict_do_nothing: false,
            returning: true,
        };
        let (sql, params) = match self.builder.insert(&statement) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "insert row");
        let mut rows = try_outcome!(self.executor.query(cx, &sql, &params).await);
        match rows.pop() {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::Database(format!(
                "insert into '{}' returned no row",
                self.spec.table
            ))),
        }
    }

    /// Insert a row tolerating unique-constraint conflicts. Returns nothing;
    /// used for link-table rows.
    pub async fn create_ignoring_conflict(&self, cx: &Cx, row: Row) -> Outcome<(), Error> {
        let statement = InsertStatement {
            table: self.table_ref(),
            row,
            on_conflict_do_nothing: true,
            returning: false,
        };
        let (sql, params) = match self.builder.insert(&statement) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "insert link row");
        try_outcome!(self.executor.query(cx, &sql, &params).await);
        Outcome::Ok(())
    }

    /// Update the row with the given id, returning it as stored.
    pub async fn update_by_id(
        &self,
        cx: &Cx,
        id: Value,
        changes: Row,
    ) -> Outcome<Option<Row>, Error> {
        let statement = UpdateStatement {
            table: self.table_ref(),
            changes,
            filters: vec![RowFilter::eq("id", id)],
            returning: true,
        };
        let (sql, params) = match self.builder.update(&statement) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "update row");
        let mut rows = try_outcome!(self.executor.query(cx, &sql, &params).await);
        Outcome::Ok(rows.pop())
    }

    /// Delete the row with the given id. Deleting an absent id is a no-op.
    pub async fn delete_by_id(&self, cx: &Cx, id: Value) -> Outcome<(), Error> {
        self.delete_where(cx, vec![RowFilter::eq("id", id)]).await
    }

    /// Delete every row matching the filters.
    pub async fn delete_where(&self, cx: &Cx, filters: Vec<RowFilter>) -> Outcome<(), Error> {
        let statement = DeleteStatement {
            table: self.table_ref(),
            filters,
        };
        let (sql, params) = match self.builder.delete(&statement) {
            Ok(compiled) => compiled,
            Err(err) => return Outcome::Err(err),
        };
        debug!(table = %self.spec.table, %sql, "delete rows");
        try_outcome!(self.executor.query(cx, &sql, &params).await);
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex;

    /// Records every statement and replays queued result sets in order.
    struct ScriptedExecutor {
        statements: Mutex<Vec<(String, Vec<Value>)>>,
        results: Mutex<Vec<Vec<Row>>>,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<Vec<Row>>) -> Self {
            ScriptedExecutor {
                statements: Mutex::new(Vec::new()),
                results: Mutex::new(results),
            }
        }

        fn executed(&self) -> Vec<(String, Vec<Value>)> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl SqlExecutor for ScriptedExecutor {
        fn query(
            &self,
            _cx: &Cx,
            sql: &str,
            params: &[Value],
        ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            let mut results = self.results.lock().unwrap();
            let rows = if results.is_empty() {
                Vec::new()
            } else {
                results.remove(0)
            };
            std::future::ready(Outcome::Ok(rows))
        }
    }

    fn run<T>(fut: impl Future<Output = Outcome<T, Error>>) -> T {
        let rt = asupersync::runtime::RuntimeBuilder::current_thread()
            .build()
            .expect("runtime");
        match rt.block_on(fut) {
            Outcome::Ok(value) => value,
            Outcome::Err(err) => panic!("operation failed: {err}"),
            Outcome::Cancelled(_) => panic!("operation cancelled"),
            Outcome::Panicked(_) => panic!("operation panicked"),
        }
    }

    #[test]
    fn test_find_by_id_returns_first_row() {
        let row: Row = vec![("id", 7i64)].into();
        let executor = ScriptedExecutor::new(vec![vec![row.clone()]]);
        let builder = QueryBuilder::new();
        let accessor = TableAccessor::new(&executor, &builder, TableSpec::new("oc_user"));
        let cx = Cx::for_testing();
        let found = run(async { accessor.find_by_id(&cx, Value::Int(7)).await });
        assert_eq!(found, Some(row));
        let executed = executor.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "SELECT * FROM \"oc_user\" WHERE \"id\" = $1");
    }

    #[test]
    fn test_count_reads_count_column() {
        let executor =
            ScriptedExecutor::new(vec![vec![vec![("count", 42i64)].into()]]);
        let builder = QueryBuilder::new();
        let accessor = TableAccessor::new(&executor, &builder, TableSpec::new("oc_user"));
        let cx = Cx::for_testing();
        let count = run(async { accessor.count(&cx, Vec::new()).await });
        assert_eq!(count, 42);
    }

    #[test]
    fn test_create_returns_stored_row() {
        let stored: Row = vec![("id", Value::Int(1)), ("login", Value::Text("admin".into()))].into();
        let executor = ScriptedExecutor::new(vec![vec![stored.clone()]]);
        let builder = QueryBuilder::new();
        let accessor = TableAccessor::new(&executor, &builder, TableSpec::new("oc_user"));
        let cx = Cx::for_testing();
        let row: Row = vec![("login", Value::Text("admin".into()))].into();
        let created = run(async { accessor.create(&cx, row).await });
        assert_eq!(created, stored);
        assert!(executor.executed()[0].0.ends_with("RETURNING *"));
    }

    #[test]
    fn test_derived_find_joins_base_table() {
        let executor = ScriptedExecutor::new(Vec::new());
        let builder = QueryBuilder::new();
        let spec = TableSpec {
            schema: None,
            table: "oc_user".to_string(),
            base_table: Some("base_record".to_string()),
        };
        let accessor = TableAccessor::new(&executor, &builder, spec);
        let cx = Cx::for_testing();
        let _ = run(async { accessor.find(&cx, &RowQuery::default()).await });
        let (sql, _) = &executor.executed()[0];
        assert!(sql.contains("LEFT JOIN \"base_record\" ON \"oc_user\".id = \"base_record\".id"));
    }
}
