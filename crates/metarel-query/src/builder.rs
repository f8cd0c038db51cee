//! Statement builders for SELECT, COUNT, INSERT, UPDATE and DELETE.
//!
//! Every builder method is pure: it returns the statement text with `$n`
//! placeholders and the parameter vector in binding order. Identifiers are
//! always double-quoted (embedded quotes doubled); values only ever travel
//! as bound parameters, including the wildcard-injected operands of the
//! string-match operators.

use metarel_core::{
    Error, LogicalOp, MatchOp, Pagination, RelationalOp, Result, Row, SetOp, UnaryOp, Value,
};

use crate::filter::{ColumnRef, RowFilter, RowOrderBy};

/// A table reference, optionally schema-qualified.
///
/// When no schema is given the builder's default schema applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// A table in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        TableRef {
            schema: None,
            name: name.into(),
        }
    }

    /// A table with an explicit schema override.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableRef {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

/// A SELECT (or COUNT) over one table, optionally joined to its base table.
///
/// When `base_table` is set the statement becomes a derived-table query:
/// `FROM derived LEFT JOIN base ON derived.id = base.id`, with columns
/// table-qualified. Empty `columns` selects `*` (or `"derived".*` when
/// joined).
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub table: TableRef,
    pub base_table: Option<TableRef>,
    pub columns: Vec<ColumnRef>,
    pub filters: Vec<RowFilter>,
    pub order_by: Vec<RowOrderBy>,
    pub pagination: Option<Pagination>,
}

impl Default for TableRef {
    fn default() -> Self {
        TableRef::new("")
    }
}

impl SelectQuery {
    /// A bare `SELECT * FROM table`.
    pub fn from(table: TableRef) -> Self {
        SelectQuery {
            table,
            base_table: None,
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
        }
    }
}

/// A single-row INSERT.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub table: TableRef,
    /// Column name → value. [`Value::Json`] cells are serialized and bound
    /// with a `::jsonb` cast.
    pub row: Row,
    /// Tolerate unique-constraint conflicts (`ON CONFLICT DO NOTHING`).
    pub on_conflict_do_nothing: bool,
    /// Append `RETURNING *`.
    pub returning: bool,
}

/// An UPDATE of the columns in `changes` on every row matching `filters`.
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub table: TableRef,
    pub changes: Row,
    pub filters: Vec<RowFilter>,
    pub returning: bool,
}

/// A DELETE of every row matching `filters`.
#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub table: TableRef,
    pub filters: Vec<RowFilter>,
}

/// Compiles statements against a database with an optional default schema.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    default_schema: Option<String>,
}

impl QueryBuilder {
    /// A builder with no default schema; unqualified tables quote bare.
    pub fn new() -> Self {
        QueryBuilder {
            default_schema: None,
        }
    }

    /// A builder whose unqualified tables quote as `"schema"."table"`.
    pub fn with_default_schema(schema: impl Into<String>) -> Self {
        QueryBuilder {
            default_schema: Some(schema.into()),
        }
    }

    /// Quote an identifier, doubling any embedded quotes.
    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a table reference, applying the default schema when the
    /// reference carries none.
    pub fn quote_table(&self, table: &TableRef) -> String {
        let schema = table.schema.as_deref().or(self.default_schema.as_deref());
        match schema {
            Some(schema) => format!("{}.{}", self.quote_ident(schema), self.quote_ident(&table.name)),
            None => self.quote_ident(&table.name),
        }
    }

    fn quote_column(&self, column: &ColumnRef, emit_table: bool) -> String {
        match (&column.table, emit_table) {
            (Some(table), true) => {
                format!("{}.{}", self.quote_ident(table), self.quote_ident(&column.name))
            }
            _ => self.quote_ident(&column.name),
        }
    }

    /// Compile a SELECT statement.
    pub fn select(&self, query: &SelectQuery) -> Result<(String, Vec<Value>)> {
        let emit_table = query.base_table.is_some();
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");

        if query.columns.is_empty() {
            if emit_table {
                sql.push_str(&format!("{}.*", self.quote_ident(&query.table.name)));
            } else {
                sql.push('*');
            }
        } else {
            let columns: Vec<_> = query
                .columns
                .iter()
                .map(|c| self.quote_column(c, emit_table))
                .collect();
            sql.push_str(&columns.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.from_clause(query));

        if !query.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.build_filters(&mut params, &query.filters, emit_table)?);
        }

        if !query.order_by.is_empty() {
            let terms: Vec<_> = query
                .order_by
                .iter()
                .map(|item| {
                    let column = self.quote_column(&item.column, emit_table);
                    if item.desc { format!("{column} DESC") } else { column }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(pagination) = query.pagination {
            params.push(Value::Int(i64::try_from(pagination.offset).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" OFFSET ${}", params.len()));
            params.push(Value::Int(i64::try_from(pagination.limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        Ok((sql, params))
    }

    /// Compile a `COUNT(*)` statement. The single result column is named
    /// `count` and cast to int.
    pub fn count(&self, query: &SelectQuery) -> Result<(String, Vec<Value>)> {
        let emit_table = query.base_table.is_some();
        let mut params = Vec::new();
        let mut sql = String::from("SELECT COUNT(*)::int AS \"count\" FROM ");
        sql.push_str(&self.from_clause(query));

        if !query.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.build_filters(&mut params, &query.filters, emit_table)?);
        }

        Ok((sql, params))
    }

    /// Compile an INSERT. Inserting an empty row is an error.
    pub fn insert(&self, statement: &InsertStatement) -> Result<(String, Vec<Value>)> {
        if statement.row.is_empty() {
            return Err(Error::Query(format!(
                "cannot insert an empty row into '{}'",
                statement.table.name
            )));
        }

        let mut params = Vec::new();
        let mut columns = Vec::with_capacity(statement.row.len());
        let mut placeholders = Vec::with_capacity(statement.row.len());
        for (column, value) in statement.row.iter() {
            columns.push(self.quote_ident(column));
            placeholders.push(bind_value(&mut params, value)?);
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_table(&statement.table),
            columns.join(", "),
            placeholders.join(", ")
        );
        if statement.on_conflict_do_nothing {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }
        if statement.returning {
            sql.push_str(" RETURNING *");
        }

        Ok((sql, params))
    }

    /// Compile an UPDATE. Updating no columns is an error.
    pub fn update(&self, statement: &UpdateStatement) -> Result<(String, Vec<Value>)> {
        if statement.changes.is_empty() {
            return Err(Error::Query(format!(
                "update of '{}' changes no columns",
                statement.table.name
            )));
        }

        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(statement.changes.len());
        for (column, value) in statement.changes.iter() {
            let placeholder = bind_value(&mut params, value)?;
            assignments.push(format!("{}={placeholder}", self.quote_ident(column)));
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.quote_table(&statement.table),
            assignments.join(", ")
        );
        if !statement.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.build_filters(&mut params, &statement.filters, false)?);
        }
        if statement.returning {
            sql.push_str(" RETURNING *");
        }

        Ok((sql, params))
    }

    /// Compile a DELETE.
    pub fn delete(&self, statement: &DeleteStatement) -> Result<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote_table(&statement.table));
        if !statement.filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.build_filters(&mut params, &statement.filters, false)?);
        }
        Ok((sql, params))
    }

    fn from_clause(&self, query: &SelectQuery) -> String {
        match &query.base_table {
            Some(base) => format!(
                "{} LEFT JOIN {} ON {}.id = {}.id",
                self.quote_table(&query.table),
                self.quote_table(base),
                self.quote_ident(&query.table.name),
                self.quote_ident(&base.name)
            ),
            None => self.quote_table(&query.table),
        }
    }

    /// Compile a filter list. Siblings at the top level join with AND,
    /// unparenthesized; nested logical groups are parenthesized.
    fn build_filters(
        &self,
        params: &mut Vec<Value>,
        filters: &[RowFilter],
        emit_table: bool,
    ) -> Result<String> {
        let terms: Result<Vec<_>> = filters
            .iter()
            .map(|f| self.build_filter(1, params, f, emit_table))
            .collect();
        Ok(terms?.join(" AND "))
    }

    fn build_filter(
        &self,
        level: usize,
        params: &mut Vec<Value>,
        filter: &RowFilter,
        emit_table: bool,
    ) -> Result<String> {
        match filter {
            RowFilter::Logical { operator, filters } => {
                if filters.is_empty() {
                    return Err(Error::Query("empty logical filter group".to_string()));
                }
                let joiner = match operator {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                let terms: Result<Vec<_>> = filters
                    .iter()
                    .map(|f| self.build_filter(level + 1, params, f, emit_table))
                    .collect();
                Ok(format!("({})", terms?.join(joiner)))
            }
            RowFilter::Unary { operator, column } => {
                let column = self.quote_column(column, emit_table);
                Ok(match operator {
                    UnaryOp::Null => format!("{column} IS NULL"),
                    UnaryOp::NotNull => format!("{column} IS NOT NULL"),
                })
            }
            RowFilter::Set {
                operator,
                column,
                values,
                item_type,
            } => {
                let column = self.quote_column(column, emit_table);
                params.push(Value::Array(values.clone()));
                let n = params.len();
                let cast = item_type.sql_type();
                Ok(match operator {
                    SetOp::In => format!("{column} = ANY(${n}::{cast}[])"),
                    SetOp::NotIn => format!("{column} <> ALL(${n}::{cast}[])"),
                })
            }
            RowFilter::Match {
                operator,
                column,
                value,
            } => {
                let column = self.quote_column(column, emit_table);
                let (keyword, pattern) = match operator {
                    MatchOp::Contains => ("LIKE", format!("%{value}%")),
                    MatchOp::NotContains => ("NOT LIKE", format!("%{value}%")),
                    MatchOp::StartsWith => ("LIKE", format!("{value}%")),
                    MatchOp::NotStartsWith => ("NOT LIKE", format!("{value}%")),
                    MatchOp::EndsWith => ("LIKE", format!("%{value}")),
                    MatchOp::NotEndsWith => ("NOT LIKE", format!("%{value}")),
                };
                params.push(Value::Text(pattern));
                Ok(format!("{column} {keyword} ${}", params.len()))
            }
            RowFilter::Relational {
                operator,
                column,
                value,
            } => {
                let column = self.quote_column(column, emit_table);
                let op = match operator {
                    RelationalOp::Eq => "=",
                    RelationalOp::Ne => "<>",
                    RelationalOp::Gt => ">",
                    RelationalOp::Gte => ">=",
                    RelationalOp::Lt => "<",
                    RelationalOp::Lte => "<=",
                };
                params.push(value.clone());
                Ok(format!("{column} {op} ${}", params.len()))
            }
        }
    }
}

/// Bind one value, returning its placeholder. JSON-marked values serialize to
/// text and cast to jsonb.
fn bind_value(params: &mut Vec<Value>, value: &Value) -> Result<String> {
    match value {
        Value::Json(json) => {
            params.push(Value::Text(serde_json::to_string(json)?));
            Ok(format!("${}::jsonb", params.len()))
        }
        other => {
            params.push(other.clone());
            Ok(format!("${}", params.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metarel_core::SetItemType;

    fn builder() -> QueryBuilder {
        QueryBuilder::with_default_schema("public")
    }

    #[test]
    fn test_select_star_with_filters_and_pagination() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            filters: vec![
                RowFilter::eq("state", "enabled"),
                RowFilter::null("deleted_at"),
            ],
            order_by: vec![RowOrderBy::desc("created_at")],
            pagination: Some(Pagination { offset: 20, limit: 10 }),
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, params) = builder().select(&query).expect("select");
        assert_eq!(
            sql,
            "SELECT * FROM \"public\".\"oc_user\" WHERE \"state\" = $1 AND \"deleted_at\" IS NULL \
             ORDER BY \"created_at\" DESC OFFSET $2 LIMIT $3"
        );
        assert_eq!(
            params,
            vec![Value::Text("enabled".to_string()), Value::Int(20), Value::Int(10)]
        );
    }

    #[test]
    fn test_select_derived_qualifies_columns() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            base_table: Some(TableRef::new("base_record")),
            columns: vec![
                ColumnRef::qualified("oc_user", "login"),
                ColumnRef::qualified("base_record", "id"),
            ],
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, params) = builder().select(&query).expect("select");
        assert_eq!(
            sql,
            "SELECT \"oc_user\".\"login\", \"base_record\".\"id\" FROM \
             \"public\".\"oc_user\" LEFT JOIN \"public\".\"base_record\" \
             ON \"oc_user\".id = \"base_record\".id"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_select_derived_star_is_table_qualified() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            base_table: Some(TableRef::new("base_record")),
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, _) = builder().select(&query).expect("select");
        assert!(sql.starts_with("SELECT \"oc_user\".* FROM "));
    }

    #[test]
    fn test_nested_logical_parenthesized_top_level_bare() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            filters: vec![
                RowFilter::eq("state", "enabled"),
                RowFilter::or(vec![
                    RowFilter::eq("role", "admin"),
                    RowFilter::eq("role", "owner"),
                ]),
            ],
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, _) = builder().select(&query).expect("select");
        assert!(sql.ends_with(
            "WHERE \"state\" = $1 AND (\"role\" = $2 OR \"role\" = $3)"
        ));
    }

    #[test]
    fn test_in_and_not_in_compile_to_array_params() {
        let mk = |operator| SelectQuery {
            table: TableRef::new("oc_user"),
            filters: vec![RowFilter::Set {
                operator,
                column: ColumnRef::new("id"),
                values: vec![Value::Int(1), Value::Int(2)],
                item_type: SetItemType::Int,
            }],
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, params) = builder().select(&mk(SetOp::In)).expect("select");
        assert!(sql.ends_with("WHERE \"id\" = ANY($1::int[])"));
        assert_eq!(params, vec![Value::Array(vec![Value::Int(1), Value::Int(2)])]);

        let (sql, _) = builder().select(&mk(SetOp::NotIn)).expect("select");
        assert!(sql.ends_with("WHERE \"id\" <> ALL($1::int[])"));
    }

    #[test]
    fn test_match_wildcards_stay_in_params() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            filters: vec![RowFilter::Match {
                operator: MatchOp::Contains,
                column: ColumnRef::new("name"),
                value: "ad%min".to_string(),
            }],
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        let (sql, params) = builder().select(&query).expect("select");
        assert!(sql.ends_with("WHERE \"name\" LIKE $1"));
        // The operand's own wildcard characters are bound, never spliced.
        assert_eq!(params, vec![Value::Text("%ad%min%".to_string())]);
    }

    #[test]
    fn test_count_shape() {
        let (sql, _) = builder()
            .count(&SelectQuery::from(TableRef::new("oc_user")))
            .expect("count");
        assert_eq!(sql, "SELECT COUNT(*)::int AS \"count\" FROM \"public\".\"oc_user\"");
    }

    #[test]
    fn test_insert_with_json_cast_and_returning() {
        let statement = InsertStatement {
            table: TableRef::new("oc_user"),
            row: vec![
                ("login", Value::Text("admin".to_string())),
                ("profile", Value::Json(serde_json::json!({"lang": "en"}))),
            ]
            .into(),
            on_conflict_do_nothing: false,
            returning: true,
        };
        let (sql, params) = builder().insert(&statement).expect("insert");
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"oc_user\" (\"login\", \"profile\") \
             VALUES ($1, $2::jsonb) RETURNING *"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("admin".to_string()),
                Value::Text("{\"lang\":\"en\"}".to_string()),
            ]
        );
    }

    #[test]
    fn test_insert_conflict_tolerant() {
        let statement = InsertStatement {
            table: TableRef::new("oc_user_role"),
            row: vec![("oc_user_id", 5i64), ("oc_role_id", 9i64)].into(),
            on_conflict_do_nothing: true,
            returning: false,
        };
        let (sql, _) = builder().insert(&statement).expect("insert");
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"oc_user_role\" (\"oc_user_id\", \"oc_role_id\") \
             VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_insert_empty_row_rejected() {
        let statement = InsertStatement {
            table: TableRef::new("oc_user"),
            row: Row::new(),
            on_conflict_do_nothing: false,
            returning: true,
        };
        assert!(matches!(
            builder().insert(&statement),
            Err(Error::Query(_))
        ));
    }

    #[test]
    fn test_update_with_where_and_returning() {
        let statement = UpdateStatement {
            table: TableRef::new("oc_user"),
            changes: vec![("state", Value::Text("disabled".to_string()))].into(),
            filters: vec![RowFilter::eq("id", 7i64)],
            returning: true,
        };
        let (sql, params) = builder().update(&statement).expect("update");
        assert_eq!(
            sql,
            "UPDATE \"public\".\"oc_user\" SET \"state\"=$1 WHERE \"id\" = $2 RETURNING *"
        );
        assert_eq!(
            params,
            vec![Value::Text("disabled".to_string()), Value::Int(7)]
        );
    }

    #[test]
    fn test_delete_shape() {
        let statement = DeleteStatement {
            table: TableRef::with_schema("ops", "oc_user"),
            filters: vec![RowFilter::eq("id", 7i64)],
        };
        let (sql, params) = builder().delete(&statement).expect("delete");
        assert_eq!(sql, "DELETE FROM \"ops\".\"oc_user\" WHERE \"id\" = $1");
        assert_eq!(params, vec![Value::Int(7)]);
    }

    #[test]
    fn test_quote_ident_doubles_embedded_quotes() {
        assert_eq!(QueryBuilder::new().quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_no_default_schema_quotes_bare() {
        let (sql, _) = QueryBuilder::new()
            .count(&SelectQuery::from(TableRef::new("oc_user")))
            .expect("count");
        assert_eq!(sql, "SELECT COUNT(*)::int AS \"count\" FROM \"oc_user\"");
    }

    #[test]
    fn test_empty_logical_group_rejected() {
        let query = SelectQuery {
            table: TableRef::new("oc_user"),
            filters: vec![RowFilter::and(Vec::new())],
            ..SelectQuery::from(TableRef::new("oc_user"))
        };
        assert!(matches!(builder().select(&query), Err(Error::Query(_))));
    }
}
