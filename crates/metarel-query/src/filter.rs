//! Column-level filter trees.
//!
//! [`RowFilter`] mirrors the entity filter vocabulary with two differences:
//! fields are resolved [`ColumnRef`]s instead of property codes, and there is
//! no existence variant — relation traversal is lowered away before filters
//! reach this layer.

use metarel_core::{LogicalOp, MatchOp, RelationalOp, SetItemType, SetOp, UnaryOp, Value};

/// A column reference, optionally table-qualified.
///
/// The qualifier is only emitted for joined (derived-table) statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    pub table: Option<String>,
}

impl ColumnRef {
    /// An unqualified column.
    pub fn new(name: impl Into<String>) -> Self {
        ColumnRef {
            name: name.into(),
            table: None,
        }
    }

    /// A table-qualified column.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnRef {
            name: name.into(),
            table: Some(table.into()),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::new(name)
    }
}

/// One node of a column-level filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    Logical {
        operator: LogicalOp,
        filters: Vec<RowFilter>,
    },
    Unary {
        operator: UnaryOp,
        column: ColumnRef,
    },
    Set {
        operator: SetOp,
        column: ColumnRef,
        values: Vec<Value>,
        item_type: SetItemType,
    },
    Match {
        operator: MatchOp,
        column: ColumnRef,
        value: String,
    },
    Relational {
        operator: RelationalOp,
        column: ColumnRef,
        value: Value,
    },
}

impl RowFilter {
    /// `column = value`
    pub fn eq(column: impl Into<ColumnRef>, value: impl Into<Value>) -> Self {
        RowFilter::Relational {
            operator: RelationalOp::Eq,
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column = ANY($n::int[])`
    pub fn in_values(column: impl Into<ColumnRef>, values: Vec<Value>) -> Self {
        RowFilter::Set {
            operator: SetOp::In,
            column: column.into(),
            values,
            item_type: SetItemType::Int,
        }
    }

    /// `column IS NULL`
    pub fn null(column: impl Into<ColumnRef>) -> Self {
        RowFilter::Unary {
            operator: UnaryOp::Null,
            column: column.into(),
        }
    }

    /// All of `filters` must hold.
    pub fn and(filters: Vec<RowFilter>) -> Self {
        RowFilter::Logical {
            operator: LogicalOp::And,
            filters,
        }
    }

    /// Any of `filters` must hold.
    pub fn or(filters: Vec<RowFilter>) -> Self {
        RowFilter::Logical {
            operator: LogicalOp::Or,
            filters,
        }
    }
}

/// Ordering of a result set by one resolved column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOrderBy {
    pub column: ColumnRef,
    pub desc: bool,
}

impl RowOrderBy {
    pub fn asc(column: impl Into<ColumnRef>) -> Self {
        RowOrderBy {
            column: column.into(),
            desc: false,
        }
    }

    pub fn desc(column: impl Into<ColumnRef>) -> Self {
        RowOrderBy {
            column: column.into(),
            desc: true,
        }
    }
}
