//! Entity-level filter trees.
//!
//! [`EntityFilter`] is the caller-facing filter vocabulary: fields are logical
//! property codes (column names are accepted as a fallback) and relation
//! traversal is expressed with `exists`/`notExists` sub-filters. The facade's
//! filter compiler lowers these trees into column-level filters for the query
//! builder.
//!
//! The serde representation mirrors the JSON shape callers send:
//!
//! ```json
//! { "operator": "and", "filters": [
//!     { "operator": "eq", "field": "state", "value": "enabled" },
//!     { "operator": "exists", "field": "department", "filters": [
//!         { "operator": "contains", "field": "name", "value": "ops" }
//!     ]}
//! ]}
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Combinator over sub-filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalOp {
    /// All sub-filters must hold.
    And,
    /// At least one sub-filter must hold.
    Or,
}

/// Binary comparison against a single operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationalOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Set membership against an array operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetOp {
    /// Matches rows whose field equals any array element.
    In,
    /// Matches rows whose field equals no array element. Exact complement of
    /// [`SetOp::In`] over non-null fields.
    NotIn,
}

/// Element type of a set operand, used for the array cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetItemType {
    Int,
    Text,
}

impl SetItemType {
    /// SQL type name used in the array cast.
    pub fn sql_type(self) -> &'static str {
        match self {
            SetItemType::Int => "int",
            SetItemType::Text => "text",
        }
    }
}

/// Null tests, no operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Null,
    NotNull,
}

/// Substring matching. Wildcards are injected into the bound value, never into
/// the statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchOp {
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
}

/// Relation traversal: constrain rows by properties of a related entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExistenceOp {
    Exists,
    NotExists,
}

/// One node of an entity filter tree.
///
/// Untagged: the `operator` string plus the payload shape select the variant.
/// Variant order matters for deserialization; keep the more constrained
/// payloads first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityFilter {
    /// `and` / `or` over sub-filters.
    Logical {
        operator: LogicalOp,
        filters: Vec<EntityFilter>,
    },
    /// `exists` / `notExists` on a relation field, with sub-filters applied to
    /// the target model.
    Existence {
        operator: ExistenceOp,
        field: String,
        filters: Vec<EntityFilter>,
    },
    /// `in` / `notIn` against an array of candidate values.
    Set {
        operator: SetOp,
        field: String,
        value: Vec<Value>,
        #[serde(
            rename = "itemType",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        item_type: Option<SetItemType>,
    },
    /// `null` / `notNull`, no operand.
    Unary { operator: UnaryOp, field: String },
    /// Substring matching against a text operand.
    Match {
        operator: MatchOp,
        field: String,
        value: String,
    },
    /// Binary comparison against a single operand.
    Relational {
        operator: RelationalOp,
        field: String,
        value: Value,
    },
}

impl EntityFilter {
    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        EntityFilter::Relational {
            operator: RelationalOp::Eq,
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field <> value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        EntityFilter::Relational {
            operator: RelationalOp::Ne,
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field IN (values)`
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        EntityFilter::Set {
            operator: SetOp::In,
            field: field.into(),
            value: values,
            item_type: None,
        }
    }

    /// `field NOT IN (values)`
    pub fn not_in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        EntityFilter::Set {
            operator: SetOp::NotIn,
            field: field.into(),
            value: values,
            item_type: None,
        }
    }

    /// `field IS NULL`
    pub fn null(field: impl Into<String>) -> Self {
        EntityFilter::Unary {
            operator: UnaryOp::Null,
            field: field.into(),
        }
    }

    /// `field IS NOT NULL`
    pub fn not_null(field: impl Into<String>) -> Self {
        EntityFilter::Unary {
            operator: UnaryOp::NotNull,
            field: field.into(),
        }
    }

    /// `field LIKE %value%`
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        EntityFilter::Match {
            operator: MatchOp::Contains,
            field: field.into(),
            value: value.into(),
        }
    }

    /// All of `filters` must hold.
    pub fn and(filters: Vec<EntityFilter>) -> Self {
        EntityFilter::Logical {
            operator: LogicalOp::And,
            filters,
        }
    }

    /// Any of `filters` must hold.
    pub fn or(filters: Vec<EntityFilter>) -> Self {
        EntityFilter::Logical {
            operator: LogicalOp::Or,
            filters,
        }
    }

    /// A related entity matching `filters` must exist.
    pub fn exists(field: impl Into<String>, filters: Vec<EntityFilter>) -> Self {
        EntityFilter::Existence {
            operator: ExistenceOp::Exists,
            field: field.into(),
            filters,
        }
    }

    /// No related entity matching `filters` may exist.
    pub fn not_exists(field: impl Into<String>, filters: Vec<EntityFilter>) -> Self {
        EntityFilter::Existence {
            operator: ExistenceOp::NotExists,
            field: field.into(),
            filters,
        }
    }
}

/// Ordering of a result set by one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Property code or column name.
    pub field: String,
    /// Descending when true; ascending is the default.
    #[serde(default)]
    pub desc: bool,
}

impl OrderBy {
    /// Ascending order on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            desc: false,
        }
    }

    /// Descending order on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            desc: true,
        }
    }
}

/// Result-set window. `offset` rows skipped, at most `limit` rows returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_relational() {
        let filter: EntityFilter =
            serde_json::from_str(r#"{"operator":"eq","field":"state","value":"enabled"}"#)
                .expect("deserialize");
        assert_eq!(filter, EntityFilter::eq("state", "enabled"));
    }

    #[test]
    fn test_deserialize_logical_tree() {
        let filter: EntityFilter = serde_json::from_str(
            r#"{"operator":"or","filters":[
                {"operator":"null","field":"deletedAt"},
                {"operator":"in","field":"id","value":[1,2],"itemType":"int"}
            ]}"#,
        )
        .expect("deserialize");
        assert_eq!(
            filter,
            EntityFilter::or(vec![
                EntityFilter::null("deletedAt"),
                EntityFilter::Set {
                    operator: SetOp::In,
                    field: "id".to_string(),
                    value: vec![Value::Int(1), Value::Int(2)],
                    item_type: Some(SetItemType::Int),
                },
            ])
        );
    }

    #[test]
    fn test_deserialize_existence() {
        let filter: EntityFilter = serde_json::from_str(
            r#"{"operator":"notExists","field":"department","filters":[
                {"operator":"eq","field":"name","value":"ops"}
            ]}"#,
        )
        .expect("deserialize");
        assert_eq!(
            filter,
            EntityFilter::not_exists("department", vec![EntityFilter::eq("name", "ops")])
        );
    }

    #[test]
    fn test_match_not_confused_with_relational() {
        let filter: EntityFilter =
            serde_json::from_str(r#"{"operator":"startsWith","field":"name","value":"ad"}"#)
                .expect("deserialize");
        assert!(matches!(
            filter,
            EntityFilter::Match {
                operator: MatchOp::StartsWith,
                ..
            }
        ));
    }

    #[test]
    fn test_order_by_default_direction() {
        let order: OrderBy = serde_json::from_str(r#"{"field":"name"}"#).expect("deserialize");
        assert!(!order.desc);
    }
}
