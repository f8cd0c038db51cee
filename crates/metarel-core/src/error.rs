//! Error types for the data-access engine.

use std::fmt;

use crate::value::Value;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while loading metadata or executing entity operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Model or property metadata failed validation at registry load.
    Configuration(String),
    /// A model code was requested that the registry does not contain.
    UnknownModel(String),
    /// A filter, order-by, or write referenced a field that resolves to
    /// neither a property code nor a column name.
    UnknownField {
        /// Model the field was resolved against.
        model: String,
        /// The unresolvable field name.
        field: String,
    },
    /// A write operation targeted a model declared abstract.
    AbstractModel {
        /// The abstract model's code.
        model: String,
        /// Operation that was attempted, e.g. `"create"`.
        operation: &'static str,
    },
    /// An operation required an existing entity and none matched.
    NotFound {
        /// Model searched.
        model: String,
        /// The id that did not match.
        id: Value,
    },
    /// A relation value referenced a target entity that does not exist.
    RelatedEntityNotFound {
        /// Model owning the relation property.
        model: String,
        /// The relation property's code.
        property: String,
        /// Target model code.
        target: String,
        /// The id that did not resolve.
        id: Value,
    },
    /// A relation value had a shape the engine cannot interpret.
    InvalidRelationValue {
        /// The relation property's code.
        property: String,
        /// What was wrong with the value.
        reason: String,
    },
    /// A filter tree exceeded the recursion limit.
    FilterTooDeep {
        /// Maximum nesting depth allowed.
        max: usize,
    },
    /// Statement construction failed.
    Query(String),
    /// The executor reported a database failure.
    Database(String),
    /// An event handler reported a failure.
    Event(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Error::UnknownModel(code) => write!(f, "unknown model: {code}"),
            Error::UnknownField { model, field } => {
                write!(f, "unknown field '{field}' on model '{model}'")
            }
            Error::AbstractModel { model, operation } => {
                write!(f, "cannot {operation} entities of abstract model '{model}'")
            }
            Error::NotFound { model, id } => {
                write!(f, "{model} entity with id {id} was not found")
            }
            Error::RelatedEntityNotFound {
                model,
                property,
                target,
                id,
            } => write!(
                f,
                "relation '{property}' of model '{model}': {target} entity with id {id} was not found"
            ),
            Error::InvalidRelationValue { property, reason } => {
                write!(f, "invalid value for relation '{property}': {reason}")
            }
            Error::FilterTooDeep { max } => {
                write!(f, "filter nesting exceeds maximum depth of {max}")
            }
            Error::Query(msg) => write!(f, "query error: {msg}"),
            Error::Database(msg) => write!(f, "database error: {msg}"),
            Error::Event(msg) => write!(f, "event handler error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Query(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::UnknownField {
            model: "oc_user".to_string(),
            field: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "unknown field 'nope' on model 'oc_user'");

        let err = Error::NotFound {
            model: "oc_user".to_string(),
            id: Value::Int(42),
        };
        assert_eq!(err.to_string(), "oc_user entity with id 42 was not found");
    }
}
