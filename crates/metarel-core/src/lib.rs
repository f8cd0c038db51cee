//! Core types and traits for Metarel.
//!
//! `metarel-core` is the **foundation layer** for the entire workspace. It defines
//! the data types and capability traits that all other crates build on.
//!
//! # Role In The Architecture
//!
//! - **Data model**: [`Value`] and [`DataMap`] carry untyped rows and entities
//!   between layers; [`Row`] and [`Entity`] document the two key namespaces
//!   (physical column names vs. logical property codes).
//! - **Metadata**: [`Model`] and [`Property`] describe entity types; the
//!   [`ModelRegistry`] validates them at load time and is immutable afterwards.
//! - **Capabilities**: [`SqlExecutor`] is the statement-execution boundary the
//!   engine consumes; [`EventBus`] is the lifecycle-notification boundary it
//!   drives.
//! - **Structured concurrency**: re-exports `Cx` and `Outcome` from asupersync so
//!   every async operation is cancel-correct.
//!
//! # Who Uses This Crate
//!
//! - `metarel-query` consumes [`Value`] and the filter operator vocabulary to
//!   build SQL.
//! - `metarel-access` consumes [`SqlExecutor`] and [`Row`] for per-table CRUD.
//! - The `metarel` facade composes everything into the Entity Manager.

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod data;
pub mod error;
pub mod events;
pub mod executor;
pub mod filter;
pub mod model;
pub mod registry;
pub mod value;

pub use data::{DataMap, Entity, Row};
pub use error::{Error, Result};
pub use events::{EntityEvent, EventBus, EventName, EventPayload, NullEventBus};
pub use executor::SqlExecutor;
pub use filter::{
    EntityFilter, ExistenceOp, LogicalOp, MatchOp, OrderBy, Pagination, RelationalOp, SetItemType,
    SetOp, UnaryOp,
};
pub use model::{
    Cardinality, LinkTable, Model, ModelDef, Property, PropertyDef, PropertyKind, Relation,
    RelationWiring, ScalarType,
};
pub use registry::ModelRegistry;
pub use value::Value;

/// Propagate an [`Outcome`], unwrapping the `Ok` value.
///
/// `Err` is returned to the caller; `Cancelled` and `Panicked` are forwarded
/// unchanged so cancellation stays cancel-correct across every await point.
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Ok(value) => value,
            $crate::Outcome::Err(err) => return $crate::Outcome::Err(err),
            $crate::Outcome::Cancelled(reason) => return $crate::Outcome::Cancelled(reason),
            $crate::Outcome::Panicked(payload) => return $crate::Outcome::Panicked(payload),
        }
    };
}
