//! Metarel: a metadata-driven relational data-access layer.
//!
//! Metarel turns declarative model metadata (models, properties, relations,
//! single-table inheritance) into parameterized SQL at runtime. Callers work
//! with untyped entities keyed by property codes; the engine compiles filter
//! trees, maps entities to rows across derived/base table pairs, hydrates
//! relations in batches, and emits lifecycle events around every write.
//!
//! The workspace layers compose here:
//!
//! - [`metarel_core`] — values, metadata, capability traits;
//! - [`metarel_query`] — pure SQL statement construction;
//! - [`metarel_access`] — per-table row CRUD over an executor;
//! - this crate — the [`FilterCompiler`] and the [`EntityManager`].
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(ModelRegistry::load(defs)?);
//! let manager = EntityManager::new(registry, executor, Arc::new(NullEventBus), QueryBuilder::with_default_schema("public"));
//! let users = manager.find_entities(&cx, "oc_user", &FindOptions {
//!     filters: vec![EntityFilter::eq("state", "enabled")],
//!     ..FindOptions::default()
//! }).await;
//! ```

pub mod compiler;
pub mod manager;
pub mod mapping;

pub use compiler::{FilterCompiler, MAX_FILTER_DEPTH};
pub use manager::{EntityManager, FindOptions, OperationOptions, UpdateOptions};

pub use metarel_access::{RowQuery, TableAccessor, TableSpec};
pub use metarel_core::{
    Cx, DataMap, Entity, EntityEvent, EntityFilter, Error, EventBus, EventName, EventPayload,
    Model, ModelDef, ModelRegistry, NullEventBus, OrderBy, Outcome, Pagination, Result, Row,
    SqlExecutor, Value,
};
pub use metarel_query::{QueryBuilder, RowFilter};

/// One-stop imports for typical use.
pub mod prelude {
    pub use crate::manager::{EntityManager, FindOptions, OperationOptions, UpdateOptions};
    pub use metarel_core::{
        Cx, Entity, EntityFilter, Error, EventBus, ModelRegistry, NullEventBus, OrderBy, Outcome,
        Pagination, Row, SqlExecutor, Value,
    };
    pub use metarel_query::QueryBuilder;
}
