//! The entity manager: metadata-driven CRUD over entities.
//!
//! Every operation resolves its model from the registry, lowers entity-level
//! input (property codes, relation values, filters) into row-level statements,
//! runs them through the shared executor, and emits lifecycle events through
//! the injected bus. Derived models read and write two tables sharing one id;
//! relations are hydrated in batches, one query per relation property.
//!
//! Statements of one operation run without a surrounding transaction; a
//! failure mid-operation leaves the earlier statements applied.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use metarel_access::{RowQuery, TableAccessor, TableSpec};
use metarel_core::{
    try_outcome, Entity, EntityEvent, EntityFilter, Error, EventBus, EventPayload, Model,
    ModelRegistry, OrderBy, Pagination, Property, Relation, RelationWiring, RelationalOp, Row,
    SqlExecutor, Value,
};
use metarel_query::{ColumnRef, QueryBuilder, RowFilter};
use serde::Deserialize;
use tracing::{debug, info};

use crate::compiler::FilterCompiler;
use crate::mapping::{entity_part_changes, map_entity_to_rows, map_row_to_entity, relation_id};

/// Lift a `Result` into the surrounding `Outcome`-returning function.
macro_rules! lift {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return Outcome::Err(err),
        }
    };
}

/// Options for find operations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindOptions {
    pub filters: Vec<EntityFilter>,
    pub order_by: Vec<OrderBy>,
    pub pagination: Option<Pagination>,
    /// Explicit property projection. Empty selects every property except
    /// `many` relations; naming a relation property triggers its hydration.
    pub properties: Vec<String>,
    /// Retain raw FK columns and unknown columns on returned entities.
    /// Only effective when `properties` is empty.
    pub keep_non_property_fields: bool,
    pub sender: Option<String>,
    pub context: serde_json::Value,
}

/// Caller identity and opaque context carried into lifecycle events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationOptions {
    pub sender: Option<String>,
    pub context: serde_json::Value,
}

/// Options for [`EntityManager::update_entity_by_id`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateOptions {
    pub changes: Entity,
    /// Workflow operation tag, forwarded verbatim into the update events.
    /// An update with an empty diff but an operation still runs the event
    /// cycle.
    pub operation: Option<String>,
    /// Property codes whose changes drive workflow state, forwarded verbatim.
    pub state_properties: Vec<String>,
    pub sender: Option<String>,
    pub context: serde_json::Value,
}

/// Metadata-driven entity CRUD over an executor and an event bus.
///
/// All dependencies are constructor-injected and shared; the manager itself
/// is cheap to clone and holds no per-operation state.
pub struct EntityManager<E: SqlExecutor, B: EventBus> {
    registry: Arc<ModelRegistry>,
    executor: Arc<E>,
    events: Arc<B>,
    builder: QueryBuilder,
}

impl<E: SqlExecutor, B: EventBus> Clone for EntityManager<E, B> {
    fn clone(&self) -> Self {
        EntityManager {
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            events: Arc::clone(&self.events),
            builder: self.builder.clone(),
        }
    }
}

impl<E: SqlExecutor, B: EventBus> EntityManager<E, B> {
    pub fn new(
        registry: Arc<ModelRegistry>,
        executor: Arc<E>,
        events: Arc<B>,
        builder: QueryBuilder,
    ) -> Self {
        EntityManager {
            registry,
            executor,
            events,
            builder,
        }
    }

    /// The registry this manager operates on.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn accessor(&self, model: &Model) -> TableAccessor<'_, E> {
        TableAccessor::new(
            self.executor.as_ref(),
            &self.builder,
            TableSpec {
                schema: model.schema.clone(),
                table: model.table_name.clone(),
                base_table: model.base_table_name.clone(),
            },
        )
    }

    /// Accessor for the model's own table only, without the base join.
    /// Writes always target one table at a time.
    fn own_table_accessor(&self, model: &Model) -> TableAccessor<'_, E> {
        TableAccessor::new(
            self.executor.as_ref(),
            &self.builder,
            TableSpec {
                schema: model.schema.clone(),
                table: model.table_name.clone(),
                base_table: None,
            },
        )
    }

    fn base_table_accessor(&self, model: &Model, base_table: &str) -> TableAccessor<'_, E> {
        TableAccessor::new(
            self.executor.as_ref(),
            &self.builder,
            TableSpec {
                schema: model.schema.clone(),
                table: base_table.to_string(),
                base_table: None,
            },
        )
    }

    fn link_accessor(&self, link: &metarel_core::LinkTable) -> TableAccessor<'_, E> {
        TableAccessor::new(
            self.executor.as_ref(),
            &self.builder,
            TableSpec {
                schema: link.schema.clone(),
                table: link.table.clone(),
                base_table: None,
            },
        )
    }

    fn compiler(&self) -> FilterCompiler<'_, E> {
        FilterCompiler::new(&self.registry, &self.builder, self.executor.as_ref())
    }

    fn event(
        &self,
        model: &Model,
        payload: EventPayload,
        sender: &Option<String>,
        context: &serde_json::Value,
    ) -> EntityEvent {
        EntityEvent {
            namespace: model.namespace.clone(),
            model_code: model.code.clone(),
            base_model_code: model.base.clone(),
            payload,
            sender: sender.clone(),
            context: context.clone(),
        }
    }

    /// Find all entities of a model matching the options.
    #[tracing::instrument(skip(self, cx, options))]
    pub async fn find_entities(
        &self,
        cx: &Cx,
        model_code: &str,
        options: &FindOptions,
    ) -> Outcome<Vec<Entity>, Error> {
        let model = lift!(self.registry.get(model_code));
        let compiler = self.compiler();
        let filters = try_outcome!(compiler.compile(cx, model, &options.filters).await);
        let order_by = lift!(compiler.resolve_order_by(model, &options.order_by));
        let requested = lift!(requested_properties(model, &options.properties));

        let query = RowQuery {
            columns: property_columns(model, &requested),
            filters,
            order_by,
            pagination: options.pagination,
        };
        let mut rows = try_outcome!(self.accessor(model).find(cx, &query).await);

        for property in requested.iter().filter(|p| p.is_relation()) {
            try_outcome!(self.hydrate_relation(cx, model, property, &mut rows).await);
        }
        let entities: Vec<Entity> = rows
            .iter()
            .map(|row| map_row_to_entity(model, row, options.keep_non_property_fields))
            .collect();

        let mut event = self.event(
            model,
            EventPayload::BeforeResponse { entities },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        match event.payload {
            EventPayload::BeforeResponse { entities } => Outcome::Ok(entities),
            _ => Outcome::Err(Error::Event(
                "beforeResponse handler replaced the event payload".to_string(),
            )),
        }
    }

    /// Find the first entity matching the options.
    pub async fn find_entity(
        &self,
        cx: &Cx,
        model_code: &str,
        options: &FindOptions,
    ) -> Outcome<Option<Entity>, Error> {
        let mut narrowed = options.clone();
        if narrowed.pagination.is_none() {
            narrowed.pagination = Some(Pagination {
                offset: 0,
                limit: 1,
            });
        }
        let entities = try_outcome!(self.find_entities(cx, model_code, &narrowed).await);
        Outcome::Ok(entities.into_iter().next())
    }

    /// Find one entity by id.
    pub async fn find_by_id(
        &self,
        cx: &Cx,
        model_code: &str,
        id: Value,
    ) -> Outcome<Option<Entity>, Error> {
        let options = FindOptions {
            filters: vec![EntityFilter::eq("id", id)],
            ..FindOptions::default()
        };
        self.find_entity(cx, model_code, &options).await
    }

    /// Count entities matching the filters.
    #[tracing::instrument(skip(self, cx, filters))]
    pub async fn count(
        &self,
        cx: &Cx,
        model_code: &str,
        filters: &[EntityFilter],
    ) -> Outcome<i64, Error> {
        let model = lift!(self.registry.get(model_code));
        let compiled = try_outcome!(self.compiler().compile(cx, model, filters).await);
        self.accessor(model).count(cx, compiled).await
    }

    /// Create an entity, resolving or creating its related entities.
    #[tracing::instrument(skip(self, cx, entity, options))]
    pub async fn create_entity(
        &self,
        cx: &Cx,
        model_code: &str,
        entity: Entity,
        options: &OperationOptions,
    ) -> Outcome<Entity, Error> {
        self.create_inner(cx, model_code, entity, options).await
    }

    /// Boxed because one-relation values without ids create their target
    /// entities recursively.
    fn create_inner<'f>(
        &'f self,
        cx: &'f Cx,
        model_code: &'f str,
        entity: Entity,
        options: &'f OperationOptions,
    ) -> Pin<Box<dyn Future<Output = Outcome<Entity, Error>> + Send + 'f>> {
        Box::pin(async move {
            let model = lift!(self.registry.get(model_code));
            if model.is_abstract() {
                return Outcome::Err(Error::AbstractModel {
                    model: model.code.clone(),
                    operation: "create",
                });
            }

            let mut event = self.event(
                model,
                EventPayload::BeforeCreate { before: entity },
                &options.sender,
                &options.context,
            );
            try_outcome!(self.events.emit(cx, &mut event).await);
            let EventPayload::BeforeCreate { before: mut entity } = event.payload else {
                return Outcome::Err(Error::Event(
                    "beforeCreate handler replaced the event payload".to_string(),
                ));
            };

            // Resolve one-relations ahead of the insert: an id value must
            // point at an existing target, an id-less entity value is created
            // first. The resolved targets attach to the result under their
            // property codes.
            let mut related_values: Vec<(String, Value)> = Vec::new();
            let one_relations: Vec<(String, String)> = model
                .properties
                .iter()
                .filter_map(|p| {
                    p.relation()
                        .filter(|r| !r.is_many())
                        .map(|r| (p.code.clone(), r.target.clone()))
                })
                .collect();
            for (code, target) in one_relations {
                let Some(value) = entity.get(&code).cloned() else {
                    continue;
                };
                match value {
                    Value::Map(map) if map.id().is_none() => {
                        let created =
                            try_outcome!(self.create_inner(cx, &target, map, options).await);
                        let id = lift!(created.id().cloned().ok_or_else(|| Error::Database(
                            format!("created '{target}' entity has no id")
                        )));
                        entity.insert(code.clone(), id);
                        related_values.push((code, Value::Map(created)));
                    }
                    Value::Null => {}
                    other => {
                        let Some(property) = model.property(&code) else {
                            continue;
                        };
                        let target_id = lift!(relation_id(property, &other));
                        if target_id.is_null() {
                            continue;
                        }
                        let target_model = lift!(self.registry.get(&target));
                        let target_row = try_outcome!(
                            self.load_related_row(cx, model, &code, target_model, &target_id)
                                .await
                        );
                        related_values.push((
                            code.clone(),
                            Value::Map(map_row_to_entity(target_model, &target_row, false)),
                        ));
                        entity.insert(code, target_id);
                    }
                }
            }

            let (mut row, mut base_row) = lift!(map_entity_to_rows(model, &entity));

            // Derived models: the base row goes first and donates the id.
            let mut stored_base: Option<Row> = None;
            if let (Some(base_code), Some(base_table)) = (&model.base, &model.base_table_name) {
                let base_model = lift!(self.registry.get(base_code));
                if let Some(column) = base_model
                    .derived_type_property_code
                    .as_deref()
                    .and_then(|code| base_model.property(code))
                    .and_then(Property::stored_column)
                {
                    if base_row.get(column).is_none() {
                        base_row.insert(column, model.code.clone());
                    }
                }
                let stored = try_outcome!(
                    self.base_table_accessor(model, base_table).create(cx, base_row).await
                );
                if let Some(id) = stored.id() {
                    row.insert("id", id.clone());
                }
                stored_base = Some(stored);
            }

            let stored_row = try_outcome!(self.own_table_accessor(model).create(cx, row).await);
            let id = lift!(stored_row.id().cloned().ok_or_else(|| Error::Database(format!(
                "insert into '{}' returned a row without id",
                model.table_name
            ))));
            info!(model = %model.code, id = %id, "entity created");

            // Many-relations attach after the primary row exists.
            let many_relations: Vec<(String, Relation)> = model
                .properties
                .iter()
                .filter_map(|p| {
                    p.relation()
                        .filter(|r| r.is_many())
                        .map(|r| (p.code.clone(), r.clone()))
                })
                .collect();
            for (code, relation) in many_relations {
                let Some(value) = entity.get(&code).cloned() else {
                    continue;
                };
                let attached = try_outcome!(
                    self.attach_many(cx, model, &code, &relation, &id, &value, options).await
                );
                related_values.push((
                    code,
                    Value::Array(attached.into_iter().map(Value::Map).collect()),
                ));
            }

            let mut combined = stored_base.unwrap_or_default();
            combined.merge(&stored_row);
            let mut created_entity = map_row_to_entity(model, &combined, true);
            for (code, related) in related_values {
                created_entity.insert(code, related);
            }

            let mut event = self.event(
                model,
                EventPayload::Created {
                    after: created_entity,
                },
                &options.sender,
                &options.context,
            );
            try_outcome!(self.events.emit(cx, &mut event).await);
            match event.payload {
                EventPayload::Created { after } => Outcome::Ok(after),
                _ => Outcome::Err(Error::Event(
                    "create handler replaced the event payload".to_string(),
                )),
            }
        })
    }

    /// Update an entity by id with partial changes.
    ///
    /// The stored entity is loaded first; an absent id fails. The effective
    /// diff is recomputed after `beforeUpdate` handlers ran, and tables whose
    /// columns did not change are not touched.
    #[tracing::instrument(skip(self, cx, options))]
    pub async fn update_entity_by_id(
        &self,
        cx: &Cx,
        model_code: &str,
        id: Value,
        options: UpdateOptions,
    ) -> Outcome<Entity, Error> {
        let model = lift!(self.registry.get(model_code));
        let before_row = try_outcome!(self.load_row_by_id(cx, model, &id).await);
        let Some(before_row) = before_row else {
            return Outcome::Err(Error::NotFound {
                model: model.code.clone(),
                id,
            });
        };
        let before = map_row_to_entity(model, &before_row, true);

        let changes = entity_part_changes(model, &before, &options.changes);
        if changes.is_empty() && options.operation.is_none() {
            debug!(model = %model.code, id = %id, "update is a no-op");
            return Outcome::Ok(before);
        }

        let mut event = self.event(
            model,
            EventPayload::BeforeUpdate {
                before: before.clone(),
                changes,
                operation: options.operation.clone(),
                state_properties: options.state_properties.clone(),
            },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        let EventPayload::BeforeUpdate { changes, .. } = event.payload else {
            return Outcome::Err(Error::Event(
                "beforeUpdate handler replaced the event payload".to_string(),
            ));
        };
        // Handlers may have extended the changes; diff again so unchanged
        // values they echoed back do not turn into writes.
        let mut changes = entity_part_changes(model, &before, &changes);

        // Resolve one-relations the same way create does.
        let one_relations: Vec<(String, String)> = model
            .properties
            .iter()
            .filter_map(|p| {
                p.relation()
                    .filter(|r| !r.is_many())
                    .map(|r| (p.code.clone(), r.target.clone()))
            })
            .collect();
        let op_options = OperationOptions {
            sender: options.sender.clone(),
            context: options.context.clone(),
        };
        for (code, target) in one_relations {
            let Some(value) = changes.get(&code).cloned() else {
                continue;
            };
            match value {
                Value::Map(map) if map.id().is_none() => {
                    let created =
                        try_outcome!(self.create_inner(cx, &target, map, &op_options).await);
                    let created_id = lift!(created.id().cloned().ok_or_else(|| Error::Database(
                        format!("created '{target}' entity has no id")
                    )));
                    changes.insert(code, created_id);
                }
                Value::Null => {}
                other => {
                    let Some(property) = model.property(&code) else {
                        continue;
                    };
                    let target_id = lift!(relation_id(property, &other));
                    if target_id.is_null() {
                        continue;
                    }
                    let target_model = lift!(self.registry.get(&target));
                    try_outcome!(
                        self.load_related_row(cx, model, &code, target_model, &target_id)
                            .await
                    );
                    changes.insert(code, target_id);
                }
            }
        }

        let (row, base_row) = lift!(map_entity_to_rows(model, &changes));
        if !row.is_empty() {
            try_outcome!(
                self.own_table_accessor(model)
                    .update_by_id(cx, id.clone(), row)
                    .await
            );
        }
        if let Some(base_table) = &model.base_table_name {
            if !base_row.is_empty() {
                try_outcome!(
                    self.base_table_accessor(model, base_table)
                        .update_by_id(cx, id.clone(), base_row)
                        .await
                );
            }
        }

        // Many-relations named in the diff.
        let many_relations: Vec<(String, Relation)> = model
            .properties
            .iter()
            .filter_map(|p| {
                p.relation()
                    .filter(|r| r.is_many())
                    .map(|r| (p.code.clone(), r.clone()))
            })
            .collect();
        for (code, relation) in many_relations {
            let Some(value) = changes.get(&code).cloned() else {
                continue;
            };
            if let RelationWiring::LinkTable(link) = &relation.wiring {
                // Replace semantics: existing links go away first.
                let accessor = self.link_accessor(link);
                try_outcome!(
                    accessor
                        .delete_where(
                            cx,
                            vec![RowFilter::eq(link.self_id_column.as_str(), id.clone())],
                        )
                        .await
                );
            }
            try_outcome!(
                self.attach_many(cx, model, &code, &relation, &id, &value, &op_options)
                    .await
            );
        }

        let after_row = try_outcome!(self.load_row_by_id(cx, model, &id).await);
        let Some(after_row) = after_row else {
            return Outcome::Err(Error::NotFound {
                model: model.code.clone(),
                id,
            });
        };
        let after = map_row_to_entity(model, &after_row, true);
        info!(model = %model.code, id = %id, "entity updated");

        let mut event = self.event(
            model,
            EventPayload::Updated {
                before,
                after,
                changes,
                operation: options.operation.clone(),
                state_properties: options.state_properties.clone(),
            },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        match event.payload {
            EventPayload::Updated { after, .. } => Outcome::Ok(after),
            _ => Outcome::Err(Error::Event(
                "update handler replaced the event payload".to_string(),
            )),
        }
    }

    /// Delete an entity by id. Deleting an absent id is a silent no-op and
    /// emits no events.
    #[tracing::instrument(skip(self, cx, options))]
    pub async fn delete_by_id(
        &self,
        cx: &Cx,
        model_code: &str,
        id: Value,
        options: &OperationOptions,
    ) -> Outcome<(), Error> {
        let model = lift!(self.registry.get(model_code));
        if model.is_abstract() {
            return Outcome::Err(Error::AbstractModel {
                model: model.code.clone(),
                operation: "delete",
            });
        }
        let before_row = try_outcome!(self.load_row_by_id(cx, model, &id).await);
        let Some(before_row) = before_row else {
            debug!(model = %model.code, id = %id, "delete of absent entity");
            return Outcome::Ok(());
        };
        let before = map_row_to_entity(model, &before_row, true);

        let mut event = self.event(
            model,
            EventPayload::BeforeDelete {
                before: before.clone(),
            },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);

        // Derived row first, then the base row it shares its id with.
        try_outcome!(
            self.own_table_accessor(model)
                .delete_by_id(cx, id.clone())
                .await
        );
        if let Some(base_table) = &model.base_table_name {
            try_outcome!(
                self.base_table_accessor(model, base_table)
                    .delete_by_id(cx, id.clone())
                    .await
            );
        }
        info!(model = %model.code, id = %id, "entity deleted");

        let mut event = self.event(
            model,
            EventPayload::Deleted { before },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        Outcome::Ok(())
    }

    /// Attach target entities to a `many` relation of an existing entity.
    #[tracing::instrument(skip(self, cx, relations, options))]
    pub async fn add_relations(
        &self,
        cx: &Cx,
        model_code: &str,
        id: Value,
        property_code: &str,
        relations: Vec<Value>,
        options: &OperationOptions,
    ) -> Outcome<(), Error> {
        let model = lift!(self.registry.get(model_code));
        let (entity, relation) =
            try_outcome!(self.load_for_relation_change(cx, model, &id, property_code).await);
        let property = lift!(model.property(property_code).ok_or_else(|| Error::UnknownField {
            model: model.code.clone(),
            field: property_code.to_string(),
        }));

        // Membership rows exist only under link-table wiring; FK-wired
        // relations are managed through entity updates.
        if let RelationWiring::LinkTable(link) = &relation.wiring {
            let target_model = lift!(self.registry.get(&relation.target));
            for value in &relations {
                let target_id = lift!(relation_id(property, value));
                try_outcome!(
                    self.load_related_row(cx, model, property_code, target_model, &target_id)
                        .await
                );
                let row: Row = Row::from_iter([
                    (link.self_id_column.clone(), id.clone()),
                    (link.target_id_column.clone(), target_id),
                ]);
                try_outcome!(self.link_accessor(link).create_ignoring_conflict(cx, row).await);
            }
        }

        let mut event = self.event(
            model,
            EventPayload::RelationsAdded {
                entity,
                property: property_code.to_string(),
                relations,
            },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        Outcome::Ok(())
    }

    /// Detach target entities from a `many` relation of an existing entity.
    #[tracing::instrument(skip(self, cx, relations, options))]
    pub async fn remove_relations(
        &self,
        cx: &Cx,
        model_code: &str,
        id: Value,
        property_code: &str,
        relations: Vec<Value>,
        options: &OperationOptions,
    ) -> Outcome<(), Error> {
        let model = lift!(self.registry.get(model_code));
        let (entity, relation) =
            try_outcome!(self.load_for_relation_change(cx, model, &id, property_code).await);
        let property = lift!(model.property(property_code).ok_or_else(|| Error::UnknownField {
            model: model.code.clone(),
            field: property_code.to_string(),
        }));

        // FK-wired relations have no membership rows to delete.
        if let RelationWiring::LinkTable(link) = &relation.wiring {
            for value in &relations {
                let target_id = lift!(relation_id(property, value));
                try_outcome!(
                    self.link_accessor(link)
                        .delete_where(
                            cx,
                            vec![
                                RowFilter::eq(link.self_id_column.as_str(), id.clone()),
                                RowFilter::eq(link.target_id_column.as_str(), target_id),
                            ],
                        )
                        .await
                );
            }
        }

        let mut event = self.event(
            model,
            EventPayload::RelationsRemoved {
                entity,
                property: property_code.to_string(),
                relations,
            },
            &options.sender,
            &options.context,
        );
        try_outcome!(self.events.emit(cx, &mut event).await);
        Outcome::Ok(())
    }

    /// Load the entity and validate the property for add/remove relations.
    async fn load_for_relation_change(
        &self,
        cx: &Cx,
        model: &Model,
        id: &Value,
        property_code: &str,
    ) -> Outcome<(Entity, Relation), Error> {
        let row = try_outcome!(self.load_row_by_id(cx, model, id).await);
        let Some(row) = row else {
            return Outcome::Err(Error::NotFound {
                model: model.code.clone(),
                id: id.clone(),
            });
        };
        let Some(property) = model.property(property_code) else {
            return Outcome::Err(Error::UnknownField {
                model: model.code.clone(),
                field: property_code.to_string(),
            });
        };
        let Some(relation) = property.relation().filter(|r| r.is_many()) else {
            return Outcome::Err(Error::Query(format!(
                "'{property_code}' of model '{}' is not a to-many relation",
                model.code
            )));
        };
        Outcome::Ok((map_row_to_entity(model, &row, true), relation.clone()))
    }

    /// Write the relation items of a `many` property for an existing entity,
    /// returning the full target entities that were written.
    ///
    /// Items carrying an id must name an existing target; id-less entity
    /// values are created, with an FK back-reference carried in the insert
    /// itself.
    async fn attach_many(
        &self,
        cx: &Cx,
        model: &Model,
        property_code: &str,
        relation: &Relation,
        id: &Value,
        value: &Value,
        options: &OperationOptions,
    ) -> Outcome<Vec<Entity>, Error> {
        let property = lift!(model.property(property_code).ok_or_else(|| Error::UnknownField {
            model: model.code.clone(),
            field: property_code.to_string(),
        }));
        let Some(items) = value.as_array() else {
            return Outcome::Err(Error::InvalidRelationValue {
                property: property_code.to_string(),
                reason: format!("expected an array of related entities, got {value}"),
            });
        };
        let target_model = lift!(self.registry.get(&relation.target));
        let mut attached = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Map(map) if map.id().is_none() => {
                    let mut nested = Entity::from_iter(map.clone());
                    if let RelationWiring::SelfIdColumn { column } = &relation.wiring {
                        nested.insert(column.clone(), id.clone());
                    }
                    let created =
                        try_outcome!(self.create_inner(cx, &relation.target, nested, options).await);
                    if let RelationWiring::LinkTable(link) = &relation.wiring {
                        let created_id =
                            lift!(created.id().cloned().ok_or_else(|| Error::Database(format!(
                                "created '{}' entity has no id",
                                relation.target
                            ))));
                        let row: Row = Row::from_iter([
                            (link.self_id_column.clone(), id.clone()),
                            (link.target_id_column.clone(), created_id),
                        ]);
                        try_outcome!(
                            self.link_accessor(link).create_ignoring_conflict(cx, row).await
                        );
                    }
                    attached.push(created);
                }
                other => {
                    let target_id = lift!(relation_id(property, other));
                    let target_row = try_outcome!(
                        self.load_related_row(cx, model, property_code, target_model, &target_id)
                            .await
                    );
                    match &relation.wiring {
                        RelationWiring::LinkTable(link) => {
                            let row: Row = Row::from_iter([
                                (link.self_id_column.clone(), id.clone()),
                                (link.target_id_column.clone(), target_id),
                            ]);
                            try_outcome!(
                                self.link_accessor(link).create_ignoring_conflict(cx, row).await
                            );
                        }
                        RelationWiring::SelfIdColumn { column } => {
                            try_outcome!(
                                self.set_back_reference(
                                    cx,
                                    model,
                                    property_code,
                                    target_model,
                                    column,
                                    target_id,
                                    id,
                                )
                                .await
                            );
                        }
                        RelationWiring::TargetIdColumn { .. } => {
                            return Outcome::Err(Error::InvalidRelationValue {
                                property: property_code.to_string(),
                                reason: "a to-one relation cannot take a list".to_string(),
                            });
                        }
                    }
                    attached.push(map_row_to_entity(target_model, &target_row, false));
                }
            }
        }
        Outcome::Ok(attached)
    }

    /// Point a target row's back-reference column at `owner_id`, failing
    /// when the target row does not exist.
    #[allow(clippy::too_many_arguments)]
    async fn set_back_reference(
        &self,
        cx: &Cx,
        model: &Model,
        property_code: &str,
        target_model: &Model,
        column: &str,
        target_id: Value,
        owner_id: &Value,
    ) -> Outcome<(), Error> {
        let accessor = self.own_table_accessor(target_model);
        let changes = Row::from_iter([(column.to_string(), owner_id.clone())]);
        let updated = try_outcome!(accessor.update_by_id(cx, target_id.clone(), changes).await);
        if updated.is_none() {
            return Outcome::Err(Error::RelatedEntityNotFound {
                model: model.code.clone(),
                property: property_code.to_string(),
                target: target_model.code.clone(),
                id: target_id,
            });
        }
        Outcome::Ok(())
    }

    /// Load the target row behind a relation id, failing when no such
    /// entity exists.
    async fn load_related_row(
        &self,
        cx: &Cx,
        model: &Model,
        property_code: &str,
        target: &Model,
        id: &Value,
    ) -> Outcome<Row, Error> {
        let row = try_outcome!(self.load_row_by_id(cx, target, id).await);
        match row {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::RelatedEntityNotFound {
                model: model.code.clone(),
                property: property_code.to_string(),
                target: target.code.clone(),
                id: id.clone(),
            }),
        }
    }

    /// Load one row by id with every property column, base join included.
    async fn load_row_by_id(
        &self,
        cx: &Cx,
        model: &Model,
        id: &Value,
    ) -> Outcome<Option<Row>, Error> {
        let column = if model.has_base() {
            ColumnRef::qualified(model.table_name.clone(), "id")
        } else {
            ColumnRef::new("id")
        };
        let query = RowQuery {
            columns: property_columns(model, &model.properties.iter().collect::<Vec<_>>()),
            filters: vec![RowFilter::Relational {
                operator: RelationalOp::Eq,
                column,
                value: id.clone(),
            }],
            ..RowQuery::default()
        };
        let rows = try_outcome!(self.accessor(model).find(cx, &query).await);
        Outcome::Ok(rows.into_iter().next())
    }

    /// Hydrate one relation property across a batch of rows.
    async fn hydrate_relation(
        &self,
        cx: &Cx,
        model: &Model,
        property: &Property,
        rows: &mut [Row],
    ) -> Outcome<(), Error> {
        let Some(relation) = property.relation() else {
            return Outcome::Ok(());
        };
        let target = lift!(self.registry.get(&relation.target));

        match &relation.wiring {
            RelationWiring::TargetIdColumn { column } => {
                let ids = distinct_values(rows.iter().filter_map(|row| row.get(column)));
                let targets = try_outcome!(self.load_targets_by_ids(cx, target, ids, "id").await);
                for row in rows.iter_mut() {
                    let Some(fk) = row.get(column).cloned() else {
                        continue;
                    };
                    if fk.is_null() {
                        row.insert(property.code.clone(), Value::Null);
                    } else if let Some(target_row) = lookup(&targets, "id", &fk) {
                        row.insert(
                            property.code.clone(),
                            Value::Map(map_row_to_entity(target, &target_row, false)),
                        );
                    }
                }
            }
            RelationWiring::SelfIdColumn { column } => {
                let ids = distinct_values(rows.iter().filter_map(Row::id));
                let target_rows =
                    try_outcome!(self.load_targets_by_ids(cx, target, ids, column).await);
                for row in rows.iter_mut() {
                    let Some(own_id) = row.id().cloned() else {
                        continue;
                    };
                    let related: Vec<Value> = target_rows
                        .iter()
                        .filter(|t| t.get(column) == Some(&own_id))
                        .map(|t| Value::Map(map_row_to_entity(target, t, false)))
                        .collect();
                    row.insert(property.code.clone(), Value::Array(related));
                }
            }
            RelationWiring::LinkTable(link) => {
                let ids = distinct_values(rows.iter().filter_map(Row::id));
                let links = try_outcome!(
                    self.link_accessor(link)
                        .find(
                            cx,
                            &RowQuery::filtered(vec![RowFilter::in_values(
                                link.self_id_column.as_str(),
                                ids,
                            )]),
                        )
                        .await
                );
                let target_ids = distinct_values(
                    links.iter().filter_map(|l| l.get(&link.target_id_column)),
                );
                let targets =
                    try_outcome!(self.load_targets_by_ids(cx, target, target_ids, "id").await);
                for row in rows.iter_mut() {
                    let Some(own_id) = row.id().cloned() else {
                        continue;
                    };
                    let related: Vec<Value> = links
                        .iter()
                        .filter(|l| l.get(&link.self_id_column) == Some(&own_id))
                        .filter_map(|l| l.get(&link.target_id_column))
                        .filter_map(|tid| lookup(&targets, "id", tid))
                        .map(|t| Value::Map(map_row_to_entity(target, &t, false)))
                        .collect();
                    row.insert(property.code.clone(), Value::Array(related));
                }
            }
        }
        Outcome::Ok(())
    }

    /// Fetch target rows whose `key_column` is in `ids`, with every property
    /// column selected.
    async fn load_targets_by_ids(
        &self,
        cx: &Cx,
        target: &Model,
        ids: Vec<Value>,
        key_column: &str,
    ) -> Outcome<Vec<Row>, Error> {
        if ids.is_empty() {
            return Outcome::Ok(Vec::new());
        }
        let mut columns = property_columns(target, &target.properties.iter().collect::<Vec<_>>());
        let key_ref = if target.has_base() {
            ColumnRef::qualified(target.table_name.clone(), key_column)
        } else {
            ColumnRef::new(key_column)
        };
        if !columns.iter().any(|c| c.name == key_column) {
            columns.push(key_ref.clone());
        }
        let query = RowQuery {
            columns,
            filters: vec![RowFilter::in_values(key_ref, ids)],
            ..RowQuery::default()
        };
        self.accessor(target).find(cx, &query).await
    }
}

/// The properties a find should fetch: the explicit projection, or every
/// property except `many` relations.
fn requested_properties<'m>(
    model: &'m Model,
    properties: &[String],
) -> Result<Vec<&'m Property>, Error> {
    if properties.is_empty() {
        return Ok(model
            .properties
            .iter()
            .filter(|p| !p.relation().is_some_and(Relation::is_many))
            .collect());
    }
    properties
        .iter()
        .map(|code| {
            model.property(code).ok_or_else(|| Error::UnknownField {
                model: model.code.clone(),
                field: code.clone(),
            })
        })
        .collect()
}

/// The column list for a property set: id first, then every stored column,
/// qualified to their tables for derived models.
fn property_columns(model: &Model, properties: &[&Property]) -> Vec<ColumnRef> {
    let qualify = |is_base: bool, column: &str| -> ColumnRef {
        match (&model.base_table_name, is_base) {
            (Some(base), true) => ColumnRef::qualified(base.clone(), column),
            (Some(_), false) => ColumnRef::qualified(model.table_name.clone(), column),
            (None, _) => ColumnRef::new(column),
        }
    };
    let mut columns = vec![qualify(false, "id")];
    for property in properties {
        let Some(column) = property.stored_column() else {
            continue;
        };
        if column == "id" {
            continue;
        }
        if !columns.iter().any(|c| c.name == column) {
            columns.push(qualify(property.is_base, column));
        }
    }
    columns
}

fn distinct_values<'v>(values: impl Iterator<Item = &'v Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        if !value.is_null() && !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

fn lookup(rows: &[Row], key: &str, value: &Value) -> Option<Row> {
    rows.iter().find(|row| row.get(key) == Some(value)).cloned()
}
