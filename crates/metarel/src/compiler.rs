//! Lowering entity filters to column filters.
//!
//! The compiler resolves property codes to physical columns (qualified to the
//! base table for inherited properties) and eliminates `exists`/`notExists`
//! nodes, either by rewriting them onto the FK column directly or by running
//! sub-queries against the target model and substituting the resulting id
//! sets.

use std::future::Future;
use std::pin::Pin;

use asupersync::{Cx, Outcome};
use metarel_access::{RowQuery, TableAccessor, TableSpec};
use metarel_core::{
    try_outcome, EntityFilter, Error, ExistenceOp, Model, ModelRegistry, OrderBy, Property,
    RelationWiring, RelationalOp, Result, SetItemType, SetOp, SqlExecutor, Value,
};
use metarel_query::{ColumnRef, QueryBuilder, RowFilter, RowOrderBy};
use tracing::debug;

/// Maximum nesting depth of an entity filter tree, counting both logical
/// groups and existence sub-filters. Exceeding it is a hard error rather
/// than a stack gamble.
pub const MAX_FILTER_DEPTH: usize = 16;

/// Compiles entity filter trees for one registry, running relation
/// sub-queries through the given executor.
pub struct FilterCompiler<'a, E: SqlExecutor> {
    registry: &'a ModelRegistry,
    builder: &'a QueryBuilder,
    executor: &'a E,
}

impl<'a, E: SqlExecutor> FilterCompiler<'a, E> {
    pub fn new(registry: &'a ModelRegistry, builder: &'a QueryBuilder, executor: &'a E) -> Self {
        FilterCompiler {
            registry,
            builder,
            executor,
        }
    }

    /// Compile a filter list against a model.
    pub async fn compile(
        &self,
        cx: &Cx,
        model: &Model,
        filters: &[EntityFilter],
    ) -> Outcome<Vec<RowFilter>, Error> {
        self.compile_level(cx, model, filters, 0).await
    }

    /// Depth-checked recursive compile. Boxed because the recursion crosses
    /// await points (existence sub-queries).
    fn compile_level<'f>(
        &'f self,
        cx: &'f Cx,
        model: &'f Model,
        filters: &'f [EntityFilter],
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Outcome<Vec<RowFilter>, Error>> + Send + 'f>> {
        Box::pin(async move {
            if depth > MAX_FILTER_DEPTH {
                return Outcome::Err(Error::FilterTooDeep {
                    max: MAX_FILTER_DEPTH,
                });
            }
            let mut compiled = Vec::with_capacity(filters.len());
            for filter in filters {
                let row_filter = match filter {
                    EntityFilter::Logical { operator, filters } => RowFilter::Logical {
                        operator: *operator,
                        filters: try_outcome!(
                            self.compile_level(cx, model, filters, depth + 1).await
                        ),
                    },
                    EntityFilter::Existence {
                        operator,
                        field,
                        filters,
                    } => {
                        try_outcome!(
                            self.compile_existence(cx, model, *operator, field, filters, depth)
                                .await
                        )
                    }
                    EntityFilter::Unary { operator, field } => RowFilter::Unary {
                        operator: *operator,
                        column: match self.resolve_field(model, field) {
                            Ok(column) => column,
                            Err(err) => return Outcome::Err(err),
                        },
                    },
                    EntityFilter::Set {
                        operator,
                        field,
                        value,
                        item_type,
                    } => RowFilter::Set {
                        operator: *operator,
                        column: match self.resolve_field(model, field) {
                            Ok(column) => column,
                            Err(err) => return Outcome::Err(err),
                        },
                        values: value.clone(),
                        item_type: item_type.unwrap_or(SetItemType::Int),
                    },
                    EntityFilter::Match {
                        operator,
                        field,
                        value,
                    } => RowFilter::Match {
                        operator: *operator,
                        column: match self.resolve_field(model, field) {
                            Ok(column) => column,
                            Err(err) => return Outcome::Err(err),
                        },
                        value: value.clone(),
                    },
                    EntityFilter::Relational {
                        operator,
                        field,
                        value,
                    } => RowFilter::Relational {
                        operator: *operator,
                        column: match self.resolve_field(model, field) {
                            Ok(column) => column,
                            Err(err) => return Outcome::Err(err),
                        },
                        value: value.clone(),
                    },
                };
                compiled.push(row_filter);
            }
            Outcome::Ok(compiled)
        })
    }

    /// Resolve a filter field to a column.
    ///
    /// Resolution order: property code, stored column name, then the field
    /// taken as a literal column. A `many` relation code only makes sense
    /// under `exists`/`notExists` and is rejected here.
    fn resolve_field(&self, model: &Model, field: &str) -> Result<ColumnRef> {
        let property = model
            .property(field)
            .or_else(|| model.property_by_column(field));
        if let Some(property) = property {
            let Some(column) = property.stored_column() else {
                return Err(Error::Query(format!(
                    "relation '{}' of model '{}' can only be filtered with exists/notExists",
                    property.code, model.code
                )));
            };
            return Ok(self.qualify(model, Some(property), column));
        }
        Ok(self.qualify(model, None, field))
    }

    /// Resolve an order-by list. Unlike filter fields, an unresolvable
    /// order-by field is a configuration error rather than a literal column.
    pub fn resolve_order_by(&self, model: &Model, order_by: &[OrderBy]) -> Result<Vec<RowOrderBy>> {
        order_by
            .iter()
            .map(|item| {
                let property = model
                    .property(&item.field)
                    .or_else(|| model.property_by_column(&item.field));
                let Some(property) = property else {
                    return Err(Error::Configuration(format!(
                        "cannot order by unknown field '{}' of model '{}'",
                        item.field, model.code
                    )));
                };
                let Some(column) = property.stored_column() else {
                    return Err(Error::Configuration(format!(
                        "cannot order by relation '{}' of model '{}'",
                        property.code, model.code
                    )));
                };
                Ok(RowOrderBy {
                    column: self.qualify(model, Some(property), column),
                    desc: item.desc,
                })
            })
            .collect()
    }

    /// Qualify a column to its table. Only meaningful for derived models,
    /// where inherited properties live on the base table.
    fn qualify(&self, model: &Model, property: Option<&Property>, column: &str) -> ColumnRef {
        if let Some(base_table) = &model.base_table_name {
            let table = if property.is_some_and(|p| p.is_base) {
                base_table.clone()
            } else {
                model.table_name.clone()
            };
            ColumnRef::qualified(table, column)
        } else {
            ColumnRef::new(column)
        }
    }

    async fn compile_existence(
        &self,
        cx: &Cx,
        model: &Model,
        operator: ExistenceOp,
        field: &str,
        filters: &[EntityFilter],
        depth: usize,
    ) -> Outcome<RowFilter, Error> {
        let Some(property) = model.property(field) else {
            return Outcome::Err(Error::UnknownField {
                model: model.code.clone(),
                field: field.to_string(),
            });
        };
        let Some(relation) = property.relation() else {
            return Outcome::Err(Error::Query(format!(
                "exists/notExists needs a relation, but '{}' of model '{}' is a scalar",
                property.code, model.code
            )));
        };
        let target = match self.registry.get(&relation.target) {
            Ok(target) => target,
            Err(err) => return Outcome::Err(err),
        };
        let negated = operator == ExistenceOp::NotExists;

        match &relation.wiring {
            RelationWiring::TargetIdColumn { column } => {
                // Fast path: a lone id constraint on the target needs no
                // sub-query, it is a direct constraint on the FK column.
                if let Some(rewritten) = self.direct_fk_filter(model, property, column, filters, negated) {
                    debug!(model = %model.code, property = %property.code, "existence fast path");
                    return Outcome::Ok(rewritten);
                }
                let ids = try_outcome!(self.matching_target_ids(cx, target, filters, depth).await);
                Outcome::Ok(self.id_set_filter(
                    self.qualify(model, Some(property), column),
                    ids,
                    negated,
                ))
            }
            RelationWiring::SelfIdColumn { column } => {
                // Owners referenced by matching target rows.
                let rows = try_outcome!(
                    self.matching_target_rows(cx, target, filters, depth, Some(column)).await
                );
                let ids = rows
                    .iter()
                    .filter_map(|row| row.get(column.as_str()))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .collect();
                Outcome::Ok(self.id_set_filter(self.own_id_column(model), ids, negated))
            }
            RelationWiring::LinkTable(link) => {
                let target_ids =
                    try_outcome!(self.matching_target_ids(cx, target, filters, depth).await);
                let link_accessor = TableAccessor::new(
                    self.executor,
                    self.builder,
                    TableSpec {
                        schema: link.schema.clone(),
                        table: link.table.clone(),
                        base_table: None,
                    },
                );
                let query = RowQuery::filtered(vec![RowFilter::in_values(
                    link.target_id_column.as_str(),
                    target_ids,
                )]);
                let links = try_outcome!(link_accessor.find(cx, &query).await);
                let ids = links
                    .iter()
                    .filter_map(|row| row.get(&link.self_id_column))
                    .cloned()
                    .collect();
                Outcome::Ok(self.id_set_filter(self.own_id_column(model), ids, negated))
            }
        }
    }

    /// Rewrite a single `eq`/`in` constraint on the target's id into a
    /// direct filter on the FK column, negated for `notExists`.
    fn direct_fk_filter(
        &self,
        model: &Model,
        property: &Property,
        fk_column: &str,
        filters: &[EntityFilter],
        negated: bool,
    ) -> Option<RowFilter> {
        let [single] = filters else { return None };
        let column = self.qualify(model, Some(property), fk_column);
        match single {
            EntityFilter::Relational {
                operator: RelationalOp::Eq,
                field,
                value,
            } if field == "id" => Some(RowFilter::Relational {
                operator: if negated { RelationalOp::Ne } else { RelationalOp::Eq },
                column,
                value: value.clone(),
            }),
            EntityFilter::Set {
                operator: SetOp::In,
                field,
                value,
                item_type,
            } if field == "id" => Some(RowFilter::Set {
                operator: if negated { SetOp::NotIn } else { SetOp::In },
                column,
                values: value.clone(),
                item_type: item_type.unwrap_or(SetItemType::Int),
            }),
            _ => None,
        }
    }

    fn id_set_filter(&self, column: ColumnRef, ids: Vec<Value>, negated: bool) -> RowFilter {
        RowFilter::Set {
            operator: if negated { SetOp::NotIn } else { SetOp::In },
            column,
            values: ids,
            item_type: SetItemType::Int,
        }
    }

    fn own_id_column(&self, model: &Model) -> ColumnRef {
        if model.has_base() {
            ColumnRef::qualified(model.table_name.clone(), "id")
        } else {
            ColumnRef::new("id")
        }
    }

    /// Run the sub-filters against the target model and collect matching ids.
    async fn matching_target_ids(
        &self,
        cx: &Cx,
        target: &Model,
        filters: &[EntityFilter],
        depth: usize,
    ) -> Outcome<Vec<Value>, Error> {
        let rows = try_outcome!(self.matching_target_rows(cx, target, filters, depth, None).await);
        let ids = rows.iter().filter_map(|row| row.id()).cloned().collect();
        Outcome::Ok(ids)
    }

    /// Sub-find on the target model, restricted to its id column plus an
    /// optional back-reference column.
    async fn matching_target_rows(
        &self,
        cx: &Cx,
        target: &Model,
        filters: &[EntityFilter],
        depth: usize,
        extra_column: Option<&str>,
    ) -> Outcome<Vec<metarel_core::Row>, Error> {
        let compiled = try_outcome!(self.compile_level(cx, target, filters, depth + 1).await);
        let mut columns = vec![self.own_id_column(target)];
        if let Some(extra) = extra_column {
            columns.push(if target.has_base() {
                ColumnRef::qualified(target.table_name.clone(), extra)
            } else {
                ColumnRef::new(extra)
            });
        }
        let accessor = TableAccessor::new(
            self.executor,
            self.builder,
            TableSpec {
                schema: target.schema.clone(),
                table: target.table_name.clone(),
                base_table: target.base_table_name.clone(),
            },
        );
        let query = RowQuery {
            columns,
            filters: compiled,
            ..RowQuery::default()
        };
        accessor.find(cx, &query).await
    }
}
