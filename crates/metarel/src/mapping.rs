//! Row ↔ entity mapping and the partial-change diff.
//!
//! Rows speak physical column names, entities speak property codes. The
//! mappers translate between the two using model metadata, splitting writes
//! across the own table and the base table for derived models, and wrapping
//! JSON-typed values so the query builder binds them with a jsonb cast.

use metarel_core::{Entity, Error, Model, Property, Result, Row, Value};

/// Map a stored row to an entity.
///
/// Column keys translate to property codes; keys that already are property
/// codes (hydrated relation values merged into the row) pass through. For
/// `one` relations the raw FK column is dropped unless
/// `keep_non_property_fields` is set, since hydration delivers the relation
/// under its property code. Unknown keys are kept only when
/// `keep_non_property_fields` is set.
pub fn map_row_to_entity(model: &Model, row: &Row, keep_non_property_fields: bool) -> Entity {
    let mut entity = Entity::new();
    for (key, value) in row.iter() {
        if let Some(property) = model.property(key) {
            entity.insert(property.code.clone(), value.clone());
        } else if let Some(property) = model.property_by_column(key) {
            if property.is_relation() {
                if keep_non_property_fields {
                    entity.insert(key, value.clone());
                }
            } else {
                entity.insert(property.code.clone(), value.clone());
            }
        } else if keep_non_property_fields {
            entity.insert(key, value.clone());
        }
    }
    entity
}

/// Map entity data to table rows, split between the own table and the base
/// table.
///
/// Relation values must already be normalized to plain ids (see
/// [`relation_id`]); `many` relations store nothing here and are skipped.
/// JSON-typed properties are wrapped into [`Value::Json`] so the builder
/// serializes and casts them. Keys that resolve to no property are skipped.
pub fn map_entity_to_rows(model: &Model, entity: &Entity) -> Result<(Row, Row)> {
    let mut row = Row::new();
    let mut base_row = Row::new();
    for (key, value) in entity.iter() {
        let property = model
            .property(key)
            .or_else(|| model.property_by_column(key));
        let Some(property) = property else {
            continue;
        };
        let Some(column) = property.stored_column() else {
            continue;
        };
        let cell = if property.is_json() {
            Value::Json(value.to_json())
        } else if property.is_relation() {
            relation_id(property, value)?
        } else {
            value.clone()
        };
        if property.is_base {
            base_row.insert(column, cell);
        } else {
            row.insert(column, cell);
        }
    }
    Ok((row, base_row))
}

/// Extract the target id from a relation value.
///
/// Accepts a plain id, `null`, or an entity-shaped map carrying an `id`.
/// A map without an id means "create this entity first", which the caller
/// must have done before mapping; reaching one here is an error.
pub fn relation_id(property: &Property, value: &Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(_) | Value::Text(_) => Ok(value.clone()),
        Value::Map(map) => map.id().cloned().ok_or_else(|| Error::InvalidRelationValue {
            property: property.code.clone(),
            reason: "related entity value has no id".to_string(),
        }),
        other => Err(Error::InvalidRelationValue {
            property: property.code.clone(),
            reason: format!("expected an id or an entity, got {other}"),
        }),
    }
}

/// Compute the changed part of `changes` relative to `stored`.
///
/// Comparison is id-aware: `one` relation values compare by target id
/// regardless of whether either side is a plain id or an entity map, and
/// `many` relation values compare as id sets. Keys absent from `changes` are
/// never part of the diff; a key present with an equal value is dropped.
pub fn entity_part_changes(model: &Model, stored: &Entity, changes: &Entity) -> Entity {
    let mut diff = Entity::new();
    for (key, new_value) in changes.iter() {
        let property = model.property(key).or_else(|| model.property_by_column(key));
        let stored_value = stored.get(key).or_else(|| {
            // The stored entity may carry a one-relation as its raw FK column.
            property
                .and_then(Property::stored_column)
                .and_then(|column| stored.get(column))
        });
        let changed = match (property, stored_value) {
            (Some(p), Some(old)) if p.relation().is_some_and(|r| r.is_many()) => {
                !same_id_set(old, new_value)
            }
            (Some(p), Some(old)) if p.is_relation() => !same_id(old, new_value),
            (_, Some(old)) => old != new_value,
            (_, None) => !new_value.is_null(),
        };
        if changed {
            diff.insert(key, new_value.clone());
        }
    }
    diff
}

fn id_of(value: &Value) -> Option<Value> {
    match value {
        Value::Map(map) => map.id().cloned(),
        other => Some(other.clone()),
    }
}

fn same_id(left: &Value, right: &Value) -> bool {
    id_of(left) == id_of(right)
}

fn same_id_set(left: &Value, right: &Value) -> bool {
    let collect = |value: &Value| -> Option<Vec<Value>> {
        let items = value.as_array()?;
        let mut ids: Vec<Value> = items.iter().filter_map(id_of).collect();
        ids.sort_by_key(|v| v.to_json().to_string());
        Some(ids)
    };
    match (collect(left), collect(right)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metarel_core::{DataMap, ModelDef, ModelRegistry};

    fn registry() -> ModelRegistry {
        let defs: Vec<ModelDef> = serde_json::from_value(serde_json::json!([
            {
                "namespace": "app",
                "code": "oc_user",
                "properties": [
                    { "code": "id", "type": "integer" },
                    { "code": "fullName", "type": "text" },
                    { "code": "profile", "type": "json" },
                    { "code": "department", "type": "relation",
                      "relation": "one", "targetSingularCode": "oc_department" },
                    { "code": "roles", "type": "relation", "relation": "many",
                      "targetSingularCode": "oc_role", "linkTableName": "oc_user_role" }
                ]
            },
            { "namespace": "app", "code": "oc_department",
              "properties": [ { "code": "id", "type": "integer" } ] },
            { "namespace": "app", "code": "oc_role",
              "properties": [ { "code": "id", "type": "integer" } ] }
        ]))
        .expect("defs");
        ModelRegistry::load(defs).expect("registry")
    }

    #[test]
    fn test_row_maps_columns_to_codes() {
        let registry = registry();
        let model = registry.get("oc_user").expect("model");
        let row: Row = vec![
            ("id", Value::Int(1)),
            ("full_name", Value::Text("Alex".into())),
            ("department_id", Value::Int(3)),
            ("extra", Value::Int(9)),
        ]
        .into();

        let entity = map_row_to_entity(model, &row, false);
        assert_eq!(entity.get("fullName"), Some(&Value::Text("Alex".into())));
        // Raw FK and unknown columns drop without keep_non_property_fields.
        assert!(entity.get("department_id").is_none());
        assert!(entity.get("extra").is_none());

        let entity = map_row_to_entity(model, &row, true);
        assert_eq!(entity.get("department_id"), Some(&Value::Int(3)));
        assert_eq!(entity.get("extra"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_entity_maps_to_row_with_json_and_relation() {
        let registry = registry();
        let model = registry.get("oc_user").expect("model");
        let entity: Entity = vec![
            ("fullName", Value::Text("Alex".into())),
            ("profile", Value::Map(vec![("lang", "en")].into())),
            ("department", Value::Map(vec![("id", 3i64)].into())),
            ("roles", Value::Array(vec![Value::Int(5)])),
        ]
        .into();

        let (row, base_row) = map_entity_to_rows(model, &entity).expect("rows");
        assert!(base_row.is_empty());
        assert_eq!(row.get("full_name"), Some(&Value::Text("Alex".into())));
        assert_eq!(
            row.get("profile"),
            Some(&Value::Json(serde_json::json!({"lang": "en"})))
        );
        assert_eq!(row.get("department_id"), Some(&Value::Int(3)));
        // Many relations never store on the own table.
        assert!(row.get("roles").is_none());
    }

    #[test]
    fn test_diff_is_id_aware() {
        let registry = registry();
        let model = registry.get("oc_user").expect("model");
        let stored: Entity = vec![
            ("fullName", Value::Text("Alex".into())),
            ("department", Value::Map(vec![("id", 3i64)].into())),
            (
                "roles",
                Value::Array(vec![
                    Value::Map(DataMap::from(vec![("id", 5i64)])),
                    Value::Map(DataMap::from(vec![("id", 9i64)])),
                ]),
            ),
        ]
        .into();
        let changes: Entity = vec![
            ("fullName", Value::Text("Alex".into())),
            ("department", Value::Int(3)),
            ("roles", Value::Array(vec![Value::Int(9), Value::Int(5)])),
        ]
        .into();

        // Same name, same department id, same role id set: nothing changed.
        let diff = entity_part_changes(model, &stored, &changes);
        assert!(diff.is_empty());

        let changes: Entity = vec![("department", Value::Int(4))].into();
        let diff = entity_part_changes(model, &stored, &changes);
        assert_eq!(diff.get("department"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_diff_reads_stored_fk_column() {
        let registry = registry();
        let model = registry.get("oc_user").expect("model");
        // Before-image loaded with keep_non_property_fields carries the FK
        // column instead of a hydrated relation.
        let stored: Entity = vec![("department_id", Value::Int(3))].into();
        let changes: Entity = vec![("department", Value::Int(3))].into();
        assert!(entity_part_changes(model, &stored, &changes).is_empty());
    }

    #[test]
    fn test_relation_value_without_id_rejected() {
        let registry = registry();
        let model = registry.get("oc_user").expect("model");
        let property = model.property("department").expect("property");
        let err = relation_id(property, &Value::Map(DataMap::new())).expect_err("no id");
        assert!(matches!(err, Error::InvalidRelationValue { .. }));
    }
}
