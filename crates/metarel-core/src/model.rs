//! Model and property metadata.
//!
//! Metadata arrives as camelCase definition documents ([`ModelDef`] /
//! [`PropertyDef`], usually deserialized from JSON) and is validated into
//! [`Model`] / [`Property`] values. The validated forms are what the rest of
//! the engine consumes; a definition that reaches a `Model` has a resolved
//! table name, a concrete scalar type or relation wiring for every property,
//! and defaulted column names.
//!
//! Cross-model checks (base models, relation targets, base property merging)
//! happen in the registry, which owns the full model set.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Raw model definition as authored in metadata documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    /// Namespace grouping related models, e.g. `"app"`.
    pub namespace: String,
    /// Singular model code, the registry lookup key, e.g. `"oc_user"`.
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Physical table name; defaults to the snake-cased code.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Schema override for this model's table.
    #[serde(default)]
    pub schema: Option<String>,
    /// Code of the base model this model derives from.
    #[serde(default)]
    pub base: Option<String>,
    /// Property whose value names the concrete derived type. A model carrying
    /// this is abstract: rows are only created through its derived models.
    #[serde(default)]
    pub derived_type_property_code: Option<String>,
    /// Property definitions.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

/// Raw property definition as authored in metadata documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    /// Logical property code, e.g. `"createdBy"`.
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Scalar type name (`text`, `integer`, ...) or `relation`.
    #[serde(rename = "type")]
    pub property_type: String,
    /// Physical column name; defaults to the snake-cased code.
    #[serde(default)]
    pub column_name: Option<String>,
    /// Whether writes must supply a value.
    #[serde(default)]
    pub required: bool,
    /// Relation cardinality, `one` or `many`. Only for `type: relation`.
    #[serde(default)]
    pub relation: Option<String>,
    /// Code of the related model. Only for `type: relation`.
    #[serde(default)]
    pub target_singular_code: Option<String>,
    /// FK column holding the target id — on this model's table for `one`
    /// relations, in the link table for link-wired `many` relations.
    #[serde(default)]
    pub target_id_column_name: Option<String>,
    /// FK column holding this model's id — on the target table for FK-wired
    /// `many` relations, in the link table for link-wired ones.
    #[serde(default)]
    pub self_id_column_name: Option<String>,
    /// Link table name for link-wired `many` relations.
    #[serde(default)]
    pub link_table_name: Option<String>,
    /// Schema override for the link table.
    #[serde(default)]
    pub link_schema: Option<String>,
}

/// Scalar column types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Text,
    Integer,
    Long,
    Double,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "text" | "option" => Some(ScalarType::Text),
            "integer" => Some(ScalarType::Integer),
            "long" => Some(ScalarType::Long),
            "double" => Some(ScalarType::Double),
            "boolean" => Some(ScalarType::Boolean),
            "date" => Some(ScalarType::Date),
            "datetime" => Some(ScalarType::DateTime),
            "json" => Some(ScalarType::Json),
            _ => None,
        }
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Link table wiring for a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    /// Schema override; the builder's default schema applies when absent.
    pub schema: Option<String>,
    /// Link table name.
    pub table: String,
    /// Column holding the owning entity's id.
    pub self_id_column: String,
    /// Column holding the target entity's id.
    pub target_id_column: String,
}

/// How a relation is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationWiring {
    /// FK column on the owning table pointing at the target's id. `one` only.
    TargetIdColumn {
        /// The FK column name.
        column: String,
    },
    /// FK column on the target table pointing back at the owner. `many` only.
    SelfIdColumn {
        /// The back-reference column name on the target table.
        column: String,
    },
    /// Dedicated link table of (self id, target id) pairs. `many` only.
    LinkTable(LinkTable),
}

/// A validated relation property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub cardinality: Cardinality,
    /// Code of the related model.
    pub target: String,
    pub wiring: RelationWiring,
}

impl Relation {
    /// Whether this is a `many` relation.
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// What a property holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar {
        scalar_type: ScalarType,
        /// Physical column on the owning table.
        column_name: String,
    },
    Relation(Relation),
}

/// A validated property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub code: String,
    pub name: Option<String>,
    pub required: bool,
    /// True when this property was merged in from the base model and is stored
    /// on the base table.
    pub is_base: bool,
    pub kind: PropertyKind,
}

impl Property {
    /// Whether this is a relation property.
    pub fn is_relation(&self) -> bool {
        matches!(self.kind, PropertyKind::Relation(_))
    }

    /// The relation, if this is a relation property.
    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind {
            PropertyKind::Relation(relation) => Some(relation),
            PropertyKind::Scalar { .. } => None,
        }
    }

    /// Whether this is a JSON-typed scalar. JSON-typed values are serialized
    /// to text and cast when bound.
    pub fn is_json(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Scalar {
                scalar_type: ScalarType::Json,
                ..
            }
        )
    }

    /// The column on the owning table that stores this property, if any.
    ///
    /// Scalars store in their column; `one` relations store the target id in
    /// their FK column; `many` relations store nothing on the owning table.
    pub fn stored_column(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Scalar { column_name, .. } => Some(column_name),
            PropertyKind::Relation(Relation {
                wiring: RelationWiring::TargetIdColumn { column },
                ..
            }) => Some(column),
            PropertyKind::Relation(_) => None,
        }
    }
}

/// A validated model.
///
/// `base_table_name` and the base model's merged properties (marked
/// [`Property::is_base`]) are filled in by the registry at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub namespace: String,
    pub code: String,
    pub name: Option<String>,
    pub table_name: String,
    pub schema: Option<String>,
    /// Code of the base model, when this model derives from one.
    pub base: Option<String>,
    /// Table name of the base model; present iff `base` is.
    pub base_table_name: Option<String>,
    /// Set on abstract models; see [`ModelDef::derived_type_property_code`].
    pub derived_type_property_code: Option<String>,
    pub properties: Vec<Property>,
}

impl Model {
    /// Whether entities of this model can only be created through derived
    /// models.
    pub fn is_abstract(&self) -> bool {
        self.derived_type_property_code.is_some()
    }

    /// Whether this model derives from a base model.
    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    /// Look up a property by its logical code.
    pub fn property(&self, code: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.code == code)
    }

    /// Look up a property by the column it stores into.
    pub fn property_by_column(&self, column: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.stored_column() == Some(column))
    }

    /// Look up a `one` relation property by its FK column name.
    pub fn property_by_target_id_column(&self, column: &str) -> Option<&Property> {
        self.properties.iter().find(|p| {
            matches!(
                &p.kind,
                PropertyKind::Relation(Relation {
                    wiring: RelationWiring::TargetIdColumn { column: c },
                    ..
                }) if c == column
            )
        })
    }

    /// Build a validated model from its definition.
    ///
    /// Validates scalar types and relation wiring shapes; cross-model checks
    /// are deferred to the registry.
    pub fn from_def(def: ModelDef) -> Result<Self> {
        let table_name = def
            .table_name
            .unwrap_or_else(|| to_snake_case(&def.code));
        let mut properties = Vec::with_capacity(def.properties.len());
        for prop in def.properties {
            properties.push(build_property(&def.code, prop)?);
        }
        Ok(Model {
            namespace: def.namespace,
            code: def.code,
            name: def.name,
            table_name,
            schema: def.schema,
            base: def.base,
            base_table_name: None,
            derived_type_property_code: def.derived_type_property_code,
            properties,
        })
    }
}

fn build_property(model_code: &str, def: PropertyDef) -> Result<Property> {
    let kind = if def.property_type == "relation" {
        PropertyKind::Relation(build_relation(model_code, &def)?)
    } else {
        let scalar_type = ScalarType::parse(&def.property_type).ok_or_else(|| {
            Error::Configuration(format!(
                "model '{model_code}': property '{}' has unknown type '{}'",
                def.code, def.property_type
            ))
        })?;
        let column_name = def
            .column_name
            .clone()
            .unwrap_or_else(|| to_snake_case(&def.code));
        PropertyKind::Scalar {
            scalar_type,
            column_name,
        }
    };
    Ok(Property {
        code: def.code,
        name: def.name,
        required: def.required,
        is_base: false,
        kind,
    })
}

fn build_relation(model_code: &str, def: &PropertyDef) -> Result<Relation> {
    let target = def.target_singular_code.clone().ok_or_else(|| {
        Error::Configuration(format!(
            "model '{model_code}': relation '{}' is missing targetSingularCode",
            def.code
        ))
    })?;
    let cardinality = match def.relation.as_deref() {
        Some("one") | None => Cardinality::One,
        Some("many") => Cardinality::Many,
        Some(other) => {
            return Err(Error::Configuration(format!(
                "model '{model_code}': relation '{}' has unknown cardinality '{other}'",
                def.code
            )));
        }
    };
    let wiring = match cardinality {
        Cardinality::One => {
            if def.self_id_column_name.is_some() || def.link_table_name.is_some() {
                return Err(Error::Configuration(format!(
                    "model '{model_code}': one-relation '{}' must be wired by a target id column only",
                    def.code
                )));
            }
            RelationWiring::TargetIdColumn {
                column: def
                    .target_id_column_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", to_snake_case(&def.code))),
            }
        }
        Cardinality::Many => match (&def.link_table_name, &def.self_id_column_name) {
            (Some(table), _) => RelationWiring::LinkTable(LinkTable {
                schema: def.link_schema.clone(),
                table: table.clone(),
                self_id_column: def
                    .self_id_column_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", to_snake_case(model_code))),
                target_id_column: def
                    .target_id_column_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", to_snake_case(&target))),
            }),
            (None, Some(column)) => {
                if def.target_id_column_name.is_some() {
                    return Err(Error::Configuration(format!(
                        "model '{model_code}': many-relation '{}' cannot combine selfIdColumnName with targetIdColumnName",
                        def.code
                    )));
                }
                RelationWiring::SelfIdColumn {
                    column: column.clone(),
                }
            }
            (None, None) => {
                return Err(Error::Configuration(format!(
                    "model '{model_code}': many-relation '{}' needs selfIdColumnName or linkTableName",
                    def.code
                )));
            }
        },
    };
    Ok(Relation {
        cardinality,
        target,
        wiring,
    })
}

/// Convert a camelCase code to its default snake_case column name.
pub fn to_snake_case(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 4);
    for (i, ch) in code.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(json: serde_json::Value) -> ModelDef {
        serde_json::from_value(json).expect("model def")
    }

    #[test]
    fn test_snake_case_defaults() {
        assert_eq!(to_snake_case("createdBy"), "created_by");
        assert_eq!(to_snake_case("name"), "name");
    }

    #[test]
    fn test_scalar_property_defaults_column() {
        let model = Model::from_def(def(serde_json::json!({
            "namespace": "app",
            "code": "oc_user",
            "properties": [
                { "code": "fullName", "type": "text" }
            ]
        })))
        .expect("model");
        assert_eq!(model.table_name, "oc_user");
        let prop = model.property("fullName").expect("property");
        assert_eq!(prop.stored_column(), Some("full_name"));
        assert!(!prop.is_relation());
    }

    #[test]
    fn test_one_relation_defaults_fk_column() {
        let model = Model::from_def(def(serde_json::json!({
            "namespace": "app",
            "code": "oc_user",
            "properties": [
                { "code": "department", "type": "relation",
                  "relation": "one", "targetSingularCode": "oc_department" }
            ]
        })))
        .expect("model");
        let prop = model.property("department").expect("property");
        assert_eq!(prop.stored_column(), Some("department_id"));
        assert_eq!(
            model.property_by_target_id_column("department_id").map(|p| p.code.as_str()),
            Some("department")
        );
    }

    #[test]
    fn test_many_relation_requires_wiring() {
        let err = Model::from_def(def(serde_json::json!({
            "namespace": "app",
            "code": "oc_user",
            "properties": [
                { "code": "roles", "type": "relation",
                  "relation": "many", "targetSingularCode": "oc_role" }
            ]
        })))
        .expect_err("wiring required");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_link_table_wiring_defaults_columns() {
        let model = Model::from_def(def(serde_json::json!({
            "namespace": "app",
            "code": "oc_user",
            "properties": [
                { "code": "roles", "type": "relation", "relation": "many",
                  "targetSingularCode": "oc_role", "linkTableName": "oc_user_role" }
            ]
        })))
        .expect("model");
        let relation = model.property("roles").and_then(Property::relation).expect("relation");
        match &relation.wiring {
            RelationWiring::LinkTable(link) => {
                assert_eq!(link.self_id_column, "oc_user_id");
                assert_eq!(link.target_id_column, "oc_role_id");
            }
            other => panic!("unexpected wiring: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_scalar_type_rejected() {
        let err = Model::from_def(def(serde_json::json!({
            "namespace": "app",
            "code": "oc_user",
            "properties": [ { "code": "x", "type": "uuid" } ]
        })))
        .expect_err("unknown type");
        assert!(matches!(err, Error::Configuration(_)));
    }
}
