//! The validated, immutable model registry.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{Model, ModelDef};

/// All models known to the engine, validated at load time.
///
/// Loading performs the cross-model checks individual [`Model`]s cannot:
/// base models exist and are not themselves derived, relation targets exist,
/// and base-model properties are merged into derived models. The registry is
/// immutable after `load`; share it behind an `Arc`.
#[derive(Debug)]
pub struct ModelRegistry {
    models: HashMap<String, Model>,
}

impl ModelRegistry {
    /// Validate a set of model definitions into a registry.
    pub fn load(defs: Vec<ModelDef>) -> Result<Self> {
        let mut models = HashMap::with_capacity(defs.len());
        for def in defs {
            let model = Model::from_def(def)?;
            if models.insert(model.code.clone(), model).is_some() {
                return Err(Error::Configuration(
                    "duplicate model code in registry".to_string(),
                ));
            }
        }

        // Resolve base models: record the base table and merge the base's
        // properties (marked is_base) after the derived model's own.
        let codes: Vec<String> = models.keys().cloned().collect();
        for code in &codes {
            let Some(base_code) = models[code].base.clone() else {
                continue;
            };
            let base = models.get(&base_code).ok_or_else(|| {
                Error::Configuration(format!(
                    "model '{code}': base model '{base_code}' is not registered"
                ))
            })?;
            if base.has_base() {
                return Err(Error::Configuration(format!(
                    "model '{code}': base model '{base_code}' is itself derived"
                )));
            }
            let base_table = base.table_name.clone();
            let inherited: Vec<_> = base
                .properties
                .iter()
                .filter(|p| models[code].property(&p.code).is_none())
                .cloned()
                .map(|mut p| {
                    p.is_base = true;
                    p
                })
                .collect();
            let model = models.get_mut(code).ok_or_else(|| {
                Error::Configuration(format!("model '{code}' vanished during load"))
            })?;
            model.base_table_name = Some(base_table);
            model.properties.extend(inherited);
        }

        // Every relation target must be registered.
        for model in models.values() {
            for prop in &model.properties {
                if let Some(relation) = prop.relation() {
                    if !models.contains_key(&relation.target) {
                        return Err(Error::Configuration(format!(
                            "model '{}': relation '{}' targets unknown model '{}'",
                            model.code, prop.code, relation.target
                        )));
                    }
                }
            }
        }

        Ok(ModelRegistry { models })
    }

    /// Look up a model by code.
    pub fn get(&self, code: &str) -> Result<&Model> {
        self.models
            .get(code)
            .ok_or_else(|| Error::UnknownModel(code.to_string()))
    }

    /// Whether a model is registered.
    pub fn contains(&self, code: &str) -> bool {
        self.models.contains_key(code)
    }

    /// Iterate over all registered models.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(json: serde_json::Value) -> Vec<ModelDef> {
        serde_json::from_value(json).expect("model defs")
    }

    #[test]
    fn test_base_properties_merged() {
        let registry = ModelRegistry::load(defs(serde_json::json!([
            {
                "namespace": "app",
                "code": "base_record",
                "tableName": "base_record",
                "derivedTypePropertyCode": "recordType",
                "properties": [
                    { "code": "id", "type": "integer" },
                    { "code": "recordType", "type": "text" }
                ]
            },
            {
                "namespace": "app",
                "code": "oc_user",
                "base": "base_record",
                "properties": [
                    { "code": "id", "type": "integer" },
                    { "code": "login", "type": "text" }
                ]
            }
        ])))
        .expect("registry");

        let user = registry.get("oc_user").expect("model");
        assert_eq!(user.base_table_name.as_deref(), Some("base_record"));
        let record_type = user.property("recordType").expect("merged property");
        assert!(record_type.is_base);
        // Own `id` wins over the base's copy.
        assert!(!user.property("id").expect("id").is_base);
        assert!(registry.get("base_record").expect("base").is_abstract());
    }

    #[test]
    fn test_unknown_base_rejected() {
        let err = ModelRegistry::load(defs(serde_json::json!([
            { "namespace": "app", "code": "oc_user", "base": "missing", "properties": [] }
        ])))
        .expect_err("missing base");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_relation_target_rejected() {
        let err = ModelRegistry::load(defs(serde_json::json!([
            {
                "namespace": "app",
                "code": "oc_user",
                "properties": [
                    { "code": "department", "type": "relation",
                      "relation": "one", "targetSingularCode": "oc_department" }
                ]
            }
        ])))
        .expect_err("missing target");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_model_lookup() {
        let registry = ModelRegistry::load(Vec::new()).expect("empty registry");
        assert!(matches!(
            registry.get("nope"),
            Err(Error::UnknownModel(code)) if code == "nope"
        ));
    }
}
