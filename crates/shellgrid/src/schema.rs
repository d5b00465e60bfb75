//! JSON Schema output for the persisted and configured types.
//!
//! Schemas are generated with schemars (draft 2020-12). Storage layers and
//! editors that only understand draft-07 can ask for a rewritten schema:
//! - `$defs` → `definitions`
//! - nullable `anyOf` / `type` arrays → the non-null type

use schemars::schema_for;
use serde_json::Value;
use shellgrid_core::{ClientConfig, SessionSnapshot};

use crate::cli::SchemaTarget;
use crate::replay::ReplayReport;

/// JSON Schema for `target`.
pub fn generate(target: SchemaTarget, draft07: bool) -> serde_json::Result<Value> {
    let schema = match target {
        SchemaTarget::Snapshot => schema_for!(SessionSnapshot),
        SchemaTarget::Config => schema_for!(ClientConfig),
        SchemaTarget::Replay => schema_for!(ReplayReport),
    };
    let value = serde_json::to_value(&schema)?;
    Ok(if draft07 {
        SchemaTransformer::transform(value)
    } else {
        value
    })
}

/// Rewrites schemars output for draft-07 consumers.
pub struct SchemaTransformer;

impl SchemaTransformer {
    /// Apply every rewrite.
    pub fn transform(mut schema: Value) -> Value {
        schema = Self::convert_defs_to_definitions(schema);
        schema = Self::simplify_nullable(schema);
        schema
    }

    /// Move `$defs` to `definitions` and rewrite references.
    fn convert_defs_to_definitions(mut schema: Value) -> Value {
        if let Some(obj) = schema.as_object_mut() {
            if let Some(defs) = obj.remove("$defs") {
                obj.insert("definitions".to_string(), defs);
            }
            if let Some(Value::String(dialect)) = obj.get("$schema") {
                if dialect.contains("2020-12") {
                    obj.insert(
                        "$schema".to_string(),
                        Value::String("http://json-schema.org/draft-07/schema#".to_string()),
                    );
                }
            }
        }
        Self::update_references(&mut schema);
        schema
    }

    fn update_references(value: &mut Value) {
        match value {
            Value::Object(obj) => {
                for (key, val) in obj.iter_mut() {
                    if key == "$ref" {
                        if let Some(reference) = val.as_str() {
                            if let Some(name) = reference.strip_prefix("#/$defs/") {
                                *val = Value::String(format!("#/definitions/{name}"));
                            }
                        }
                    } else {
                        Self::update_references(val);
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(Self::update_references),
            _ => {}
        }
    }

    /// Drop the `null` alternative from optional fields.
    fn simplify_nullable(mut schema: Value) -> Value {
        Self::simplify_in_place(&mut schema);
        schema
    }

    fn simplify_in_place(value: &mut Value) {
        match value {
            Value::Object(obj) => {
                if let Some(Value::Array(any_of)) = obj.get("anyOf") {
                    if let Some(Value::Object(simplified)) = Self::non_null_alternative(any_of) {
                        obj.remove("anyOf");
                        obj.extend(simplified);
                    }
                }

                if let Some(Value::Array(types)) = obj.get("type") {
                    let non_null: Vec<Value> = types
                        .iter()
                        .filter(|t| t.as_str() != Some("null"))
                        .cloned()
                        .collect();
                    if non_null.len() == 1 && types.len() == 2 {
                        obj.insert("type".to_string(), non_null[0].clone());
                    }
                }

                obj.values_mut().for_each(Self::simplify_in_place);
            }
            Value::Array(items) => items.iter_mut().for_each(Self::simplify_in_place),
            _ => {}
        }
    }

    /// `[X, {type: null}]` in either order → `X`.
    fn non_null_alternative(any_of: &[Value]) -> Option<Value> {
        if any_of.len() != 2 {
            return None;
        }
        let (kept, null) = if Self::is_null_type(&any_of[1]) {
            (&any_of[0], &any_of[1])
        } else if Self::is_null_type(&any_of[0]) {
            (&any_of[1], &any_of[0])
        } else {
            return None;
        };

        // Only a bare {type: null}; anything richer is kept as is.
        if null.as_object().is_some_and(|o| o.len() == 1) {
            Some(kept.clone())
        } else {
            None
        }
    }

    fn is_null_type(schema: &Value) -> bool {
        schema
            .as_object()
            .and_then(|o| o.get("type"))
            .and_then(Value::as_str)
            == Some("null")
    }
}
