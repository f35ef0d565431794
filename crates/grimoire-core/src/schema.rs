//! Input-schema validator model.
//!
//! Tool sources declare their parameter shape with a `z.object({...})`
//! style schema. The extractor in `grimoire-compiler` reconstructs that
//! declaration into these types without executing the source; `safe_parse`
//! then provides the same validate-with-defaults contract the validator
//! library would at runtime.

use serde_json::{Map, Value};

use crate::error::{ToolError, ToolResult};

/// The type of a single schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
    /// A string value.
    String,
    /// A numeric value (integer or float).
    Number,
    /// A boolean value.
    Boolean,
    /// One of a fixed set of string variants.
    Enum(Vec<String>),
    /// An array whose elements match the inner type.
    Array(Box<SchemaType>),
    /// A string-keyed map with unconstrained values.
    Record,
    /// An unsupported declaration; accepts any value.
    Unknown,
}

impl SchemaType {
    /// Checks whether `value` conforms to this type.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Enum(variants) => value
                .as_str()
                .is_some_and(|text| variants.iter().any(|variant| variant == text)),
            Self::Array(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| inner.accepts(item))),
            Self::Record => value.is_object(),
            Self::Unknown => true,
        }
    }

    /// Human-readable name used in validation error messages.
    fn describe(&self) -> String {
        match self {
            Self::String => "string".to_owned(),
            Self::Number => "number".to_owned(),
            Self::Boolean => "boolean".to_owned(),
            Self::Enum(variants) => format!("one of [{}]", variants.join(", ")),
            Self::Array(inner) => format!("array of {}", inner.describe()),
            Self::Record => "record".to_owned(),
            Self::Unknown => "any".to_owned(),
        }
    }
}

/// One named field of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    /// Property name.
    pub name: String,
    /// Declared field type.
    pub ty: SchemaType,
    /// Description attached via `.describe(...)`.
    pub description: Option<String>,
    /// Default value attached via `.default(...)`.
    pub default: Option<Value>,
    /// Whether the field was marked `.optional()` or `.nullish()`.
    pub optional: bool,
}

/// An object schema reconstructed from a `z.object({...})` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    /// Declared fields in source order.
    pub fields: Vec<FieldSchema>,
    /// Whether unknown keys are rejected (`z.strictObject`).
    pub strict: bool,
}

impl ObjectSchema {
    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// The input-schema contract attached to a tool definition.
///
/// `Permissive` is the fallback when a source declares no recognizable
/// schema: every object passes through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSchema {
    /// A reconstructed object schema with typed fields.
    Object(ObjectSchema),
    /// Accepts any input unchanged.
    Permissive,
}

impl InputSchema {
    /// Validates `input` against the schema, filling in declared defaults.
    ///
    /// Missing input is treated as an empty object so that schemas composed
    /// entirely of defaulted/optional fields still parse.
    ///
    /// # Errors
    /// Returns a schema-stage error naming the offending field when a
    /// required field is missing, a field has the wrong type, or a strict
    /// object receives unknown keys.
    pub fn safe_parse(&self, input: &Value) -> ToolResult<Value> {
        let schema = match self {
            Self::Permissive => return Ok(input.clone()),
            Self::Object(schema) => schema,
        };

        let empty = Map::new();
        let object = match input {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::Schema(format!(
                    "expected an object of parameters, got {other}"
                )));
            }
        };

        if schema.strict {
            for key in object.keys() {
                if schema.field(key).is_none() {
                    return Err(ToolError::Schema(format!("unrecognized key: {key}")));
                }
            }
        }

        let mut parsed = Map::new();
        for field in &schema.fields {
            match object.get(&field.name) {
                Some(value) if !value.is_null() => {
                    if !field.ty.accepts(value) {
                        return Err(ToolError::Schema(format!(
                            "field '{}' expected {}, got {value}",
                            field.name,
                            field.ty.describe()
                        )));
                    }
                    parsed.insert(field.name.clone(), value.clone());
                }
                Some(_) | None => {
                    if let Some(default) = &field.default {
                        parsed.insert(field.name.clone(), default.clone());
                    } else if !field.optional {
                        return Err(ToolError::Schema(format!(
                            "missing required field '{}'",
                            field.name
                        )));
                    }
                }
            }
        }

        // Non-strict objects pass through keys the schema does not declare.
        if !schema.strict {
            for (key, value) in object {
                if schema.field(key).is_none() {
                    parsed.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(Value::Object(parsed))
    }
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> InputSchema {
        InputSchema::Object(ObjectSchema {
            fields: vec![
                FieldSchema {
                    name: "path".to_owned(),
                    ty: SchemaType::String,
                    description: Some("File path".to_owned()),
                    default: None,
                    optional: false,
                },
                FieldSchema {
                    name: "limit".to_owned(),
                    ty: SchemaType::Number,
                    description: None,
                    default: Some(json!(10)),
                    optional: true,
                },
                FieldSchema {
                    name: "mode".to_owned(),
                    ty: SchemaType::Enum(vec!["read".to_owned(), "write".to_owned()]),
                    description: None,
                    default: None,
                    optional: true,
                },
            ],
            strict: false,
        })
    }

    #[test]
    fn test_safe_parse_applies_defaults() {
        let schema = sample_schema();
        let parsed = schema.safe_parse(&json!({"path": "a.txt"})).unwrap();
        assert_eq!(parsed, json!({"path": "a.txt", "limit": 10}));
    }

    #[test]
    fn test_safe_parse_missing_required() {
        let schema = sample_schema();
        let error = schema.safe_parse(&json!({})).unwrap_err();
        assert!(error.to_string().contains("path"));
    }

    #[test]
    fn test_safe_parse_type_mismatch() {
        let schema = sample_schema();
        let error = schema
            .safe_parse(&json!({"path": "a.txt", "limit": "ten"}))
            .unwrap_err();
        assert!(error.to_string().contains("limit"));
    }

    #[test]
    fn test_safe_parse_enum_variants() {
        let schema = sample_schema();
        let parsed = schema
            .safe_parse(&json!({"path": "a.txt", "mode": "read"}))
            .unwrap();
        assert_eq!(parsed.get("mode"), Some(&json!("read")));

        let error = schema
            .safe_parse(&json!({"path": "a.txt", "mode": "append"}))
            .unwrap_err();
        assert!(error.to_string().contains("mode"));
    }

    #[test]
    fn test_safe_parse_strict_rejects_unknown_keys() {
        let schema = InputSchema::Object(ObjectSchema {
            fields: vec![FieldSchema {
                name: "path".to_owned(),
                ty: SchemaType::String,
                description: None,
                default: None,
                optional: false,
            }],
            strict: true,
        });
        let error = schema
            .safe_parse(&json!({"path": "a.txt", "extra": 1}))
            .unwrap_err();
        assert!(error.to_string().contains("extra"));
    }

    #[test]
    fn test_safe_parse_loose_passes_unknown_keys() {
        let schema = sample_schema();
        let parsed = schema
            .safe_parse(&json!({"path": "a.txt", "extra": true}))
            .unwrap();
        assert_eq!(parsed.get("extra"), Some(&json!(true)));
    }

    #[test]
    fn test_permissive_passthrough() {
        let schema = InputSchema::Permissive;
        let input = json!({"anything": [1, 2, 3]});
        assert_eq!(schema.safe_parse(&input).unwrap(), input);
    }

    #[test]
    fn test_null_input_treated_as_empty_object() {
        let schema = InputSchema::Object(ObjectSchema {
            fields: vec![FieldSchema {
                name: "limit".to_owned(),
                ty: SchemaType::Number,
                description: None,
                default: Some(json!(5)),
                optional: true,
            }],
            strict: false,
        });
        let parsed = schema.safe_parse(&Value::Null).unwrap();
        assert_eq!(parsed, json!({"limit": 5}));
    }

    #[test]
    fn test_array_type_checks_elements() {
        let ty = SchemaType::Array(Box::new(SchemaType::Number));
        assert!(ty.accepts(&json!([1, 2, 3])));
        assert!(!ty.accepts(&json!([1, "two"])));
    }
}
