//! Tool parameter schemas
//!
//! Providers describe tool inputs as JSON-Schema-like trees; the model wants
//! its own declaration format with uppercase type tags. Both directions go
//! through a closed tagged type so every case is explicit: anything a
//! provider reports that we do not recognize becomes `String`.

use serde_json::{json, Map, Value};

/// One node of a tool parameter schema
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    pub kind: ParamKind,
    pub description: Option<String>,
}

/// The closed set of parameter kinds the model declaration format supports
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamSchema>),
    Object {
        properties: Vec<(String, ParamSchema)>,
        required: Vec<String>,
    },
}

impl ParamSchema {
    fn new(kind: ParamKind, description: &str) -> Self {
        Self {
            kind,
            description: if description.is_empty() {
                None
            } else {
                Some(description.to_string())
            },
        }
    }

    pub fn string(description: &str) -> Self {
        Self::new(ParamKind::String, description)
    }

    pub fn integer(description: &str) -> Self {
        Self::new(ParamKind::Integer, description)
    }

    pub fn number(description: &str) -> Self {
        Self::new(ParamKind::Number, description)
    }

    pub fn boolean(description: &str) -> Self {
        Self::new(ParamKind::Boolean, description)
    }

    pub fn array(description: &str, item: ParamSchema) -> Self {
        Self::new(ParamKind::Array(Box::new(item)), description)
    }

    pub fn object(
        properties: Vec<(&str, ParamSchema)>,
        required: Vec<&str>,
    ) -> Self {
        Self::new(
            ParamKind::Object {
                properties: properties
                    .into_iter()
                    .map(|(name, schema)| (name.to_string(), schema))
                    .collect(),
                required: required.into_iter().map(|s| s.to_string()).collect(),
            },
            "",
        )
    }

    /// Render this schema in the model's declaration format
    pub fn to_declaration(&self) -> Value {
        let mut out = Map::new();
        let type_tag = match &self.kind {
            ParamKind::String => "STRING",
            ParamKind::Integer => "INTEGER",
            ParamKind::Number => "NUMBER",
            ParamKind::Boolean => "BOOLEAN",
            ParamKind::Array(_) => "ARRAY",
            ParamKind::Object { .. } => "OBJECT",
        };
        out.insert("type".to_string(), json!(type_tag));

        if let Some(description) = &self.description {
            out.insert("description".to_string(), json!(description));
        }

        match &self.kind {
            ParamKind::Array(item) => {
                out.insert("items".to_string(), item.to_declaration());
            }
            ParamKind::Object {
                properties,
                required,
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_declaration()))
                    .collect();
                out.insert("properties".to_string(), Value::Object(props));
                if !required.is_empty() {
                    out.insert("required".to_string(), json!(required));
                }
            }
            _ => {}
        }

        Value::Object(out)
    }

    /// Convert a provider's JSON-Schema-like node. Total: unrecognized or
    /// missing type tags become `String`, arrays without item schemas get
    /// string items.
    pub fn from_json_schema(schema: &Value) -> Self {
        let description = schema
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");

        let kind = match schema.get("type").and_then(Value::as_str) {
            Some("integer") => ParamKind::Integer,
            Some("number") => ParamKind::Number,
            Some("boolean") => ParamKind::Boolean,
            Some("array") => {
                let item = schema
                    .get("items")
                    .map(Self::from_json_schema)
                    .unwrap_or_else(|| Self::string(""));
                ParamKind::Array(Box::new(item))
            }
            Some("object") => {
                let properties = schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, sub)| (name.clone(), Self::from_json_schema(sub)))
                            .collect()
                    })
                    .unwrap_or_default();
                let required = schema
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                ParamKind::Object {
                    properties,
                    required,
                }
            }
            // "string" and every unrecognized tag
            _ => ParamKind::String,
        };

        Self::new(kind, description)
    }
}

/// Declared surface of one tool
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// None for tools that take no arguments
    pub params: Option<ParamSchema>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, params: Option<ParamSchema>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    /// Function declaration in the model's expected format
    pub fn to_declaration(&self) -> Value {
        let mut out = Map::new();
        out.insert("name".to_string(), json!(self.name));
        out.insert("description".to_string(), json!(self.description));
        if let Some(params) = &self.params {
            out.insert("parameters".to_string(), params.to_declaration());
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_defaults_to_string() {
        let schema = ParamSchema::from_json_schema(&json!({"type": "timestamp"}));
        assert_eq!(schema.kind, ParamKind::String);

        let missing = ParamSchema::from_json_schema(&json!({"description": "no type"}));
        assert_eq!(missing.kind, ParamKind::String);
        assert_eq!(missing.description.as_deref(), Some("no type"));
    }

    #[test]
    fn test_nested_conversion_preserves_structure() {
        let native = json!({
            "type": "object",
            "properties": {
                "lessons": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "price": {"type": "integer"},
                            "paid": {"type": "boolean"}
                        },
                        "required": ["price"]
                    }
                }
            },
            "required": ["lessons"]
        });

        let schema = ParamSchema::from_json_schema(&native);
        let decl = schema.to_declaration();

        assert_eq!(decl["type"], "OBJECT");
        assert_eq!(decl["required"], json!(["lessons"]));
        let items = &decl["properties"]["lessons"]["items"];
        assert_eq!(items["type"], "OBJECT");
        assert_eq!(items["properties"]["price"]["type"], "INTEGER");
        assert_eq!(items["properties"]["paid"]["type"], "BOOLEAN");
        assert_eq!(items["required"], json!(["price"]));
    }

    #[test]
    fn test_array_without_items_gets_string_items() {
        let schema = ParamSchema::from_json_schema(&json!({"type": "array"}));
        let decl = schema.to_declaration();
        assert_eq!(decl["type"], "ARRAY");
        assert_eq!(decl["items"]["type"], "STRING");
    }

    #[test]
    fn test_tool_spec_without_params_omits_parameters() {
        let spec = ToolSpec::new("get_all_lessons", "Read every recorded lesson", None);
        let decl = spec.to_declaration();
        assert_eq!(decl["name"], "get_all_lessons");
        assert!(decl.get("parameters").is_none());
    }

    #[test]
    fn test_builder_declaration() {
        let spec = ToolSpec::new(
            "list_events",
            "List calendar events in a date range",
            Some(ParamSchema::object(
                vec![
                    ("start_date", ParamSchema::string("Start date in YYYY-MM-DD format")),
                    ("end_date", ParamSchema::string("End date in YYYY-MM-DD format")),
                ],
                vec!["start_date", "end_date"],
            )),
        );

        let decl = spec.to_declaration();
        assert_eq!(decl["parameters"]["type"], "OBJECT");
        assert_eq!(
            decl["parameters"]["properties"]["start_date"]["type"],
            "STRING"
        );
        assert_eq!(decl["parameters"]["required"], json!(["start_date", "end_date"]));
    }
}
