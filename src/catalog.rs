//! Tool catalog: the tools offered to the model and which of them take a
//! caller-scoped session id.
//!
//! Whether a tool takes a session id is decided once, at registration, by
//! listing the fields its schema declares. Schemas that cannot be read are
//! treated as not taking one, so an odd schema never causes an injection.

use std::collections::HashSet;

use serde_json::Value;

use crate::types::ToolDefinition;

/// Argument name the session id is injected under.
pub const SESSION_ID_FIELD: &str = "session_id";

/// One registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchemaEntry {
    pub definition: ToolDefinition,
    pub accepts_session_id: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolSchemaEntry>,
    session_tools: HashSet<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a list of definitions. Duplicate names keep the first.
    pub fn from_definitions(definitions: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut catalog = Self::new();
        for definition in definitions {
            catalog.register(definition);
        }
        catalog
    }

    /// Register a tool. Returns false if a tool with that name already exists.
    pub fn register(&mut self, definition: ToolDefinition) -> bool {
        if self.contains(&definition.name) {
            tracing::debug!(tool = %definition.name, "Skipping duplicate tool");
            return false;
        }
        let accepts_session_id = declared_fields(&definition.input_schema)
            .is_some_and(|fields| fields.iter().any(|f| f == SESSION_ID_FIELD));
        if accepts_session_id {
            self.session_tools.insert(definition.name.clone());
        }
        self.entries.push(ToolSchemaEntry {
            definition,
            accepts_session_id,
        });
        true
    }

    pub fn requires_session_id(&self, tool_name: &str) -> bool {
        self.session_tools.contains(tool_name)
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.entries.iter().any(|e| e.definition.name == tool_name)
    }

    pub fn entries(&self) -> &[ToolSchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions as presented to the model, with the session id field
    /// removed from every schema.
    pub fn definitions_for_model(&self) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|entry| {
                let mut definition = entry.definition.clone();
                if entry.accepts_session_id {
                    hide_field(&mut definition.input_schema, SESSION_ID_FIELD);
                }
                definition
            })
            .collect()
    }
}

/// List the argument names a schema declares.
///
/// Recognized shapes:
/// - JSON Schema: `{"properties": {...}}`, possibly nested under
///   `inputSchema`, `input_schema` or `parameters`
/// - declared fields: `{"fields": ["a", "b"]}` or `{"fields": {"a": ..}}`
/// - versioned model listings: `{"model_fields": {..}}` / `{"__fields__": {..}}`
pub fn declared_fields(schema: &Value) -> Option<Vec<String>> {
    let map = schema.as_object()?;

    for wrapper in ["inputSchema", "input_schema", "parameters"] {
        if let Some(inner) = map.get(wrapper).and_then(declared_fields) {
            return Some(inner);
        }
    }

    for key in ["properties", "model_fields", "__fields__"] {
        if let Some(fields) = map.get(key).and_then(Value::as_object) {
            return Some(fields.keys().cloned().collect());
        }
    }

    match map.get("fields")? {
        Value::Object(fields) => Some(fields.keys().cloned().collect()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| {
                    item.as_str()
                        .or_else(|| item.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect(),
        ),
        _ => None,
    }
}

fn hide_field(schema: &mut Value, field: &str) {
    let Some(map) = schema.as_object_mut() else {
        return;
    };
    for wrapper in ["inputSchema", "input_schema", "parameters"] {
        if let Some(inner) = map.get_mut(wrapper) {
            hide_field(inner, field);
        }
    }
    for key in ["properties", "model_fields", "__fields__"] {
        if let Some(fields) = map.get_mut(key).and_then(Value::as_object_mut) {
            fields.remove(field);
        }
    }
    match map.get_mut("fields") {
        Some(Value::Object(fields)) => {
            fields.remove(field);
        }
        Some(Value::Array(items)) => items.retain(|item| {
            item.as_str()
                .or_else(|| item.get("name").and_then(Value::as_str))
                != Some(field)
        }),
        _ => {}
    }
    if let Some(Value::Array(required)) = map.get_mut("required") {
        required.retain(|name| name.as_str() != Some(field));
    }
}
