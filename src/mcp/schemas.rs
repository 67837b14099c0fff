//! JSON schema builders for MCP tools.

use crate::tasks::ChapterSpec;
use serde_json::{Map, Value};

/// Build the schema describing the `split-pdf` tool input.
pub(crate) fn split_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "file_id".into(),
        string_schema("Identifier returned when the PDF was uploaded"),
    );

    let mut chapters_schema = Map::new();
    chapters_schema.insert("type".into(), Value::String("array".into()));
    chapters_schema.insert(
        "description".into(),
        Value::String(
            "Chapters to extract in output order; pages are 1-based and inclusive.".into(),
        ),
    );
    chapters_schema.insert("minItems".into(), Value::Number(1.into()));
    chapters_schema.insert("items".into(), Value::Object(chapter_item_schema()));
    properties.insert("chapters".into(), Value::Object(chapters_schema));

    finalize_object_schema(properties, &["file_id", "chapters"])
}

/// Build the schema for tools addressing a single task.
pub(crate) fn task_id_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "task_id".into(),
        string_schema("Identifier returned by split-pdf"),
    );
    finalize_object_schema(properties, &["task_id"])
}

/// Build the schema describing the `list-tasks` tool input.
pub(crate) fn list_tasks_input_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "file_id".into(),
        string_schema("Only return tasks splitting this file"),
    );

    let mut active_schema = Map::new();
    active_schema.insert("type".into(), Value::String("boolean".into()));
    active_schema.insert(
        "description".into(),
        Value::String("Return only pending and processing tasks, oldest first".into()),
    );
    active_schema.insert("default".into(), Value::Bool(false));
    properties.insert("active_only".into(), Value::Object(active_schema));

    finalize_object_schema(properties, &[])
}

/// Build the schema describing the `cleanup-tasks` tool input.
pub(crate) fn cleanup_input_schema(default_hours: u64) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut hours_schema = Map::new();
    hours_schema.insert("type".into(), Value::String("integer".into()));
    hours_schema.insert(
        "description".into(),
        Value::String("Remove finished tasks older than this many hours".into()),
    );
    hours_schema.insert("minimum".into(), Value::Number(0.into()));
    hours_schema.insert("default".into(), Value::Number(default_hours.into()));
    properties.insert("max_age_hours".into(), Value::Object(hours_schema));

    finalize_object_schema(properties, &[])
}

/// Schema for tools without arguments.
pub(crate) fn empty_object_schema() -> Map<String, Value> {
    finalize_object_schema(Map::new(), &[])
}

fn chapter_item_schema() -> Map<String, Value> {
    let root = schemars::schema_for!(ChapterSpec);
    let mut schema = match serde_json::to_value(root) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    schema.remove("$schema");
    schema.remove("title");
    schema.insert("additionalProperties".into(), Value::Bool(false));
    schema
}

fn string_schema(description: &str) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("string".into()));
    schema.insert("description".into(), Value::String(description.into()));
    Value::Object(schema)
}

fn finalize_object_schema(properties: Map<String, Value>, required: &[&str]) -> Map<String, Value> {
    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert(
            "required".into(),
            Value::Array(
                required
                    .iter()
                    .map(|&key| Value::String(key.into()))
                    .collect(),
            ),
        );
    }
    schema.insert("additionalProperties".into(), Value::Bool(false));
    schema
}
