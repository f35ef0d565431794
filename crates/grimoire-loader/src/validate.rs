//! Diagnostic validation for tool authors.
//!
//! The production load path accepts any renderer output; this module is the
//! stricter check behind `grimoire check`, which additionally exercises the
//! renderers and verifies their output is actually renderable.

use std::path::Path;

use serde_json::{Value, json};

use grimoire_core::{RunnerConfig, ToolDefinition, ToolError, ToolResult};

use crate::loader::ToolLoader;
use crate::registry::AdaptedTool;

/// Whether a value is renderable: a primitive, an array of renderables, or
/// an element object (`type` string plus optional `props`/`children`).
#[must_use]
pub fn is_renderable(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_renderable),
        Value::Object(map) => {
            if !map.get("type").is_some_and(Value::is_string) {
                return false;
            }
            if let Some(props) = map.get("props") {
                if !props.is_object() {
                    return false;
                }
                if let Some(children) = props.get("children") {
                    if !is_renderable(children) {
                        return false;
                    }
                }
            }
            map.get("children").is_none_or(is_renderable)
        }
    }
}

/// Loads the candidate at `path` and runs the full diagnostic pass: the
/// load pipeline, a schema round-trip on empty input, and each declared
/// renderer with placeholder arguments, checking the output shape.
///
/// # Errors
/// Returns the failing stage's error: whatever the load pipeline produced,
/// a schema-stage error when empty params do not validate, or a
/// render-stage error when a renderer's output is not renderable.
pub async fn validate_tool(
    loader: &ToolLoader,
    runner: &RunnerConfig,
    path: &Path,
) -> ToolResult<ToolDefinition> {
    let result = loader
        .load_candidate(path, grimoire_core::ToolSource::Custom)
        .await;

    let Some(definition) = result.definition else {
        let message = result
            .error
            .unwrap_or_else(|| "tool failed to load".to_owned());
        return Err(ToolError::Schema(message));
    };

    // Schema round-trip: defaults must produce a valid params object when
    // all fields are optional or defaulted; a required field failing here
    // is useful author feedback, not a defect.
    let sample_params = match definition.input_schema.safe_parse(&Value::Null) {
        Ok(params) => params,
        Err(err) => {
            tracing::debug!(
                "tool {} rejects empty params ({err}); using an empty object for render checks",
                definition.name
            );
            json!({})
        }
    };

    let adapter = AdaptedTool::new(definition.clone(), runner.clone());

    if definition.has_render_doing {
        let rendered = adapter.render_doing(&sample_params).await?;
        if !is_renderable(&rendered) {
            return Err(ToolError::Render(format!(
                "tool {} renderToolDoing returned a non-renderable value",
                definition.name
            )));
        }
    }

    if definition.has_render_result {
        let rendered = adapter
            .render_result(&sample_params, &json!("sample output"))
            .await?;
        if !is_renderable(&rendered) {
            return Err(ToolError::Render(format!(
                "tool {} renderToolResult returned a non-renderable value",
                definition.name
            )));
        }
    }

    Ok(definition)
}

#[cfg(test)]
#[cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, reason = "Allow for tests")
)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_renderable() {
        assert!(is_renderable(&json!(null)));
        assert!(is_renderable(&json!(true)));
        assert!(is_renderable(&json!(42)));
        assert!(is_renderable(&json!("text")));
    }

    #[test]
    fn test_element_objects() {
        assert!(is_renderable(&json!({"type": "div"})));
        assert!(is_renderable(&json!({
            "type": "div",
            "props": {"className": "x", "children": "inner"},
        })));
        assert!(is_renderable(&json!({
            "type": "ul",
            "children": [{"type": "li", "children": "item"}],
        })));
    }

    #[test]
    fn test_non_renderable_objects() {
        assert!(!is_renderable(&json!({"foo": "bar"})));
        assert!(!is_renderable(&json!({"type": 3})));
        assert!(!is_renderable(&json!({"type": "div", "props": "not an object"})));
        assert!(!is_renderable(&json!({
            "type": "div",
            "children": [{"no_type": true}],
        })));
    }

    #[test]
    fn test_arrays_require_all_renderable() {
        assert!(is_renderable(&json!(["a", 1, {"type": "b"}])));
        assert!(!is_renderable(&json!(["a", {"not": "element"}])));
    }
}
