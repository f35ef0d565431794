//! Value conversion between QuickJS and `serde_json`.

use rquickjs::{Array, Ctx, Error as QuickJsError, Object, Value as JsValue};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value};

use grimoire_core::{ToolError, ToolResult};

/// Converts a QuickJS value to a `serde_json` value.
///
/// Functions, symbols, and other non-data values become `null`.
///
/// # Errors
/// Returns an execute-stage error if string extraction or container
/// iteration fails inside the engine.
pub fn js_value_to_json(value: &JsValue<'_>) -> ToolResult<Value> {
    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }
    if let Some(bool_val) = value.as_bool() {
        return Ok(Value::Bool(bool_val));
    }
    if let Some(int_val) = value.as_int() {
        return Ok(Value::Number(int_val.into()));
    }
    if let Some(float_val) = value.as_float() {
        return Ok(JsonNumber::from_f64(float_val).map_or(Value::Null, Value::Number));
    }
    if let Some(string_val) = value.as_string() {
        let text = string_val
            .to_string()
            .map_err(|err| ToolError::Execute(format!("String conversion failed: {err}")))?;
        return Ok(Value::String(text));
    }
    if let Some(array) = value.clone().into_array() {
        return js_array_to_json(&array);
    }
    if let Some(object) = value.clone().into_object() {
        return js_object_to_json(&object);
    }
    Ok(Value::Null)
}

fn js_array_to_json(array: &Array<'_>) -> ToolResult<Value> {
    let mut result = Vec::with_capacity(array.len());
    for item in array.iter::<JsValue>() {
        let item =
            item.map_err(|err| ToolError::Execute(format!("Array iteration failed: {err}")))?;
        result.push(js_value_to_json(&item)?);
    }
    Ok(Value::Array(result))
}

fn js_object_to_json(object: &Object<'_>) -> ToolResult<Value> {
    let mut map = JsonMap::new();
    for item in object.props::<String, JsValue>() {
        let (key, val) =
            item.map_err(|err| ToolError::Execute(format!("Object iteration failed: {err}")))?;
        map.insert(key, js_value_to_json(&val)?);
    }
    Ok(Value::Object(map))
}

/// Converts a `serde_json` value to a QuickJS value.
///
/// # Errors
/// Returns an engine error if allocation inside the context fails.
pub fn json_to_js_value<'js>(ctx: &Ctx<'js>, value: &Value) -> Result<JsValue<'js>, QuickJsError> {
    match value {
        Value::Null => Ok(JsValue::new_null(ctx.clone())),
        Value::Bool(bool_val) => Ok(JsValue::new_bool(ctx.clone(), *bool_val)),
        Value::Number(num) => Ok(number_to_js(ctx, num)),
        Value::String(string_val) => {
            let js_str = rquickjs::String::from_str(ctx.clone(), string_val)?;
            Ok(js_str.into_value())
        }
        Value::Array(arr) => {
            let js_arr = Array::new(ctx.clone())?;
            for (idx, item) in arr.iter().enumerate() {
                js_arr.set(idx, json_to_js_value(ctx, item)?)?;
            }
            Ok(js_arr.into_value())
        }
        Value::Object(obj) => {
            let js_obj = Object::new(ctx.clone())?;
            for (key, val) in obj {
                js_obj.set(key.as_str(), json_to_js_value(ctx, val)?)?;
            }
            Ok(js_obj.into_value())
        }
    }
}

/// Integers that fit in an `i32` stay integers; everything else becomes a
/// float (lossy above 2^53, like JS numbers themselves).
fn number_to_js<'js>(ctx: &Ctx<'js>, num: &JsonNumber) -> JsValue<'js> {
    if let Some(int_val) = num.as_i64() {
        return match i32::try_from(int_val) {
            Ok(as_int) => JsValue::new_int(ctx.clone(), as_int),
            #[allow(clippy::cast_precision_loss, reason = "JS numbers are f64")]
            Err(_) => JsValue::new_float(ctx.clone(), int_val as f64),
        };
    }
    num.as_f64().map_or_else(
        || JsValue::new_null(ctx.clone()),
        |float_val| JsValue::new_float(ctx.clone(), float_val),
    )
}
