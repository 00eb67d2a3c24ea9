//! JSON ⇄ JsValue conversions at the sandbox boundary.
//!
//! Props, globals and GraphQL payloads cross into the sandbox as JSON;
//! render results cross back out. Symbols and other non-JSON values map to
//! null on the way out, matching `JSON.stringify` semantics.

use boa_engine::object::JsObject;
use boa_engine::object::builtins::JsArray;
use boa_engine::property::PropertyKey;
use boa_engine::{Context, js_string, value::JsValue};
use prerender_common::protocol::{RenderError, Result};
use serde_json::Value as JsonValue;

/// Builds a sandbox value from JSON.
pub fn json_to_js(json: &JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .or_else(|| n.as_i64().map(JsValue::new))
            .ok_or_else(|| RenderError::Sandbox("number out of range".to_string())),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        JsonValue::Array(items) => {
            let array = JsArray::new(ctx);
            for (index, item) in items.iter().enumerate() {
                let value = json_to_js(item, ctx)?;
                array.push(value, ctx).map_err(|e| {
                    RenderError::Sandbox(format!("failed to push array element {}: {}", index, e))
                })?;
            }
            Ok(array.into())
        }
        JsonValue::Object(fields) => {
            let object = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in fields {
                let value = json_to_js(value, ctx)?;
                object
                    .create_data_property_or_throw(js_string!(key.as_str()), value, ctx)
                    .map_err(|e| {
                        RenderError::Sandbox(format!("failed to set property '{}': {}", key, e))
                    })?;
            }
            Ok(object.into())
        }
    }
}

/// Reads a sandbox value back out as JSON.
pub fn js_to_json(value: &JsValue, ctx: &mut Context) -> Result<JsonValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(JsonValue::Null);
    }
    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }
    if let Some(i) = value.as_i32() {
        return Ok(JsonValue::Number(i.into()));
    }
    if let Some(n) = value.as_number() {
        return serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .ok_or_else(|| RenderError::Sandbox("non-finite number in render result".to_string()));
    }
    if let Some(s) = value.as_string() {
        let s = s
            .to_std_string()
            .map_err(|e| RenderError::Sandbox(format!("lossy string in render result: {:?}", e)))?;
        return Ok(JsonValue::String(s));
    }

    let object = match value.as_object() {
        Some(object) => object,
        // Symbols and the rest of the non-JSON values
        None => return Ok(JsonValue::Null),
    };

    if object.is_array() {
        let array = JsArray::from_object(object.clone())
            .map_err(|e| RenderError::Sandbox(format!("value is not a valid array: {}", e)))?;
        let length: usize = array
            .length(ctx)
            .map_err(|e| RenderError::Sandbox(format!("failed to read array length: {}", e)))?
            .try_into()
            .map_err(|_| RenderError::Sandbox("array length overflow".to_string()))?;

        let mut items = Vec::with_capacity(length);
        for index in 0..length {
            let item = array.get(index as u64, ctx).map_err(|e| {
                RenderError::Sandbox(format!("failed to read array element {}: {}", index, e))
            })?;
            items.push(js_to_json(&item, ctx)?);
        }
        return Ok(JsonValue::Array(items));
    }

    let keys = object
        .own_property_keys(ctx)
        .map_err(|e| RenderError::Sandbox(format!("failed to read object keys: {}", e)))?;

    let mut fields = serde_json::Map::new();
    for key in keys {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string().map_err(|e| {
                RenderError::Sandbox(format!("lossy property key: {:?}", e))
            })?,
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };
        let property = object.get(key, ctx).map_err(|e| {
            RenderError::Sandbox(format!("failed to read property '{}': {}", name, e))
        })?;
        fields.insert(name, js_to_json(&property, ctx)?);
    }
    Ok(JsonValue::Object(fields))
}
