//! 工具参数 Schema：schemars 生成 + 调用前的必填 / 类型校验
//!
//! `schema_value::<T>()` 把类型化参数结构体转成 JSON Schema（放入工具目录与提示词）；
//! `conform_args` 按 schema 检查必填键并把标量转换成声明的类型，失败返回原因字符串。

use schemars::{schema_for, JsonSchema};
use serde_json::{Number, Value};

/// 为参数结构体生成 JSON Schema
pub fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    })
}

/// 单行参数摘要，如 `expression: string, expected: string`，用于提示词中的工具目录
pub fn describe_params(schema: &Value) -> String {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return String::new();
    };
    let required = required_keys(schema);
    props
        .iter()
        .map(|(key, prop)| {
            let ty = declared_types(prop).join("|");
            let ty = if ty.is_empty() { "any".to_string() } else { ty };
            if required.iter().any(|r| r == key) {
                format!("{key}: {ty}")
            } else {
                format!("{key}?: {ty}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// 按 schema 校验并转换参数；返回转换后的参数对象
pub fn conform_args(schema: &Value, args: Value) -> Result<Value, String> {
    let Value::Object(mut obj) = args else {
        return Err("arguments must be an object".to_string());
    };

    for key in required_keys(schema) {
        if !obj.contains_key(&key) {
            return Err(format!("missing required argument '{key}'"));
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in props {
            if let Some(value) = obj.remove(key) {
                let coerced = coerce(prop, value).map_err(|e| format!("argument '{key}': {e}"))?;
                obj.insert(key.clone(), coerced);
            }
        }
    }
    Ok(Value::Object(obj))
}

fn required_keys(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn declared_types(prop: &Value) -> Vec<String> {
    match prop.get("type") {
        Some(Value::String(t)) => vec![t.clone()],
        Some(Value::Array(ts)) => ts.iter().filter_map(|t| t.as_str().map(String::from)).collect(),
        _ => Vec::new(),
    }
}

fn coerce(prop: &Value, value: Value) -> Result<Value, String> {
    let types = declared_types(prop);
    if types.is_empty() {
        return Ok(value);
    }
    if value.is_null() {
        return if types.iter().any(|t| t == "null") {
            Ok(Value::Null)
        } else {
            Err("null is not allowed".to_string())
        };
    }

    let mut last_err = String::new();
    for ty in types.iter().filter(|t| t.as_str() != "null") {
        match coerce_to(ty, prop, value.clone()) {
            Ok(v) => return Ok(v),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn coerce_to(ty: &str, prop: &Value, value: Value) -> Result<Value, String> {
    match (ty, value) {
        ("string", Value::String(s)) => Ok(Value::String(s)),
        ("string", v @ (Value::Number(_) | Value::Bool(_))) => Ok(Value::String(v.to_string())),
        ("number", Value::Number(n)) => Ok(Value::Number(n)),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("'{s}' is not a number")),
        ("integer", Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Ok(Value::Number(n))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
                    _ => Err(format!("{n} is not an integer")),
                }
            }
        }
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{s}' is not an integer")),
        ("boolean", Value::Bool(b)) => Ok(Value::Bool(b)),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        ("array", value) => {
            let items = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            match prop.get("items") {
                Some(item_schema) if item_schema.is_object() => items
                    .into_iter()
                    .map(|item| coerce(item_schema, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Ok(Value::Array(items)),
            }
        }
        ("object", Value::Object(m)) => Ok(Value::Object(m)),
        (ty, v) => Err(format!("expected {ty}, got {}", type_name(&v))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
