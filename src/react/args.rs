//! 工具调用参数解码
//!
//! 解析 `name|k=v|a.b=[1, 2]|...`：
//! - 引号（" 或 '）与方括号内的 `|`、`=`、`,` 都是字面字符
//! - 点分键构造嵌套对象（`input.string=abc` → `{"input": {"string": "abc"}}`）
//! - `[a, b]` 构造列表，可嵌套
//! - 标量依次尝试 整数 / 浮点 / 布尔 / null，其余为字符串（去掉包裹的引号）
//!
//! 任何不合法的输入都返回 DecodeError，由调用方转为 Unknown，不做猜测性修复。

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid tool name '{0}'")]
    BadToolName(String),
    #[error("argument without '=': '{0}'")]
    MissingEquals(String),
    #[error("invalid argument key '{0}'")]
    BadKey(String),
    #[error("unbalanced quotes or brackets in '{0}'")]
    Unbalanced(String),
    #[error("conflicting argument key '{0}'")]
    KeyConflict(String),
}

/// 标识符：字母或下划线开头，后接字母、数字、下划线、连字符
fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// 只由数字、小数点、指数与符号组成（排除 inf / NaN 这类 f64 可解析的单词）
fn looks_numeric(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

/// 在顶层（不在引号或方括号内）按分隔符切分；引号或括号不配对时报错
fn split_top_level(input: &str, sep: char) -> Result<Vec<&str>, DecodeError> {
    let mut parts = Vec::new();
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| DecodeError::Unbalanced(input.to_string()))?;
                }
                c if c == sep && depth == 0 => {
                    parts.push(&input[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    if quote.is_some() || depth != 0 {
        return Err(DecodeError::Unbalanced(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

/// 在第一个顶层 `=` 处切成 (key, value)
fn split_assignment(segment: &str) -> Result<(&str, &str), DecodeError> {
    let parts = split_top_level(segment, '=')?;
    if parts.len() < 2 {
        return Err(DecodeError::MissingEquals(segment.to_string()));
    }
    let key_len = parts[0].len();
    Ok((&segment[..key_len], &segment[key_len + 1..]))
}

fn strip_quotes(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if s.len() >= 2 {
        let (first, last) = (bytes[0], bytes[s.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return Some(&s[1..s.len() - 1]);
        }
    }
    None
}

/// 解码单个值（标量或列表）
pub fn decode_value(raw: &str) -> Result<Value, DecodeError> {
    let s = raw.trim();

    if let Some(inner) = s.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| DecodeError::Unbalanced(s.to_string()))?;
        // 确认首个 '[' 与末尾 ']' 配对，而不是 "[a] + [b]" 这类
        split_top_level(inner, ',')?;
        if inner.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        return split_top_level(inner, ',')?
            .into_iter()
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    if let Some(inner) = strip_quotes(s) {
        return Ok(Value::String(inner.to_string()));
    }
    if s.contains('"') || s.contains('\'') || s.contains('[') || s.contains(']') {
        // 未完整包裹的引号 / 括号
        split_top_level(s, ',')?;
    }

    match s {
        "true" | "True" => return Ok(Value::Bool(true)),
        "false" | "False" => return Ok(Value::Bool(false)),
        "null" | "None" => return Ok(Value::Null),
        _ => {}
    }

    if looks_numeric(s) {
        if let Ok(i) = s.parse::<i64>() {
            return Ok(Value::from(i));
        }
        if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
            return Ok(Value::Number(n));
        }
    }
    Ok(Value::String(s.to_string()))
}

/// 把点分键写入嵌套对象；键已存在或中间节点不是对象时报冲突
fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), DecodeError> {
    let parts: Vec<&str> = key.split('.').map(str::trim).collect();
    if parts.iter().any(|p| !is_ident(p)) {
        return Err(DecodeError::BadKey(key.to_string()));
    }

    let (last, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(DecodeError::BadKey(key.to_string())),
    };
    let mut node = root;
    for part in parents {
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = match entry {
            Value::Object(map) => map,
            _ => return Err(DecodeError::KeyConflict(key.to_string())),
        };
    }
    if node.contains_key(*last) {
        return Err(DecodeError::KeyConflict(key.to_string()));
    }
    node.insert(last.to_string(), value);
    Ok(())
}

/// 解码 `name|k=v|...`，返回 (工具名, 参数对象)
pub fn decode_call(body: &str) -> Result<(String, Value), DecodeError> {
    let segments = split_top_level(body.trim(), '|')?;
    let mut iter = segments.into_iter();
    let name = iter.next().unwrap_or_default().trim();
    if !is_ident(name) {
        return Err(DecodeError::BadToolName(name.to_string()));
    }

    let mut args = Map::new();
    for segment in iter {
        if segment.trim().is_empty() {
            continue;
        }
        let (key, raw) = split_assignment(segment)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DecodeError::BadKey(segment.to_string()));
        }
        insert_path(&mut args, key, decode_value(raw)?)?;
    }
    Ok((name.to_string(), Value::Object(args)))
}
