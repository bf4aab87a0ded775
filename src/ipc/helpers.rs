use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ipc::error::err;
use crate::ipc::types::Request;

/// A non-blank string param, trimmed. The error is a ready `bad_params` response.
pub fn required_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim()),
        _ => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

pub fn optional_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Decodes the whole params object. Missing params decode like `{}`.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, Value> {
    let raw = match &req.params {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(raw)
        .map_err(|e| err(&req.id, "bad_params", format!("invalid params: {e}"), None))
}

/// Decodes one required param.
pub fn parse_param<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {key}"), None));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid {key}: {e}"), None))
}

/// Like [`parse_param`], but a missing key yields `T::default()`.
pub fn parse_param_or_default<T: DeserializeOwned + Default>(
    req: &Request,
    key: &str,
) -> Result<T, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(_) => parse_param(req, key),
    }
}
