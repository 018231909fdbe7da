//! Envelope codec.
//!
//! Frames are single JSON documents; the transports take care of framing
//! (newline-delimited on stdio, one SSE event or POST body on HTTP).
//! Decoding is strict about shape and lenient about extras: unknown fields
//! are ignored.

use serde_json::{json, Map, Value};

use crate::protocol::{normalize_params, Envelope, JsonRpcError, RequestId};

const JSONRPC_VERSION: &str = "2.0";

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("unsupported jsonrpc version {0}")]
    Version(Value),

    #[error("request `{0}` has a null id")]
    MissingId(String),

    #[error("id must be a string or an integer, got {0}")]
    InvalidId(Value),

    #[error("`method` must be a string")]
    InvalidMethod,

    #[error("`params` must be an object or an array")]
    InvalidParams,

    #[error("invalid error object: {0}")]
    InvalidError(String),

    #[error("envelope carries both `result` and `error`")]
    Ambiguous,

    #[error("unknown envelope shape")]
    UnknownShape,
}

/// Encode an envelope as a JSON document.
///
/// Always writes `"jsonrpc": "2.0"` and every field the variant requires.
/// `params` go through `normalize_params`, so a `null` is left out and a
/// scalar is sent as a one-element array.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let value = match envelope {
        Envelope::Request { id, method, params } => {
            let mut v = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method });
            if let Some(params) = normalize_params(params.clone()) {
                v["params"] = params;
            }
            v
        }
        Envelope::Notification { method, params } => {
            let mut v = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
            if let Some(params) = normalize_params(params.clone()) {
                v["params"] = params;
            }
            v
        }
        Envelope::Response { id, result } => {
            json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
        }
        Envelope::ErrorResponse { id, error } => {
            json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
        }
    };
    value.to_string().into_bytes()
}

/// Decode one frame.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    let value: Value = serde_json::from_slice(frame)?;
    let Value::Object(mut obj) = value else {
        return Err(CodecError::NotAnObject);
    };

    if let Some(version) = obj.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(CodecError::Version(version.clone()));
        }
    }

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(CodecError::InvalidMethod);
        };
        let params = take_params(&mut obj)?;
        return match obj.remove("id") {
            None => Ok(Envelope::Notification { method, params }),
            Some(Value::Null) => Err(CodecError::MissingId(method)),
            Some(id) => Ok(Envelope::Request {
                id: parse_id(id)?,
                method,
                params,
            }),
        };
    }

    match (obj.remove("result"), obj.remove("error")) {
        (Some(_), Some(_)) => Err(CodecError::Ambiguous),
        (Some(result), None) => Ok(Envelope::Response {
            id: parse_id(obj.remove("id").unwrap_or(Value::Null))?,
            result,
        }),
        (None, Some(error)) => {
            let id = parse_id(obj.remove("id").unwrap_or(Value::Null))?;
            let error: JsonRpcError =
                serde_json::from_value(error).map_err(|e| CodecError::InvalidError(e.to_string()))?;
            Ok(Envelope::ErrorResponse { id, error })
        }
        (None, None) => Err(CodecError::UnknownShape),
    }
}

fn parse_id(id: Value) -> Result<RequestId, CodecError> {
    match id {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => match n.as_i64() {
            Some(n) => Ok(RequestId::Number(n)),
            None => Err(CodecError::InvalidId(Value::Number(n))),
        },
        other => Err(CodecError::InvalidId(other)),
    }
}

fn take_params(obj: &mut Map<String, Value>) -> Result<Option<Value>, CodecError> {
    match obj.remove("params") {
        None | Some(Value::Null) => Ok(None),
        Some(p @ (Value::Object(_) | Value::Array(_))) => Ok(Some(p)),
        Some(_) => Err(CodecError::InvalidParams),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
