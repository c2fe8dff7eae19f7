use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VERSION: &str = "2.0";

/// A single JSON-RPC call, either sent alone or as an element of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub method: &'static str,
    pub params: Vec<Value>,
    pub id: u64,
    pub jsonrpc: &'static str,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Vec<Value>) -> Self {
        Self {
            method,
            params,
            id,
            jsonrpc: VERSION,
        }
    }
}

/// A JSON-RPC response envelope with a typed result.
///
/// `result` is required: an error response without one fails to decode.
#[derive(Debug, Clone, Deserialize)]
pub struct Response<T> {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub result: T,
}

/// Batch element whose result is decoded later. A missing `result`
/// becomes `null`, which then decodes as neither shape and is dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Value,
}
