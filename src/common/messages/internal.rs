use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcMessage {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonRpcParams>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonRpcResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<JsonRpcMessage, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcParams {
    pub contact: JsonContact,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<JsonItem>,

    /// Fields of protocol extension methods.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct JsonRpcResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<JsonContact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<JsonContact>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<JsonItem>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,

    #[serde(rename = "nodeID", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(rename = "lastSeen", default)]
    pub last_seen: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonItem {
    pub key: String,
    pub value: String,
    pub publisher: String,
    pub timestamp: u64,
}
