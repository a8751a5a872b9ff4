//! Typed payloads carried in envelope `data`
//!
//! Each message kind interprets the envelope's `data` field as one of these
//! structures. Deserialization is strict: a missing or malformed field is a
//! hard error at the call site, never substituted with a default, because
//! silent defaults would mask protocol drift between client and remote. The
//! only exceptions are fields the protocol itself declares optional
//! (`notify_outcome`, and output fields of a pending outcome).

use crate::{outcome::TransactionOutcome, identity::TargetIdentity, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of an rpc_blocking_request or rpc_non_blocking_request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub transaction_id: Uuid,
    pub module: String,
    pub action: String,
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub notify_outcome: bool,
}

/// Payload of an rpc_provisional_response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionalAck {
    pub transaction_id: Uuid,
}

/// Payload of an rpc_blocking_response; the outcome nests under `results`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub transaction_id: Uuid,
    pub results: TransactionOutcome,
}

/// Payload of an rpc_error_message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
}

/// Payload of a status_query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusQueryData {
    pub transaction_id: Uuid,
}

/// Payload of an inventory_request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryQuery {
    pub query: Vec<String>,
}

/// Payload of an inventory_response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryReply {
    pub uris: Vec<TargetIdentity>,
}

/// Strictly decode a payload out of an envelope `data` value
pub fn decode<T: serde::de::DeserializeOwned>(data: &serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(data.clone())?)
}

/// Encode a payload into an envelope `data` value
pub fn encode<T: Serialize>(payload: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(payload)?)
}
