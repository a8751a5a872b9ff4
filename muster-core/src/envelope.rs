//! Wire envelope model and message kinds
//!
//! This module provides the broker message envelope shared by every message
//! kind the correlation engine consumes or produces. The envelope carries
//! addressing and expiry; the kind-specific payload travels in `data`.
//!
//! # Examples
//!
//! Building a blocking request envelope:
//!
//! ```rust
//! use muster_core::envelope::*;
//! use muster_core::identity::TargetIdentity;
//! use chrono::{Duration, Utc};
//!
//! let envelope = Envelope::builder()
//!     .kind(RequestKind::Blocking)
//!     .sender(TargetIdentity::new("client://tester/rpc").unwrap())
//!     .target(TargetIdentity::new("agent://host-1/runner").unwrap())
//!     .expires(Utc::now() + Duration::seconds(30))
//!     .data(serde_json::json!({"module": "exec", "action": "run"}))
//!     .build()
//!     .unwrap();
//! assert_eq!(envelope.message_type, MessageKind::BlockingRequest);
//! ```

use crate::{identity::TargetIdentity, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of message kinds carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "rpc_blocking_request")]
    BlockingRequest,
    #[serde(rename = "rpc_non_blocking_request")]
    NonBlockingRequest,
    #[serde(rename = "rpc_blocking_response")]
    BlockingResponse,
    #[serde(rename = "rpc_provisional_response")]
    ProvisionalResponse,
    #[serde(rename = "rpc_error_message")]
    ErrorMessage,
    #[serde(rename = "inventory_request")]
    InventoryRequest,
    #[serde(rename = "inventory_response")]
    InventoryResponse,
    #[serde(rename = "status_query")]
    StatusQuery,
}

impl MessageKind {
    /// The wire-level string for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::BlockingRequest => "rpc_blocking_request",
            MessageKind::NonBlockingRequest => "rpc_non_blocking_request",
            MessageKind::BlockingResponse => "rpc_blocking_response",
            MessageKind::ProvisionalResponse => "rpc_provisional_response",
            MessageKind::ErrorMessage => "rpc_error_message",
            MessageKind::InventoryRequest => "inventory_request",
            MessageKind::InventoryResponse => "inventory_response",
            MessageKind::StatusQuery => "status_query",
        }
    }

    /// Parse a wire-level string into a kind
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "rpc_blocking_request" => Ok(MessageKind::BlockingRequest),
            "rpc_non_blocking_request" => Ok(MessageKind::NonBlockingRequest),
            "rpc_blocking_response" => Ok(MessageKind::BlockingResponse),
            "rpc_provisional_response" => Ok(MessageKind::ProvisionalResponse),
            "rpc_error_message" => Ok(MessageKind::ErrorMessage),
            "inventory_request" => Ok(MessageKind::InventoryRequest),
            "inventory_response" => Ok(MessageKind::InventoryResponse),
            "status_query" => Ok(MessageKind::StatusQuery),
            other => Err(Error::UnknownMessageType(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request variants a caller can issue
///
/// Each variant maps exhaustively to the wire kind it is published as and the
/// response kind every answering target must reply with. A response of any
/// other kind is a hard error at the call site, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Request whose responses carry the terminal outcome directly
    Blocking,
    /// Request acknowledged immediately with a provisional response
    NonBlocking,
    /// Out-of-band query for a non-blocking transaction's status
    StatusQuery,
    /// Directory lookup for identities currently reachable through the broker
    MembershipQuery,
}

impl RequestKind {
    /// The wire kind this request is published as
    pub fn wire_kind(&self) -> MessageKind {
        match self {
            RequestKind::Blocking => MessageKind::BlockingRequest,
            RequestKind::NonBlocking => MessageKind::NonBlockingRequest,
            RequestKind::StatusQuery => MessageKind::StatusQuery,
            RequestKind::MembershipQuery => MessageKind::InventoryRequest,
        }
    }

    /// The response kind every answering target must use
    pub fn expected_response(&self) -> MessageKind {
        match self {
            RequestKind::Blocking => MessageKind::BlockingResponse,
            RequestKind::NonBlocking => MessageKind::ProvisionalResponse,
            RequestKind::StatusQuery => MessageKind::BlockingResponse,
            RequestKind::MembershipQuery => MessageKind::InventoryResponse,
        }
    }
}

/// Broker message envelope
///
/// Outbound requests and inbound responses share this shape. Responses set
/// `in_reply_to` to the id of the request envelope they answer; the engine
/// correlates on that field, never on transaction ids, so a caller reusing a
/// transaction id across attempts is always safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub message_type: MessageKind,
    pub sender: TargetIdentity,
    pub targets: Vec<TargetIdentity>,
    pub expires: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create a builder for constructing an Envelope
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Build a response envelope answering this one
    pub fn reply(
        &self,
        sender: TargetIdentity,
        kind: MessageKind,
        data: serde_json::Value,
    ) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            message_type: kind,
            targets: vec![self.sender.clone()],
            sender,
            expires: self.expires,
            in_reply_to: Some(self.id),
            data,
        }
    }

    /// Check whether the envelope has expired at the given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// Client-side view of one inbound response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub sender: TargetIdentity,
    pub kind: MessageKind,
    pub data: serde_json::Value,
}

impl From<Envelope> for Response {
    fn from(envelope: Envelope) -> Self {
        Self {
            sender: envelope.sender,
            kind: envelope.message_type,
            data: envelope.data,
        }
    }
}

/// Builder for constructing Envelope instances with validation
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    kind: Option<RequestKind>,
    sender: Option<TargetIdentity>,
    targets: Vec<TargetIdentity>,
    expires: Option<DateTime<Utc>>,
    data: serde_json::Value,
}

impl EnvelopeBuilder {
    /// Create a new envelope builder
    pub fn new() -> Self {
        Self {
            kind: None,
            sender: None,
            targets: Vec::new(),
            expires: None,
            data: serde_json::Value::Null,
        }
    }

    /// Set the request kind
    pub fn kind(mut self, kind: RequestKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the sender identity
    pub fn sender(mut self, sender: TargetIdentity) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Add a single target
    pub fn target(mut self, target: TargetIdentity) -> Self {
        self.targets.push(target);
        self
    }

    /// Add a set of targets
    pub fn targets<I: IntoIterator<Item = TargetIdentity>>(mut self, targets: I) -> Self {
        self.targets.extend(targets);
        self
    }

    /// Set the expiry deadline
    pub fn expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Set the payload
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Build the Envelope instance
    pub fn build(self) -> Result<Envelope> {
        let kind = self.kind.ok_or_else(|| Error::Validation {
            message: "Request kind is required".to_string(),
        })?;
        let sender = self.sender.ok_or_else(|| Error::Validation {
            message: "Sender identity is required".to_string(),
        })?;
        let expires = self.expires.ok_or_else(|| Error::Validation {
            message: "Expiry deadline is required".to_string(),
        })?;
        if self.targets.is_empty() {
            return Err(Error::Validation {
                message: "Target set cannot be empty".to_string(),
            });
        }
        if expires <= Utc::now() {
            return Err(Error::Validation {
                message: "Expiry deadline must be in the future".to_string(),
            });
        }

        Ok(Envelope {
            id: Uuid::new_v4(),
            message_type: kind.wire_kind(),
            sender,
            targets: self.targets,
            expires,
            in_reply_to: None,
            data: self.data,
        })
    }
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
