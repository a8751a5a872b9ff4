//! Error types for correlation and polling operations

use muster_core::{envelope::MessageKind, envelope::Response, identity::TargetIdentity};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Client error type covering transport, correlation and polling failures
#[derive(Error, Debug)]
pub enum Error {
    /// The broker connection could not be used at all; fatal to the whole
    /// operation and never retried at this layer.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Duplicate request id: {id} is already registered")]
    DuplicateRequest { id: uuid::Uuid },

    /// Deadline exceeded with zero targets answered.
    #[error("No response from any of {} target(s) within {timeout:?}", missing.len())]
    NoResponse {
        missing: Vec<TargetIdentity>,
        timeout: Duration,
    },

    /// Deadline exceeded with some but not all targets answered. The partial
    /// response map is preserved for diagnostics.
    #[error("Partial timeout after {timeout:?}: {} target(s) answered, {} never did", partial.len(), missing.len())]
    PartialTimeout {
        missing: Vec<TargetIdentity>,
        partial: HashMap<TargetIdentity, Response>,
        timeout: Duration,
    },

    /// A response arrived but was not the kind this call variant mandates.
    #[error("Unexpected {actual} from {target}, expected {expected}")]
    UnexpectedMessageKind {
        target: TargetIdentity,
        expected: MessageKind,
        actual: MessageKind,
    },

    /// A status never reached terminal within the retry budget. Distinct from
    /// NoResponse: every query was answered, the remote job may still be
    /// running.
    #[error("Status of transaction {transaction_id} still pending after {attempts} attempt(s) over {elapsed:?}")]
    PollTimeout {
        transaction_id: uuid::Uuid,
        attempts: u32,
        elapsed: Duration,
    },

    /// The remote side explicitly reported it could not execute the request.
    #[error("Remote execution error from {target}: {description}")]
    RemoteExecution {
        target: TargetIdentity,
        description: String,
    },

    /// A response payload did not have the shape its kind mandates.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] muster_core::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Create a protocol error naming the offending target
    pub fn protocol_for<S: Into<String>>(target: &TargetIdentity, message: S) -> Self {
        Self::Protocol {
            message: format!("{}: {}", target, message.into()),
        }
    }

    /// Check if this error is a deadline failure the caller may retry
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::NoResponse { .. } | Error::PartialTimeout { .. } | Error::PollTimeout { .. }
        )
    }

    /// Targets that never answered, when this error carries them
    pub fn missing_targets(&self) -> Option<&[TargetIdentity]> {
        match self {
            Error::NoResponse { missing, .. } | Error::PartialTimeout { missing, .. } => {
                Some(missing)
            }
            _ => None,
        }
    }
}

/// Convenience result type for client operations
pub type Result<T> = std::result::Result<T, Error>;
