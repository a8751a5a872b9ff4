//! Transaction status and outcome model
//!
//! A non-blocking request is executed remotely under a transaction id; the
//! client observes its progress only through repeated status queries. An
//! outcome is terminal once its status is anything other than `Pending`, and
//! a terminal outcome never changes on further polling.

use serde::{Deserialize, Serialize};

/// Status of a remotely executed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failure,
    Error,
}

impl TransactionStatus {
    /// Check whether this status will not change on further polling
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Observed outcome of a remotely executed transaction
///
/// `stdout`, `stderr` and `exitcode` are only meaningful once `status` is
/// terminal; while pending they must not be interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub status: TransactionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exitcode: i64,
}

impl TransactionOutcome {
    /// Check whether the outcome is terminal
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// An outcome still awaiting remote completion
    pub fn pending() -> Self {
        Self {
            status: TransactionStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
            exitcode: 0,
        }
    }

    /// A successful terminal outcome
    pub fn success<S: Into<String>>(stdout: S) -> Self {
        Self {
            status: TransactionStatus::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            exitcode: 0,
        }
    }

    /// A failed terminal outcome
    pub fn failure<S1: Into<String>, S2: Into<String>>(
        stdout: S1,
        stderr: S2,
        exitcode: i64,
    ) -> Self {
        Self {
            status: TransactionStatus::Failure,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exitcode,
        }
    }
}
