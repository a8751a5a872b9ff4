//! Target identity model
//!
//! A target identity is the opaque address of one remote execution endpoint
//! reachable through the broker, e.g. `agent://build-07/runner`. Identities
//! are compared by exact string equality; ordering is plain lexicographic
//! string order, used only to report target sets deterministically.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque addressable identity of a remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetIdentity(String);

impl TargetIdentity {
    /// Create a new identity with validation
    pub fn new<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        if uri.trim().is_empty() {
            return Err(Error::validation("Target identity cannot be empty"));
        }
        Ok(Self(uri))
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for TargetIdentity {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for TargetIdentity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}
