//! Core domain models for the muster correlation engine
//!
//! This crate contains the fundamental domain types used by the muster
//! client for driving fleets of remote execution endpoints through a
//! publish/subscribe broker: target identities, wire envelopes and their
//! message kinds, typed request/response payloads, and transaction outcomes.

pub mod envelope;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod payload;

pub use error::{Error, Result};
