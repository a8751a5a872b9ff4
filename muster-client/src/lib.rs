//! Request/response correlation client for broker-mediated agent fleets
//!
//! This crate implements the client side of a fan-out/fan-in RPC pattern
//! over an asynchronous publish/subscribe broker: one logical request is
//! published to one or many addressable targets, the caller blocks with a
//! deadline until every target has answered, and long-running jobs accepted
//! with a provisional acknowledgement are resolved by polling their status
//! under the original transaction id.
//!
//! # Architecture
//!
//! - **[`transport`]**: duplex broker channel abstraction (WebSocket and
//!   in-memory implementations)
//! - **[`registry`]**: thread-safe fan-in state mapping in-flight request ids
//!   to their awaiting callers
//! - **[`correlator`]**: one bounded-latency request/response cycle over the
//!   transport and registry
//! - **[`poll`]**: bounded-retry status and directory-membership pollers
//! - **[`dispatcher`]**: typed remote operations (command, script, task,
//!   file download) routed through the correlator
//! - **[`config`]**: client identity, directory target, timeout and retry
//!   budgets
//! - **[`error`]**: typed failures distinguishing timeouts, kind mismatches,
//!   remote errors and exhausted poll budgets
//!
//! # Message Flow
//!
//! ```text
//! Dispatcher          Correlator        Transport              Targets
//!     |-- action ---------->|                |                    |
//!     |                     |-- register --->|                    |
//!     |                     |-- publish ---->|---- request ------>|
//!     |                     |   (wait)       |<--- response ------|
//!     |                     |<-- deliver ----|<--- response ------|
//!     |<-- outcome map -----|                |                    |
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use muster_client::{
//!     config::ClientConfig, correlator::Correlator, dispatcher::{Action, Dispatcher},
//!     transport::TransportFactory,
//! };
//! use muster_core::identity::TargetIdentity;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TransportFactory::websocket_client("wss://broker.example:8142/").await?;
//! let correlator = Arc::new(Correlator::new(transport, ClientConfig::default()));
//! let dispatcher = Dispatcher::new(Arc::clone(&correlator));
//!
//! let targets = vec![
//!     TargetIdentity::new("agent://host-1/runner")?,
//!     TargetIdentity::new("agent://host-2/runner")?,
//! ];
//! let outcomes = dispatcher
//!     .run_blocking(targets, Action::command("uptime"))
//!     .await?;
//! for (target, outcome) in outcomes {
//!     println!("{}: {:?}", target, outcome.status);
//! }
//! correlator.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod poll;
pub mod registry;
pub mod transport;

pub use error::{Error, Result};
