//! Action dispatcher: typed remote operations over the correlator
//!
//! The dispatcher builds the payload for a specific remote operation, routes
//! it through the correlator, and post-validates every response envelope
//! against the kind its call variant mandates. A provisional acknowledgement
//! arriving where a terminal outcome is required (or the reverse) is a hard
//! error, never coerced.

use muster_core::{
    envelope::RequestKind,
    identity::TargetIdentity,
    outcome::TransactionOutcome,
    payload::{self, ProvisionalAck, RpcReply, RpcRequest},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{correlator::Correlator, poll::StatusPoller, Error, Result};

/// One remote operation: a module, an operation within it, and parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub module: String,
    pub operation: String,
    pub params: serde_json::Value,
}

impl Action {
    /// Create an action from raw parts
    pub fn new<S1: Into<String>, S2: Into<String>>(
        module: S1,
        operation: S2,
        params: serde_json::Value,
    ) -> Self {
        Self {
            module: module.into(),
            operation: operation.into(),
            params,
        }
    }

    /// Run a shell command on the target
    pub fn command<S: Into<String>>(command: S) -> Self {
        Self::new(
            "exec",
            "run_command",
            serde_json::json!({ "command": command.into() }),
        )
    }

    /// Run a named script; the body is keyed into the remote task cache by
    /// its sha256, the client only ships the hash
    pub fn script<S: Into<String>>(name: S, body: &[u8], arguments: Vec<String>) -> Self {
        Self::new(
            "exec",
            "run_script",
            serde_json::json!({
                "name": name.into(),
                "sha256": content_hash(body),
                "arguments": arguments,
            }),
        )
    }

    /// Run a named task with structured input; the task body is keyed into
    /// the remote task cache by its sha256
    pub fn task<S: Into<String>>(name: S, input: serde_json::Value, body: &[u8]) -> Self {
        Self::new(
            "task",
            "run",
            serde_json::json!({
                "task": name.into(),
                "input": input,
                "sha256": content_hash(body),
            }),
        )
    }

    /// Download a file to the target, verified against an expected sha256
    pub fn download<S1: Into<String>, S2: Into<String>, S3: Into<String>>(
        uri: S1,
        destination: S2,
        sha256: S3,
    ) -> Self {
        Self::new(
            "file",
            "download",
            serde_json::json!({
                "uri": uri.into(),
                "destination": destination.into(),
                "sha256": sha256.into(),
            }),
        )
    }
}

/// Hex-encoded sha256 of a task or script body
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Façade for dispatching remote operations through a correlator
pub struct Dispatcher {
    correlator: Arc<Correlator>,
}

impl Dispatcher {
    /// Create a dispatcher over the given correlator
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// The correlator this dispatcher routes through
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Run an action and block until every target reports its outcome
    ///
    /// Every response must carry a terminal outcome directly; no polling is
    /// involved. A pending status inside a blocking response is a protocol
    /// error.
    pub async fn run_blocking(
        &self,
        targets: Vec<TargetIdentity>,
        action: Action,
    ) -> Result<HashMap<TargetIdentity, TransactionOutcome>> {
        self.run_blocking_as(targets, action, Uuid::new_v4()).await
    }

    /// Like [`Dispatcher::run_blocking`] with a caller-supplied transaction
    /// id, for retrying an attempt under its original transaction
    pub async fn run_blocking_as(
        &self,
        targets: Vec<TargetIdentity>,
        action: Action,
        transaction_id: Uuid,
    ) -> Result<HashMap<TargetIdentity, TransactionOutcome>> {
        let data = request_data(&action, transaction_id, false)?;
        let responses = self
            .correlator
            .send(
                RequestKind::Blocking,
                targets,
                data,
                self.correlator.config().request_timeout,
            )
            .await?;

        let mut outcomes = HashMap::with_capacity(responses.len());
        for (target, response) in responses {
            let reply: RpcReply = payload::decode(&response.data)?;
            if !reply.results.is_terminal() {
                return Err(Error::protocol_for(
                    &target,
                    "blocking response carried a pending outcome",
                ));
            }
            outcomes.insert(target, reply.results);
        }
        debug!(
            "Blocking {}::{} complete on {} target(s)",
            action.module,
            action.operation,
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Run an action asynchronously; every target acknowledges with a
    /// provisional response carrying the transaction id to poll later
    pub async fn run_non_blocking(
        &self,
        targets: Vec<TargetIdentity>,
        action: Action,
    ) -> Result<HashMap<TargetIdentity, Uuid>> {
        self.run_non_blocking_as(targets, action, Uuid::new_v4())
            .await
    }

    /// Like [`Dispatcher::run_non_blocking`] with a caller-supplied
    /// transaction id
    ///
    /// Reusing the transaction id of an already terminal transaction is safe:
    /// the remote side returns the recorded outcome instead of executing the
    /// action again.
    pub async fn run_non_blocking_as(
        &self,
        targets: Vec<TargetIdentity>,
        action: Action,
        transaction_id: Uuid,
    ) -> Result<HashMap<TargetIdentity, Uuid>> {
        let data = request_data(&action, transaction_id, true)?;
        let responses = self
            .correlator
            .send(
                RequestKind::NonBlocking,
                targets,
                data,
                self.correlator.config().request_timeout,
            )
            .await?;

        let mut transactions = HashMap::with_capacity(responses.len());
        for (target, response) in responses {
            let ack: ProvisionalAck = payload::decode(&response.data)?;
            transactions.insert(target, ack.transaction_id);
        }
        debug!(
            "Non-blocking {}::{} accepted by {} target(s) under transaction {}",
            action.module,
            action.operation,
            transactions.len(),
            transaction_id
        );
        Ok(transactions)
    }

    /// Run an action asynchronously, then poll every target's transaction to
    /// its terminal outcome
    pub async fn run_non_blocking_and_await(
        &self,
        targets: Vec<TargetIdentity>,
        action: Action,
    ) -> Result<HashMap<TargetIdentity, TransactionOutcome>> {
        let transactions = self.run_non_blocking(targets, action).await?;
        let poller = StatusPoller::new(Arc::clone(&self.correlator));

        let mut outcomes = HashMap::with_capacity(transactions.len());
        for (target, transaction_id) in transactions {
            let outcome = poller.poll_until_terminal(&target, transaction_id).await?;
            outcomes.insert(target, outcome);
        }
        Ok(outcomes)
    }
}

fn request_data(
    action: &Action,
    transaction_id: Uuid,
    notify_outcome: bool,
) -> Result<serde_json::Value> {
    Ok(payload::encode(&RpcRequest {
        transaction_id,
        module: action.module.clone(),
        action: action.operation.clone(),
        params: action.params.clone(),
        notify_outcome,
    })?)
}
