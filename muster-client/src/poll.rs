//! Bounded-retry pollers for status and directory membership
//!
//! Both pollers reuse the correlator for each individual query but own their
//! retry loop. The [`StatusPoller`] resolves a non-blocking request's
//! eventual outcome by querying the remote `status` service with the original
//! transaction id until the reported status is terminal. The
//! [`MembershipPoller`] confirms presence or absence of an identity in the
//! broker's directory, with a soft boolean result callers assert on
//! themselves.

use muster_core::{
    envelope::RequestKind,
    identity::TargetIdentity,
    outcome::TransactionOutcome,
    payload::{self, InventoryQuery, InventoryReply, RpcReply, StatusQueryData},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::{correlator::Correlator, Error, Result};

/// Polls a transaction's status until it reaches a terminal state
pub struct StatusPoller {
    correlator: Arc<Correlator>,
}

impl StatusPoller {
    /// Create a poller over the given correlator
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// Poll with the correlator's configured retry budget and interval
    pub async fn poll_until_terminal(
        &self,
        target: &TargetIdentity,
        transaction_id: Uuid,
    ) -> Result<TransactionOutcome> {
        let config = self.correlator.config();
        self.poll_until_terminal_with(
            target,
            transaction_id,
            config.poll_max_retries,
            config.poll_interval,
        )
        .await
    }

    /// Poll up to `max_retries` times, sleeping `interval` before each query
    ///
    /// Returns the outcome as soon as its status is terminal. If the retry
    /// budget is exhausted while the status still reads pending, fails with
    /// [`Error::PollTimeout`] carrying the attempt count and elapsed time:
    /// the caller cannot otherwise distinguish "still running" from "query
    /// broke". A failed query itself (timeout, remote error) propagates
    /// immediately.
    pub async fn poll_until_terminal_with(
        &self,
        target: &TargetIdentity,
        transaction_id: Uuid,
        max_retries: u32,
        interval: Duration,
    ) -> Result<TransactionOutcome> {
        if max_retries == 0 {
            return Err(Error::Core(muster_core::Error::validation(
                "Poll retry budget must be at least one attempt",
            )));
        }

        let started = Instant::now();
        for attempt in 1..=max_retries {
            sleep(interval).await;
            let outcome = self.query_status(target, transaction_id).await?;
            if outcome.is_terminal() {
                debug!(
                    "Transaction {} terminal after {} attempt(s): {:?}",
                    transaction_id, attempt, outcome.status
                );
                return Ok(outcome);
            }
            debug!(
                "Transaction {} still pending (attempt {}/{})",
                transaction_id, attempt, max_retries
            );
        }

        Err(Error::PollTimeout {
            transaction_id,
            attempts: max_retries,
            elapsed: started.elapsed(),
        })
    }

    /// Issue one status query for the transaction
    async fn query_status(
        &self,
        target: &TargetIdentity,
        transaction_id: Uuid,
    ) -> Result<TransactionOutcome> {
        let data = payload::encode(&StatusQueryData { transaction_id })?;
        let mut responses = self
            .correlator
            .send(
                RequestKind::StatusQuery,
                vec![target.clone()],
                data,
                self.correlator.config().status_query_timeout,
            )
            .await?;

        let response = responses
            .remove(target)
            .ok_or_else(|| Error::protocol_for(target, "status query answered by nobody"))?;
        let reply: RpcReply = payload::decode(&response.data)?;
        if reply.transaction_id != transaction_id {
            return Err(Error::protocol_for(
                target,
                format!(
                    "status reply for transaction {} while querying {}",
                    reply.transaction_id, transaction_id
                ),
            ));
        }
        Ok(reply.results)
    }
}

/// Polls the broker directory for presence or absence of an identity
pub struct MembershipPoller {
    correlator: Arc<Correlator>,
}

impl MembershipPoller {
    /// Fixed sleep between membership checks, independent of the status
    /// poller's configurable interval.
    pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

    /// Create a poller over the given correlator
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// Await the desired presence state of an identity in the directory
    ///
    /// `retries == 0` means check exactly once with no retry loop. Otherwise
    /// the directory is checked up to `retries` times with a one second sleep
    /// between checks. Returns `Ok(true)` as soon as the desired state is
    /// observed and `Ok(false)` once the budget is exhausted; only a failure
    /// of the query itself is an error.
    pub async fn await_membership(
        &self,
        identity: &TargetIdentity,
        present: bool,
        retries: u32,
    ) -> Result<bool> {
        let checks = retries.max(1);
        for attempt in 0..checks {
            if attempt > 0 {
                sleep(Self::RETRY_INTERVAL).await;
            }
            let uris = self.query_directory(identity).await?;
            let observed = uris.contains(identity);
            if observed == present {
                debug!(
                    "Identity {} {} after {} check(s)",
                    identity,
                    if present { "present" } else { "absent" },
                    attempt + 1
                );
                return Ok(true);
            }
        }
        debug!(
            "Identity {} not {} after {} check(s)",
            identity,
            if present { "present" } else { "absent" },
            checks
        );
        Ok(false)
    }

    /// Issue one inventory query for identities matching the given pattern
    pub async fn query_directory(&self, pattern: &TargetIdentity) -> Result<Vec<TargetIdentity>> {
        let config = self.correlator.config();
        let data = payload::encode(&InventoryQuery {
            query: vec![pattern.to_string()],
        })?;
        let mut responses = self
            .correlator
            .send(
                RequestKind::MembershipQuery,
                vec![config.directory_target.clone()],
                data,
                config.inventory_query_timeout,
            )
            .await?;

        let response = responses.remove(&config.directory_target).ok_or_else(|| {
            Error::protocol_for(&config.directory_target, "inventory query answered by nobody")
        })?;
        let reply: InventoryReply = payload::decode(&response.data)?;
        Ok(reply.uris)
    }
}
