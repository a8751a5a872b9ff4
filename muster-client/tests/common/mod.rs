//! Shared test fixtures: a scripted agent fleet behind an in-memory broker

use muster_client::transport::{InMemoryTransport, Transport};
use muster_core::{
    envelope::{Envelope, MessageKind},
    identity::TargetIdentity,
    outcome::TransactionOutcome,
    payload::{self, ProvisionalAck, RpcError, RpcRequest, RpcReply, StatusQueryData},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

pub fn identity(uri: &str) -> TargetIdentity {
    TargetIdentity::new(uri).unwrap()
}

/// Route client logs through the test harness; honors `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How one scripted target reacts to requests addressed to it
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer after the given delay
    Reply { delay: Duration },
    /// Never answer
    Silent,
    /// Report the request could not be executed
    RemoteError { description: String },
}

struct TxState {
    remaining_polls: u32,
    outcome: TransactionOutcome,
}

/// A fleet of scripted remote targets sharing one broker connection
///
/// Transactions are cached by id: replaying a request under an already
/// terminal transaction id returns the recorded outcome without executing
/// the action again, mirroring the remote contract the client relies on.
pub struct AgentFleet {
    behaviors: HashMap<TargetIdentity, Behavior>,
    /// Status queries a fresh transaction answers with `pending` before
    /// turning terminal
    pending_polls: u32,
    executions: Arc<Mutex<u64>>,
    transactions: Arc<Mutex<HashMap<(TargetIdentity, Uuid), TxState>>>,
}

impl AgentFleet {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            pending_polls: 0,
            executions: Arc::new(Mutex::new(0)),
            transactions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_target(mut self, uri: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(identity(uri), behavior);
        self
    }

    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Number of times any target actually executed an action
    pub fn executions(&self) -> Arc<Mutex<u64>> {
        Arc::clone(&self.executions)
    }

    /// Run the fleet over the broker side of an in-memory transport pair
    pub fn spawn(self, mut transport: InMemoryTransport) {
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = transport.receive() => match inbound {
                        Ok(raw) => self.handle(&raw, &reply_tx),
                        Err(_) => break,
                    },
                    reply = reply_rx.recv() => match reply {
                        Some(json) => {
                            if transport.send(&json).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    fn handle(&self, raw: &str, reply_tx: &mpsc::UnboundedSender<String>) {
        let request: Envelope = serde_json::from_str(raw).unwrap();
        match request.message_type {
            MessageKind::BlockingRequest => self.handle_rpc(&request, reply_tx, true),
            MessageKind::NonBlockingRequest => self.handle_rpc(&request, reply_tx, false),
            MessageKind::StatusQuery => self.handle_status_query(&request, reply_tx),
            other => panic!("fleet received unexpected {}", other),
        }
    }

    fn handle_rpc(
        &self,
        request: &Envelope,
        reply_tx: &mpsc::UnboundedSender<String>,
        blocking: bool,
    ) {
        let rpc: RpcRequest = payload::decode(&request.data).unwrap();
        for target in request.targets.clone() {
            let behavior = self
                .behaviors
                .get(&target)
                .cloned()
                .unwrap_or(Behavior::Reply {
                    delay: Duration::ZERO,
                });
            let delay = match behavior {
                Behavior::Silent => continue,
                Behavior::RemoteError { description } => {
                    let reply = request.reply(
                        target,
                        MessageKind::ErrorMessage,
                        payload::encode(&RpcError {
                            description,
                            transaction_id: Some(rpc.transaction_id),
                        })
                        .unwrap(),
                    );
                    reply_tx.send(serde_json::to_string(&reply).unwrap()).ok();
                    continue;
                }
                Behavior::Reply { delay } => delay,
            };

            let request = request.clone();
            let transaction_id = rpc.transaction_id;
            let pending_polls = self.pending_polls;
            let executions = Arc::clone(&self.executions);
            let transactions = Arc::clone(&self.transactions);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                let outcome = {
                    let mut transactions = transactions.lock();
                    match transactions.get(&(target.clone(), transaction_id)) {
                        Some(state) => state.outcome.clone(),
                        None => {
                            *executions.lock() += 1;
                            let outcome =
                                TransactionOutcome::success(format!("ran on {}", target));
                            transactions.insert(
                                (target.clone(), transaction_id),
                                TxState {
                                    remaining_polls: pending_polls,
                                    outcome: outcome.clone(),
                                },
                            );
                            outcome
                        }
                    }
                };
                let data = if blocking {
                    payload::encode(&RpcReply {
                        transaction_id,
                        results: outcome,
                    })
                    .unwrap()
                } else {
                    payload::encode(&ProvisionalAck { transaction_id }).unwrap()
                };
                let kind = if blocking {
                    MessageKind::BlockingResponse
                } else {
                    MessageKind::ProvisionalResponse
                };
                let reply = request.reply(target, kind, data);
                reply_tx.send(serde_json::to_string(&reply).unwrap()).ok();
            });
        }
    }

    fn handle_status_query(&self, request: &Envelope, reply_tx: &mpsc::UnboundedSender<String>) {
        let query: StatusQueryData = payload::decode(&request.data).unwrap();
        let target = request.targets[0].clone();
        let results = {
            let mut transactions = self.transactions.lock();
            let state = transactions
                .get_mut(&(target.clone(), query.transaction_id))
                .unwrap_or_else(|| panic!("status query for unknown transaction"));
            if state.remaining_polls > 0 {
                state.remaining_polls -= 1;
                TransactionOutcome::pending()
            } else {
                state.outcome.clone()
            }
        };
        let reply = request.reply(
            target,
            MessageKind::BlockingResponse,
            payload::encode(&RpcReply {
                transaction_id: query.transaction_id,
                results,
            })
            .unwrap(),
        );
        reply_tx.send(serde_json::to_string(&reply).unwrap()).ok();
    }
}

impl Default for AgentFleet {
    fn default() -> Self {
        Self::new()
    }
}
