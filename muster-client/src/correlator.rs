//! Request correlator: one bounded-latency request/response cycle
//!
//! A [`Correlator`] owns its [`ResponseRegistry`] and an injected transport;
//! there are no process-wide singletons, so independent correlators (and
//! tests) run concurrently without interference. A single pump task is the
//! exclusive owner of the transport: it multiplexes between the outbound
//! publish channel and inbound delivery, handing every received envelope to
//! the registry. [`Correlator::send`] registers the expected target set,
//! publishes the request, then waits on the per-request response channel
//! until every target has answered or the deadline elapses.
//!
//! A single blocking call per logical request, rather than one wait per
//! target, lets callers treat "many remote operations" as one atomic,
//! bounded-latency unit: the call returns only when all targets have
//! reported, and on timeout it says exactly which ones never did.

use muster_core::{
    envelope::{Envelope, MessageKind, RequestKind, Response},
    identity::TargetIdentity,
    payload::{self, RpcError},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{config::ClientConfig, registry::ResponseRegistry, transport::Transport, Error, Result};

/// Correlates fan-out requests with their fan-in responses
pub struct Correlator {
    config: ClientConfig,
    registry: Arc<ResponseRegistry>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Correlator {
    /// Create a correlator over an established transport
    ///
    /// Spawns the pump task that owns the transport for the correlator's
    /// lifetime. Call [`Correlator::close`] to shut it down.
    pub fn new(transport: Box<dyn Transport>, config: ClientConfig) -> Self {
        let registry = Arc::new(ResponseRegistry::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let pump = tokio::spawn(Self::pump(
            transport,
            Arc::clone(&registry),
            outbound_rx,
            shutdown_rx,
        ));

        Self {
            config,
            registry,
            outbound: outbound_tx,
            shutdown: parking_lot::Mutex::new(Some(shutdown_tx)),
            pump: parking_lot::Mutex::new(Some(pump)),
        }
    }

    /// The configuration this correlator was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of requests currently awaiting responses
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// Issue one request and wait for every target to answer
    ///
    /// Returns the full response map once all targets in `targets` have
    /// responded with the kind `kind` mandates. Fails with
    /// [`Error::UnexpectedMessageKind`] on a mismatched response kind,
    /// [`Error::RemoteExecution`] if any target reports an
    /// `rpc_error_message`, [`Error::PartialTimeout`] or [`Error::NoResponse`]
    /// when the deadline elapses first. The request is deregistered on every
    /// exit path; responses arriving after that are dropped by the registry.
    pub async fn send(
        &self,
        kind: RequestKind,
        targets: Vec<TargetIdentity>,
        data: serde_json::Value,
        timeout: Duration,
    ) -> Result<HashMap<TargetIdentity, Response>> {
        if timeout.is_zero() {
            return Err(Error::Core(muster_core::Error::validation(
                "Request timeout must be greater than zero",
            )));
        }

        let envelope = Envelope::builder()
            .kind(kind)
            .sender(self.config.identity.clone())
            .targets(targets)
            .expires(
                chrono::Utc::now()
                    + chrono::Duration::from_std(timeout).map_err(|e| {
                        Error::Core(muster_core::Error::validation(format!(
                            "Request timeout out of range: {}",
                            e
                        )))
                    })?,
            )
            .data(data)
            .build()?;

        let expected: HashSet<TargetIdentity> = envelope.targets.iter().cloned().collect();
        let expected_kind = kind.expected_response();
        let deadline = Instant::now() + timeout;

        let mut rx = self.registry.register(envelope.id, expected.clone())?;
        let _guard = DeregisterGuard {
            registry: &self.registry,
            request_id: envelope.id,
        };

        let json = serde_json::to_string(&envelope)?;
        self.outbound
            .send(json)
            .map_err(|_| Error::Transport("Transport pump has shut down".to_string()))?;
        debug!(
            "Published {} request {} to {} target(s)",
            envelope.message_type,
            envelope.id,
            expected.len()
        );

        let mut received: HashMap<TargetIdentity, Response> = HashMap::new();
        while received.len() < expected.len() {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(response)) => {
                    if response.kind == MessageKind::ErrorMessage {
                        let remote_error: RpcError = payload::decode(&response.data)
                            .map_err(|_| Error::protocol_for(
                                &response.sender,
                                "rpc_error_message without a description field",
                            ))?;
                        return Err(Error::RemoteExecution {
                            target: response.sender,
                            description: remote_error.description,
                        });
                    }
                    if response.kind != expected_kind {
                        return Err(Error::UnexpectedMessageKind {
                            target: response.sender,
                            expected: expected_kind,
                            actual: response.kind,
                        });
                    }
                    // Duplicate responses from one sender: last write wins
                    received.insert(response.sender.clone(), response);
                }
                Ok(None) => {
                    return Err(Error::Transport(
                        "Response channel closed while waiting".to_string(),
                    ));
                }
                Err(_) => {
                    let mut missing: Vec<TargetIdentity> = expected
                        .iter()
                        .filter(|target| !received.contains_key(*target))
                        .cloned()
                        .collect();
                    missing.sort();
                    warn!(
                        "Request {} timed out after {:?}: {}/{} answered",
                        envelope.id,
                        timeout,
                        received.len(),
                        expected.len()
                    );
                    return Err(if received.is_empty() {
                        Error::NoResponse { missing, timeout }
                    } else {
                        Error::PartialTimeout {
                            missing,
                            partial: received,
                            timeout,
                        }
                    });
                }
            }
        }

        debug!(
            "Request {} complete: all {} target(s) answered",
            envelope.id,
            expected.len()
        );
        Ok(received)
    }

    /// Shut the pump task down and close the transport
    pub async fn close(&self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(anyhow::anyhow!("Pump task panicked: {}", e)))?;
            info!("Correlator closed");
        }
        Ok(())
    }

    async fn pump(
        mut transport: Box<dyn Transport>,
        registry: Arc<ResponseRegistry>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => match outbound {
                    Some(message) => {
                        if let Err(e) = transport.send(&message).await {
                            error!("Failed to publish request: {}", e);
                            break;
                        }
                    }
                    None => {
                        debug!("Correlator dropped, stopping pump");
                        break;
                    }
                },
                inbound = transport.receive() => match inbound {
                    Ok(raw) => Self::dispatch(&registry, &raw),
                    Err(Error::Connection(reason)) => {
                        info!("Broker connection ended: {}", reason);
                        break;
                    }
                    Err(e) => {
                        warn!("Transport receive failed: {}", e);
                        break;
                    }
                },
                _ = &mut shutdown_rx => {
                    debug!("Shutdown requested, stopping pump");
                    break;
                }
            }
        }
        if let Err(e) = transport.close().await {
            warn!("Error closing transport: {}", e);
        }
    }

    /// Hand one raw inbound message to the registry
    ///
    /// Malformed messages and responses that correlate to nothing are logged
    /// and dropped; nothing on this path may take the transport down.
    fn dispatch(registry: &ResponseRegistry, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed inbound message: {}", e);
                return;
            }
        };
        let Some(request_id) = envelope.in_reply_to else {
            debug!(
                "Dropping {} from {} with no in_reply_to",
                envelope.message_type, envelope.sender
            );
            return;
        };
        registry.deliver(request_id, Response::from(envelope));
    }
}

struct DeregisterGuard<'a> {
    registry: &'a ResponseRegistry,
    request_id: Uuid,
}

impl Drop for DeregisterGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use muster_core::payload::encode;

    fn identity(uri: &str) -> TargetIdentity {
        TargetIdentity::new(uri).unwrap()
    }

    /// Spawn a broker-side task that answers every request per `reply_kind`
    /// on behalf of each addressed target.
    fn answer_all(mut broker_side: InMemoryTransport, reply_kind: MessageKind) {
        tokio::spawn(async move {
            while let Ok(raw) = broker_side.receive().await {
                let request: Envelope = serde_json::from_str(&raw).unwrap();
                for target in request.targets.clone() {
                    let reply = request.reply(
                        target,
                        reply_kind,
                        serde_json::json!({"description": "refused"}),
                    );
                    broker_side
                        .send(&serde_json::to_string(&reply).unwrap())
                        .await
                        .unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn test_send_rejects_zero_timeout() {
        let (client_side, _broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());

        let result = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner")],
                serde_json::Value::Null,
                Duration::ZERO,
            )
            .await;
        assert!(matches!(result, Err(Error::Core(e)) if e.is_validation()));
    }

    #[tokio::test]
    async fn test_send_rejects_empty_target_set() {
        let (client_side, _broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());

        let result = correlator
            .send(
                RequestKind::Blocking,
                Vec::new(),
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(Error::Core(e)) if e.is_validation()));
    }

    #[tokio::test]
    async fn test_unexpected_kind_names_offender() {
        let (client_side, broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());
        // A provisional ack where a blocking response is mandated
        answer_all(broker_side, MessageKind::ProvisionalResponse);

        let result = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner")],
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await;

        match result {
            Err(Error::UnexpectedMessageKind {
                target,
                expected,
                actual,
            }) => {
                assert_eq!(target, identity("agent://a/runner"));
                assert_eq!(expected, MessageKind::BlockingResponse);
                assert_eq!(actual, MessageKind::ProvisionalResponse);
            }
            other => panic!("expected UnexpectedMessageKind, got {:?}", other),
        }
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces_description() {
        let (client_side, broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());
        answer_all(broker_side, MessageKind::ErrorMessage);

        let result = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner")],
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await;

        match result {
            Err(Error::RemoteExecution {
                target,
                description,
            }) => {
                assert_eq!(target, identity("agent://a/runner"));
                assert_eq!(description, "refused");
            }
            other => panic!("expected RemoteExecution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_sender_last_write_wins() {
        let (client_side, mut broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());

        tokio::spawn(async move {
            let raw = broker_side.receive().await.unwrap();
            let request: Envelope = serde_json::from_str(&raw).unwrap();
            let reply = |marker: u64| {
                request.reply(
                    identity("agent://a/runner"),
                    MessageKind::BlockingResponse,
                    serde_json::json!({ "marker": marker }),
                )
            };
            // Target "a" answers twice before "b" answers once
            for envelope in [
                reply(1),
                reply(2),
                request.reply(
                    identity("agent://b/runner"),
                    MessageKind::BlockingResponse,
                    serde_json::json!({ "marker": 3 }),
                ),
            ] {
                broker_side
                    .send(&serde_json::to_string(&envelope).unwrap())
                    .await
                    .unwrap();
            }
        });

        let responses = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner"), identity("agent://b/runner")],
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[&identity("agent://a/runner")].data["marker"], 2);
        assert_eq!(responses[&identity("agent://b/runner")].data["marker"], 3);
    }

    #[tokio::test]
    async fn test_malformed_inbound_does_not_take_pump_down() {
        let (client_side, mut broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());

        tokio::spawn(async move {
            let raw = broker_side.receive().await.unwrap();
            let request: Envelope = serde_json::from_str(&raw).unwrap();
            // Garbage, an uncorrelated envelope, then the real answer
            broker_side.send("not json at all").await.unwrap();
            let stray = Envelope::builder()
                .kind(RequestKind::Blocking)
                .sender(identity("agent://stray/runner"))
                .target(identity("client://nobody/muster"))
                .expires(chrono::Utc::now() + chrono::Duration::seconds(30))
                .build()
                .unwrap();
            broker_side
                .send(&serde_json::to_string(&stray).unwrap())
                .await
                .unwrap();
            let reply = request.reply(
                identity("agent://a/runner"),
                MessageKind::BlockingResponse,
                encode(&serde_json::json!({"ok": true})).unwrap(),
            );
            broker_side
                .send(&serde_json::to_string(&reply).unwrap())
                .await
                .unwrap();
        });

        let responses = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner")],
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(responses.len(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client_side, _broker_side) = InMemoryTransport::pair();
        let correlator = Correlator::new(Box::new(client_side), ClientConfig::default());

        correlator.close().await.unwrap();
        correlator.close().await.unwrap();

        // Sends after close fail fast instead of hanging
        let result = correlator
            .send(
                RequestKind::Blocking,
                vec![identity("agent://a/runner")],
                serde_json::Value::Null,
                Duration::from_secs(5),
            )
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
