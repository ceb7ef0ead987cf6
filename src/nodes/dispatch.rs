//! Command dispatch with an at-most-one-in-flight policy per node

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::SharedNodeRegistry;
use super::registry::Admission;
use super::transport::Transport;
use super::types::{Command, CommandEnvelope, DispatchOutcome};
use crate::{Error, Result};

/// Forwards commands to nodes and classifies the result
///
/// Never retries: whether repeating an actuator action is safe is the
/// caller's call.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: SharedNodeRegistry,
    transport: Arc<dyn Transport>,
    command_timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher delivering through `transport`
    #[must_use]
    pub fn new(
        registry: SharedNodeRegistry,
        transport: Arc<dyn Transport>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            command_timeout,
        }
    }

    /// Deadline applied to each command
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Deliver `command` to `node_id` and wait for its outcome
    ///
    /// Unknown or offline nodes fail fast without touching the transport.
    /// If this future is dropped mid-flight, the node stays busy until the
    /// command's deadline passes.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the command is malformed or names a
    /// kind the node never declared
    pub async fn dispatch(&self, node_id: &str, command: Command) -> Result<DispatchOutcome> {
        let kind = command.kind.trim();
        if kind.is_empty() {
            return Err(Error::validation("command kind must not be empty"));
        }

        let admission = {
            let mut registry = self.registry.lock().await;
            registry.begin_command(node_id, kind, Utc::now(), self.command_timeout)
        };

        let (in_flight, address) = match admission {
            Admission::Admitted { command, address } => (command, address),
            Admission::Unknown => {
                tracing::debug!(node_id, "dispatch to unknown or offline node");
                return Ok(DispatchOutcome::NodeUnknown);
            }
            Admission::Busy => {
                tracing::debug!(node_id, "dispatch rejected, command already in flight");
                return Ok(DispatchOutcome::NodeBusy);
            }
            Admission::Unsupported => {
                return Err(Error::validation(format!(
                    "node '{node_id}' does not accept '{kind}' commands"
                )));
            }
        };

        let seq = in_flight.seq;
        let envelope = CommandEnvelope {
            seq,
            kind: kind.to_string(),
            params: command.params,
        };

        let delivery = tokio::time::timeout(
            self.command_timeout,
            self.transport
                .deliver(&address, &envelope, self.command_timeout),
        )
        .await;

        let outcome = match delivery {
            Ok(Ok(reply)) if reply.seq == seq => {
                if reply.ok {
                    DispatchOutcome::Ack {
                        payload: reply.payload,
                    }
                } else {
                    DispatchOutcome::Nack {
                        reason: reply
                            .error
                            .unwrap_or_else(|| "node reported failure".to_string()),
                    }
                }
            }
            Ok(Ok(reply)) => {
                tracing::debug!(node_id, expected = seq, got = reply.seq, "discarding stale reply");
                DispatchOutcome::Timeout
            }
            Ok(Err(e)) => {
                tracing::warn!(node_id, %address, error = %e, "command delivery failed");
                DispatchOutcome::Timeout
            }
            Err(_) => DispatchOutcome::Timeout,
        };

        self.registry.lock().await.finish_command(node_id, seq);

        tracing::info!(node_id, kind, seq, outcome = outcome.label(), "command dispatched");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeDelta;

    use super::*;
    use crate::nodes::types::{Capability, NodeReply};
    use crate::nodes::NodeRegistry;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ack,
        Nack,
        Hang,
        WrongSeq,
        Fail,
        SlowAck(Duration),
    }

    struct FakeTransport {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn deliver(
            &self,
            _address: &str,
            envelope: &CommandEnvelope,
            _timeout: Duration,
        ) -> Result<NodeReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ack = NodeReply {
                seq: envelope.seq,
                ok: true,
                payload: Some(serde_json::json!({"state": "on"})),
                error: None,
            };
            match self.behavior {
                Behavior::Ack => Ok(ack),
                Behavior::Nack => Ok(NodeReply {
                    ok: false,
                    payload: None,
                    error: Some("gpio busy".to_string()),
                    ..ack
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ack)
                }
                Behavior::WrongSeq => Ok(NodeReply {
                    seq: envelope.seq + 100,
                    ..ack
                }),
                Behavior::Fail => Err(Error::Transport("connection refused".to_string())),
                Behavior::SlowAck(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(ack)
                }
            }
        }
    }

    async fn online_registry() -> SharedNodeRegistry {
        let registry = NodeRegistry::shared();
        registry.lock().await.upsert_heartbeat(
            "n1",
            "10.0.0.5:5000",
            BTreeSet::from([Capability::Led]),
            Utc::now(),
        );
        registry
    }

    fn led_on() -> Command {
        Command::new("led", serde_json::json!({"state": "on"}))
    }

    fn dispatcher(registry: SharedNodeRegistry, transport: Arc<FakeTransport>) -> CommandDispatcher {
        CommandDispatcher::new(registry, transport, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn ack_clears_in_flight() {
        let registry = online_registry().await;
        let d = dispatcher(registry.clone(), FakeTransport::new(Behavior::Ack));

        let outcome = d.dispatch("n1", led_on()).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Ack {
                payload: Some(serde_json::json!({"state": "on"}))
            }
        );
        let node = registry.lock().await.get("n1").unwrap();
        assert!(node.in_flight.is_none());
        assert_eq!(node.command_seq, 1);
    }

    #[tokio::test]
    async fn nack_carries_reason() {
        let d = dispatcher(online_registry().await, FakeTransport::new(Behavior::Nack));
        assert_eq!(
            d.dispatch("n1", led_on()).await.unwrap(),
            DispatchOutcome::Nack {
                reason: "gpio busy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn offline_node_never_reaches_transport() {
        let registry = online_registry().await;
        registry
            .lock()
            .await
            .sweep_timeouts(Utc::now() + TimeDelta::seconds(120), Duration::from_secs(60));
        let transport = FakeTransport::new(Behavior::Ack);
        let d = dispatcher(registry, transport.clone());

        assert_eq!(d.dispatch("n1", led_on()).await.unwrap(), DispatchOutcome::NodeUnknown);
        assert_eq!(d.dispatch("ghost", led_on()).await.unwrap(), DispatchOutcome::NodeUnknown);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_dispatch_yields_one_busy() {
        let transport = FakeTransport::new(Behavior::SlowAck(Duration::from_millis(50)));
        let d = dispatcher(online_registry().await, transport.clone());

        let (a, b) = tokio::join!(d.dispatch("n1", led_on()), d.dispatch("n1", led_on()));
        let mut labels = [a.unwrap().label(), b.unwrap().label()];
        labels.sort_unstable();

        assert_eq!(labels, ["ack", "node_busy"]);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn busy_while_prior_command_in_flight() {
        let registry = online_registry().await;
        registry
            .lock()
            .await
            .begin_command("n1", "led", Utc::now(), Duration::from_secs(30));
        let transport = FakeTransport::new(Behavior::Ack);
        let d = dispatcher(registry, transport.clone());

        assert_eq!(d.dispatch("n1", led_on()).await.unwrap(), DispatchOutcome::NodeBusy);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hang_times_out_and_frees_node() {
        let registry = online_registry().await;
        let d = dispatcher(registry.clone(), FakeTransport::new(Behavior::Hang));

        assert_eq!(d.dispatch("n1", led_on()).await.unwrap(), DispatchOutcome::Timeout);
        assert!(registry.lock().await.get("n1").unwrap().in_flight.is_none());
    }

    #[tokio::test]
    async fn transport_error_reported_as_timeout() {
        let d = dispatcher(online_registry().await, FakeTransport::new(Behavior::Fail));
        assert_eq!(d.dispatch("n1", led_on()).await.unwrap(), DispatchOutcome::Timeout);
    }

    #[tokio::test]
    async fn mismatched_seq_is_discarded() {
        let d = dispatcher(online_registry().await, FakeTransport::new(Behavior::WrongSeq));
        assert_eq!(d.dispatch("n1", led_on()).await.unwrap(), DispatchOutcome::Timeout);
    }

    #[tokio::test]
    async fn invalid_commands_rejected_locally() {
        let transport = FakeTransport::new(Behavior::Ack);
        let d = dispatcher(online_registry().await, transport.clone());

        assert!(matches!(
            d.dispatch("n1", Command::new(" ", serde_json::json!({}))).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            d.dispatch("n1", Command::new("relay", serde_json::json!({}))).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
