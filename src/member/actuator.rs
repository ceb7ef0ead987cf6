//! Actuator backends that execute commands on a node
//!
//! Each handler owns one command kind. The built-in handlers simulate the
//! hardware and keep their state in memory so a node can run anywhere.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::nodes::{Capability, CommandEnvelope, NodeReply};

/// Executes commands for one actuator kind
#[async_trait]
pub trait ActuatorBackend: Send + Sync {
    /// Kind of command this backend accepts
    fn kind(&self) -> Capability;

    /// Apply `params`, returning the resulting payload or a failure reason
    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, String>;

    /// Current state for status reporting
    fn state(&self) -> Value;
}

/// Requested switch position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchAction {
    On,
    Off,
    Toggle,
}

impl SwitchAction {
    fn from_params(params: &Map<String, Value>) -> Result<Self, String> {
        match params.get("state") {
            None => Ok(Self::Toggle),
            Some(Value::Bool(true)) => Ok(Self::On),
            Some(Value::Bool(false)) => Ok(Self::Off),
            Some(Value::String(s)) => match s.as_str() {
                "on" => Ok(Self::On),
                "off" => Ok(Self::Off),
                "toggle" => Ok(Self::Toggle),
                other => Err(format!("unsupported state '{other}', expected on, off or toggle")),
            },
            Some(other) => Err(format!("invalid state {other}")),
        }
    }
}

/// Simulated on/off output (LED or relay)
///
/// The state word keeps the on/off bit in bit 0 and a command generation in
/// the remaining bits, so an auto-off timer only fires if no later command
/// touched the switch.
#[derive(Debug)]
pub struct SwitchActuator {
    kind: Capability,
    state: Arc<AtomicU64>,
    auto_off: Option<Duration>,
}

impl SwitchActuator {
    fn new(kind: Capability) -> Self {
        Self {
            kind,
            state: Arc::new(AtomicU64::new(0)),
            auto_off: None,
        }
    }

    /// Simulated LED, initially off
    #[must_use]
    pub fn led() -> Self {
        Self::new(Capability::Led)
    }

    /// Simulated relay, initially open
    #[must_use]
    pub fn relay() -> Self {
        Self::new(Capability::Relay)
    }

    /// Switch back off `after` each command that leaves it on
    #[must_use]
    pub fn with_auto_off(mut self, after: Duration) -> Self {
        self.auto_off = Some(after);
        self
    }

    fn describe(on: bool) -> Value {
        json!({ "state": if on { "on" } else { "off" } })
    }

    fn schedule_auto_off(&self, word: u64, after: Duration) {
        let state = self.state.clone();
        let kind = self.kind;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if state
                .compare_exchange(word, word & !1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::info!(%kind, "switch turned off automatically");
            }
        });
    }
}

#[async_trait]
impl ActuatorBackend for SwitchActuator {
    fn kind(&self) -> Capability {
        self.kind
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let action = SwitchAction::from_params(params)?;

        let mut word = 0;
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let on = match action {
                    SwitchAction::On => true,
                    SwitchAction::Off => false,
                    SwitchAction::Toggle => current & 1 == 0,
                };
                word = ((current >> 1).wrapping_add(1) << 1) | u64::from(on);
                Some(word)
            });

        let on = word & 1 == 1;
        tracing::info!(kind = %self.kind, on, "switch set");
        if let Some(after) = self.auto_off.filter(|_| on) {
            self.schedule_auto_off(word, after);
        }
        Ok(Self::describe(on))
    }

    fn state(&self) -> Value {
        Self::describe(self.state.load(Ordering::SeqCst) & 1 == 1)
    }
}

/// Simulated PWM output with a duty cycle between 0.0 and 1.0
#[derive(Debug, Default)]
pub struct PwmActuator {
    duty_bits: AtomicU64,
}

impl PwmActuator {
    /// Simulated output at 0% duty
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn duty(&self) -> f64 {
        f64::from_bits(self.duty_bits.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ActuatorBackend for PwmActuator {
    fn kind(&self) -> Capability {
        Capability::Pwm
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let value = params
            .get("value")
            .and_then(Value::as_f64)
            .ok_or_else(|| "pwm command requires a numeric 'value'".to_string())?
            .clamp(0.0, 1.0);

        self.duty_bits.store(value.to_bits(), Ordering::SeqCst);
        tracing::info!(value, "pwm duty set");
        Ok(json!({ "value": value }))
    }

    fn state(&self) -> Value {
        json!({ "value": self.duty() })
    }
}

/// Simulated hobby servo positioned in whole degrees
#[derive(Debug)]
pub struct ServoActuator {
    angle: AtomicU8,
}

impl ServoActuator {
    /// Largest accepted angle
    pub const MAX_ANGLE: u8 = 180;

    /// Simulated servo centred at 90 degrees
    #[must_use]
    pub const fn new() -> Self {
        Self {
            angle: AtomicU8::new(90),
        }
    }
}

impl Default for ServoActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActuatorBackend for ServoActuator {
    fn kind(&self) -> Capability {
        Capability::Servo
    }

    async fn execute(&self, params: &Map<String, Value>) -> Result<Value, String> {
        let angle = params
            .get("angle")
            .and_then(Value::as_u64)
            .ok_or_else(|| "servo command requires an integer 'angle'".to_string())?;
        let angle = u8::try_from(angle)
            .ok()
            .filter(|a| *a <= Self::MAX_ANGLE)
            .ok_or_else(|| format!("angle {angle} outside 0..={}", Self::MAX_ANGLE))?;

        self.angle.store(angle, Ordering::SeqCst);
        tracing::info!(angle, "servo moved");
        Ok(json!({ "angle": angle }))
    }

    fn state(&self) -> Value {
        json!({ "angle": self.angle.load(Ordering::SeqCst) })
    }
}

/// Command handlers keyed by kind
#[derive(Default, Clone)]
pub struct ActuatorRegistry {
    handlers: BTreeMap<Capability, Arc<dyn ActuatorBackend>>,
}

impl ActuatorRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a simulated handler for every declared actuator
    #[must_use]
    pub fn simulated(capabilities: &BTreeSet<Capability>) -> Self {
        Self::simulated_with_auto_off(capabilities, None)
    }

    /// Like [`Self::simulated`], with the LED switching itself off after `led_auto_off`
    #[must_use]
    pub fn simulated_with_auto_off(
        capabilities: &BTreeSet<Capability>,
        led_auto_off: Option<Duration>,
    ) -> Self {
        let mut registry = Self::new();
        for capability in capabilities {
            match capability {
                Capability::Led => {
                    let led = SwitchActuator::led();
                    let led = match led_auto_off {
                        Some(after) => led.with_auto_off(after),
                        None => led,
                    };
                    registry.register(Arc::new(led));
                }
                Capability::Relay => registry.register(Arc::new(SwitchActuator::relay())),
                Capability::Servo => registry.register(Arc::new(ServoActuator::new())),
                Capability::Pwm => registry.register(Arc::new(PwmActuator::new())),
                _ => {}
            }
        }
        registry
    }

    /// Register `backend`, replacing any handler for the same kind
    pub fn register(&mut self, backend: Arc<dyn ActuatorBackend>) {
        self.handlers.insert(backend.kind(), backend);
    }

    /// Kinds with a registered handler
    #[must_use]
    pub fn kinds(&self) -> Vec<Capability> {
        self.handlers.keys().copied().collect()
    }

    /// Current state of every handler, keyed by kind
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, Value> {
        self.handlers
            .iter()
            .map(|(kind, handler)| (kind.to_string(), handler.state()))
            .collect()
    }

    /// Execute an envelope and build the reply echoing its sequence number
    pub async fn handle(&self, envelope: &CommandEnvelope) -> NodeReply {
        let handler = envelope
            .kind
            .parse::<Capability>()
            .ok()
            .and_then(|kind| self.handlers.get(&kind));

        let Some(handler) = handler else {
            tracing::warn!(kind = %envelope.kind, seq = envelope.seq, "no handler for command");
            return NodeReply {
                seq: envelope.seq,
                ok: false,
                payload: None,
                error: Some(format!("no handler for '{}'", envelope.kind)),
            };
        };

        match handler.execute(&envelope.params).await {
            Ok(payload) => NodeReply {
                seq: envelope.seq,
                ok: true,
                payload: Some(payload),
                error: None,
            },
            Err(reason) => {
                tracing::debug!(kind = %envelope.kind, seq = envelope.seq, %reason, "command refused");
                NodeReply {
                    seq: envelope.seq,
                    ok: false,
                    payload: None,
                    error: Some(reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(seq: u64, kind: &str, params: Value) -> CommandEnvelope {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        CommandEnvelope {
            seq,
            kind: kind.to_string(),
            params,
        }
    }

    fn registry() -> ActuatorRegistry {
        ActuatorRegistry::simulated(&BTreeSet::from([
            Capability::Led,
            Capability::Servo,
            Capability::Pwm,
            Capability::Temperature,
        ]))
    }

    #[tokio::test]
    async fn led_on_off_toggle() {
        let registry = registry();

        let reply = registry.handle(&envelope(1, "led", json!({"state": "on"}))).await;
        assert!(reply.ok);
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.payload, Some(json!({"state": "on"})));

        let reply = registry.handle(&envelope(2, "led", json!({"state": "toggle"}))).await;
        assert_eq!(reply.payload, Some(json!({"state": "off"})));

        let reply = registry.handle(&envelope(3, "led", json!({}))).await;
        assert_eq!(reply.payload, Some(json!({"state": "on"})));

        assert_eq!(registry.states()["led"], json!({"state": "on"}));
    }

    #[tokio::test]
    async fn bad_led_state_is_refused() {
        let reply = registry()
            .handle(&envelope(4, "led", json!({"state": "blink"})))
            .await;
        assert!(!reply.ok);
        assert!(reply.error.unwrap().contains("blink"));
    }

    #[tokio::test]
    async fn servo_range_enforced() {
        let registry = registry();

        let reply = registry.handle(&envelope(1, "servo", json!({"angle": 45}))).await;
        assert!(reply.ok);
        assert_eq!(registry.states()["servo"], json!({"angle": 45}));

        let reply = registry.handle(&envelope(2, "servo", json!({"angle": 270}))).await;
        assert!(!reply.ok);
        assert_eq!(registry.states()["servo"], json!({"angle": 45}));

        assert!(!registry.handle(&envelope(3, "servo", json!({}))).await.ok);
    }

    #[tokio::test]
    async fn pwm_value_is_clamped_and_reported() {
        let registry = registry();
        assert_eq!(
            registry.kinds(),
            [Capability::Led, Capability::Servo, Capability::Pwm]
        );

        let reply = registry.handle(&envelope(1, "pwm", json!({"value": 0.25}))).await;
        assert!(reply.ok);
        assert_eq!(reply.payload, Some(json!({"value": 0.25})));

        let reply = registry.handle(&envelope(2, "pwm", json!({"value": 3}))).await;
        assert_eq!(reply.payload, Some(json!({"value": 1.0})));

        let reply = registry.handle(&envelope(3, "pwm", json!({"value": -0.5}))).await;
        assert_eq!(reply.payload, Some(json!({"value": 0.0})));
        assert_eq!(registry.states()["pwm"], json!({"value": 0.0}));

        let reply = registry.handle(&envelope(4, "pwm", json!({"value": "half"}))).await;
        assert!(!reply.ok);
        assert_eq!(reply.seq, 4);
    }

    #[tokio::test]
    async fn unknown_kind_is_a_failed_reply() {
        let reply = registry().handle(&envelope(10, "laser", json!({}))).await;
        assert!(!reply.ok);
        assert_eq!(reply.seq, 10);
    }

    #[tokio::test]
    async fn led_switches_itself_off() {
        let led = SwitchActuator::led().with_auto_off(Duration::from_millis(50));
        let on = Map::from_iter([("state".to_string(), json!("on"))]);

        led.execute(&on).await.unwrap();
        assert_eq!(led.state(), json!({"state": "on"}));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(led.state(), json!({"state": "off"}));
    }

    #[tokio::test]
    async fn later_command_cancels_pending_auto_off() {
        let led = SwitchActuator::led().with_auto_off(Duration::from_millis(200));
        let on = Map::from_iter([("state".to_string(), json!("on"))]);

        led.execute(&on).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        led.execute(&on).await.unwrap();

        // First timer has fired by now but the second command superseded it
        tokio::time::sleep(Duration::from_millis(130)).await;
        assert_eq!(led.state(), json!({"state": "on"}));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(led.state(), json!({"state": "off"}));
    }

    #[tokio::test]
    async fn auto_off_registry_only_touches_led() {
        let registry = ActuatorRegistry::simulated_with_auto_off(
            &BTreeSet::from([Capability::Led, Capability::Relay]),
            Some(Duration::from_millis(50)),
        );
        registry.handle(&envelope(1, "led", json!({"state": "on"}))).await;
        registry.handle(&envelope(2, "relay", json!({"state": "on"}))).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.states()["led"], json!({"state": "off"}));
        assert_eq!(registry.states()["relay"], json!({"state": "on"}));
    }
}
