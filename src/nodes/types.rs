//! Node registry types for liveness tracking and command dispatch

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness state of a fleet member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Never heard from
    Unknown,
    /// Heartbeat accepted within the liveness timeout
    Online,
    /// Aged out by the sweeper
    Offline,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Actuator or sensor kind a node can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Led,
    Relay,
    Servo,
    Pwm,
    Button,
    Temperature,
    Humidity,
    CpuTemperature,
}

impl Capability {
    /// Every recognised capability
    pub const ALL: [Self; 8] = [
        Self::Led,
        Self::Relay,
        Self::Servo,
        Self::Pwm,
        Self::Button,
        Self::Temperature,
        Self::Humidity,
        Self::CpuTemperature,
    ];

    /// Wire name of the capability
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Led => "led",
            Self::Relay => "relay",
            Self::Servo => "servo",
            Self::Pwm => "pwm",
            Self::Button => "button",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::CpuTemperature => "cpu_temperature",
        }
    }

    /// Whether commands can be addressed to this capability
    #[must_use]
    pub const fn is_actuator(self) -> bool {
        matches!(self, Self::Led | Self::Relay | Self::Servo | Self::Pwm)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::Error::validation(format!("unrecognized capability '{s}'")))
    }
}

/// Outstanding command descriptor held on a node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightCommand {
    pub seq: u64,
    pub kind: String,
    pub issued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl InFlightCommand {
    /// Whether the deadline has passed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// One fleet member as tracked by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub address: String,
    pub capabilities: BTreeSet<Capability>,
    pub status: NodeStatus,
    pub last_seen_at: DateTime<Utc>,
    pub in_flight: Option<InFlightCommand>,
    pub command_seq: u64,
}

/// Heartbeat report sent by a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<BTreeMap<String, f64>>,
    /// Explicit `host:port`; when absent the coordinator uses the connection's peer address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Command port paired with the inferred peer address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Tagged command addressed to one actuator kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Command {
    /// Build a command from a kind and JSON params object
    #[must_use]
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        let params = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// Command as delivered to a node, stamped with its sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub seq: u64,
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Reply from a node for a delivered command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReply {
    pub seq: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a dispatch attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Node executed the command
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    /// Node explicitly refused or failed to execute
    Nack { reason: String },
    /// No valid reply before the deadline; the node's actual outcome is unknown
    Timeout,
    /// No record, or the record is not online
    NodeUnknown,
    /// Another command to the node is still outstanding
    NodeBusy,
}

impl DispatchOutcome {
    /// Short label used in logs and CLI output
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ack { .. } => "ack",
            Self::Nack { .. } => "nack",
            Self::Timeout => "timeout",
            Self::NodeUnknown => "node_unknown",
            Self::NodeBusy => "node_busy",
        }
    }
}
