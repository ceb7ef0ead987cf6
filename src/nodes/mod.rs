//! Coordinator-side node tracking
//!
//! The registry is the one piece of shared mutable state. Heartbeats,
//! the sweeper and the dispatcher all receive it explicitly.

pub mod dispatch;
pub mod heartbeat;
pub mod policy;
pub mod registry;
pub mod sweeper;
pub mod transport;
pub mod types;

use std::sync::Arc;

use tokio::sync::Mutex;

pub use dispatch::CommandDispatcher;
pub use heartbeat::{AcceptedHeartbeat, HeartbeatReceiver, SensorSink, TracingSensorSink};
pub use policy::{is_command_allowed, parse_capabilities, validate_node_id};
pub use registry::{Admission, NodeRegistry};
pub use sweeper::LivenessSweeper;
pub use transport::{HttpTransport, Transport};
pub use types::{
    Capability, Command, CommandEnvelope, DispatchOutcome, Heartbeat, InFlightCommand, NodeRecord,
    NodeReply, NodeStatus,
};

/// Registry behind the lock every component shares
pub type SharedNodeRegistry = Arc<Mutex<NodeRegistry>>;

/// Command port assumed when a heartbeat does not report one
pub const DEFAULT_NODE_PORT: u16 = 5000;
