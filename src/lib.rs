//! Fleet Coordinator - liveness, command dispatch and failover detection
//!
//! This library provides the node coordination layer for a small device fleet:
//! - Node registry with heartbeat-driven liveness
//! - Command dispatch with at most one command in flight per node
//! - Node-side heartbeat emitter and actuator command server
//! - Passive failover monitor watching the coordinator's identity
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  heartbeat   ┌──────────────────────────────────┐
//! │    Member    │ ───────────► │           Coordinator            │
//! │  emitter     │              │  HeartbeatReceiver ─► Registry   │
//! │  actuators   │ ◄─────────── │  CommandDispatcher ◄─┘   ▲       │
//! └──────────────┘   command    │  LivenessSweeper ────────┘       │
//!                               └────────────────┬─────────────────┘
//!                                                │ /api/identity, /health
//!                                       ┌────────▼─────────┐
//!                                       │ FailoverMonitor  │
//!                                       └──────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod failover;
pub mod member;
pub mod nodes;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use events::{EventBus, FleetEvent};
pub use failover::{FailoverMonitor, Reachability};
pub use member::{HeartbeatEmitter, MemberNode};
pub use nodes::{CommandDispatcher, DispatchOutcome, HeartbeatReceiver, LivenessSweeper, NodeRegistry};
