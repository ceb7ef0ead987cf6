//! Coordinator failover detection
//!
//! A passive observer that watches the coordinator's advertised identity and
//! the reachability of the primary and standby endpoints.

pub mod monitor;
pub mod probe;

pub use monitor::{
    EndpointRole, EndpointStatus, FailoverEvent, FailoverMonitor, FailoverState, Reachability,
    ReachabilityChange, SharedFailoverState,
};
pub use probe::{HttpIdentityProbe, HttpReachabilityProbe, IdentityProbe, ReachabilityProbe};
