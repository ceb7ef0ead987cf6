//! Node registry for tracking fleet liveness

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use super::policy::is_command_allowed;
use super::types::{Capability, InFlightCommand, NodeRecord, NodeStatus};
use super::SharedNodeRegistry;

/// Outcome of asking the registry to admit a new command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Command recorded as in flight; deliver it to `address`
    Admitted {
        command: InFlightCommand,
        address: String,
    },
    /// No record, or the record is not online
    Unknown,
    /// Node did not declare an actuator matching the command kind
    Unsupported,
    /// A previous command is still within its deadline
    Busy,
}

/// Registry of known nodes
///
/// Mutation rules live here; locking is the owner's concern.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeRecord>,
}

impl NodeRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Create an empty registry behind the shared lock
    #[must_use]
    pub fn shared() -> SharedNodeRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record an accepted heartbeat
    ///
    /// Creates the record on first contact and always refreshes address,
    /// capabilities and `last_seen_at`. Returns true when this call moved
    /// the node to `Online` from any other state.
    pub fn upsert_heartbeat(
        &mut self,
        id: &str,
        address: &str,
        capabilities: BTreeSet<Capability>,
        now: DateTime<Utc>,
    ) -> bool {
        match self.nodes.get_mut(id) {
            Some(record) => {
                let was = record.status;
                record.address = address.to_string();
                record.capabilities = capabilities;
                record.last_seen_at = now;
                record.status = NodeStatus::Online;
                was != NodeStatus::Online
            }
            None => {
                self.nodes.insert(
                    id.to_string(),
                    NodeRecord {
                        id: id.to_string(),
                        address: address.to_string(),
                        capabilities,
                        status: NodeStatus::Online,
                        last_seen_at: now,
                        in_flight: None,
                        command_seq: 0,
                    },
                );
                true
            }
        }
    }

    /// Demote online nodes silent for longer than `timeout`
    ///
    /// Returns the ids that became `Offline` on this pass, sorted.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let mut demoted: Vec<String> = self
            .nodes
            .values_mut()
            .filter(|r| r.status == NodeStatus::Online && now - r.last_seen_at > timeout)
            .map(|r| {
                r.status = NodeStatus::Offline;
                r.id.clone()
            })
            .collect();
        demoted.sort();
        demoted
    }

    /// Get a copy of a node's record
    #[must_use]
    pub fn get(&self, id: &str) -> Option<NodeRecord> {
        self.nodes.get(id).cloned()
    }

    /// Current status, `Unknown` for ids never heard from
    #[must_use]
    pub fn status(&self, id: &str) -> NodeStatus {
        self.nodes.get(id).map_or(NodeStatus::Unknown, |r| r.status)
    }

    /// Snapshot of all records, ordered by id
    #[must_use]
    pub fn list(&self) -> Vec<NodeRecord> {
        let mut records: Vec<NodeRecord> = self.nodes.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Try to mark a command as in flight for `id`
    ///
    /// At most one command per node: an entry still inside its deadline
    /// rejects the new one. Expired entries are replaced.
    ///
    /// # Panics
    ///
    /// Panics if the record's in-flight sequence is ahead of its counter,
    /// which means the registry state is corrupt.
    pub fn begin_command(
        &mut self,
        id: &str,
        kind: &str,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Admission {
        let Some(record) = self.nodes.get_mut(id) else {
            return Admission::Unknown;
        };
        if record.status != NodeStatus::Online {
            return Admission::Unknown;
        }
        if !is_command_allowed(&record.capabilities, kind) {
            return Admission::Unsupported;
        }
        if let Some(current) = &record.in_flight {
            assert!(
                current.seq <= record.command_seq,
                "registry invariant violated: node '{id}' in-flight seq {} ahead of counter {}",
                current.seq,
                record.command_seq
            );
            if !current.is_expired(now) {
                return Admission::Busy;
            }
            tracing::debug!(node_id = %id, seq = current.seq, "replacing expired in-flight command");
        }

        record.command_seq += 1;
        let deadline = TimeDelta::from_std(timeout)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let command = InFlightCommand {
            seq: record.command_seq,
            kind: kind.to_string(),
            issued_at: now,
            deadline,
        };
        record.in_flight = Some(command.clone());

        Admission::Admitted {
            command,
            address: record.address.clone(),
        }
    }

    /// Clear the in-flight command if it is still the one numbered `seq`
    ///
    /// Returns false when a different (newer) command occupies the slot or
    /// nothing is in flight, so a stale completion never clears a live one.
    pub fn finish_command(&mut self, id: &str, seq: u64) -> bool {
        let Some(record) = self.nodes.get_mut(id) else {
            return false;
        };
        match &record.in_flight {
            Some(current) if current.seq == seq => {
                record.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Number of known nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count of nodes currently online
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|r| r.status == NodeStatus::Online)
            .count()
    }
}
