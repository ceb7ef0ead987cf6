//! Validation rules for heartbeats and commands

use std::collections::BTreeSet;

use super::types::Capability;
use crate::{Error, Result};

/// Longest accepted node id
pub const MAX_NODE_ID_LEN: usize = 64;

/// Check that a node id is non-empty and uses only `[A-Za-z0-9._-]`
///
/// # Errors
///
/// Returns a validation error describing the first problem found
pub fn validate_node_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::validation("node id must not be empty"));
    }
    if id.len() > MAX_NODE_ID_LEN {
        return Err(Error::validation(format!(
            "node id longer than {MAX_NODE_ID_LEN} characters"
        )));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::validation(format!(
            "node id contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Parse declared capability names into a recognised set
///
/// Duplicates collapse; any unknown name rejects the whole set.
///
/// # Errors
///
/// Returns a validation error naming the first unrecognised capability
pub fn parse_capabilities(names: &[String]) -> Result<BTreeSet<Capability>> {
    names.iter().map(|n| n.trim().parse()).collect()
}

/// Check if a command kind may be sent to a node with the given declaration
///
/// The kind must name an actuator and the node must have declared it.
#[must_use]
pub fn is_command_allowed(declared: &BTreeSet<Capability>, kind: &str) -> bool {
    kind.parse::<Capability>()
        .is_ok_and(|cap| cap.is_actuator() && declared.contains(&cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_rules() {
        assert!(validate_node_id("pumpkin").is_ok());
        assert!(validate_node_id("node-01.lab_a").is_ok());
        assert!(validate_node_id("").is_err());
        assert!(validate_node_id("   ").is_err());
        assert!(validate_node_id("has space").is_err());
        assert!(validate_node_id(&"x".repeat(MAX_NODE_ID_LEN + 1)).is_err());
    }

    #[test]
    fn capabilities_parse_and_dedupe() {
        let caps = parse_capabilities(&[
            "led".to_string(),
            "temperature".to_string(),
            "led".to_string(),
        ])
        .unwrap();
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(&Capability::Led));
    }

    #[test]
    fn unknown_capability_rejected() {
        let err = parse_capabilities(&["led".to_string(), "laser".to_string()]).unwrap_err();
        assert!(err.to_string().contains("laser"));
    }

    #[test]
    fn command_requires_declared_actuator() {
        let declared: BTreeSet<_> = [Capability::Led, Capability::Temperature].into();

        assert!(is_command_allowed(&declared, "led"));
        // Declared, but a sensor
        assert!(!is_command_allowed(&declared, "temperature"));
        // Actuator, but not declared
        assert!(!is_command_allowed(&declared, "relay"));
        assert!(!is_command_allowed(&declared, "bogus"));
    }
}
