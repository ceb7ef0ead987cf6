//! TOML configuration file loading
//!
//! Supports `~/.config/fleet/config.toml` as a persistent config source.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FleetConfigFile {
    /// Coordinator HTTP server
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Heartbeat timeout and sweep cadence
    #[serde(default)]
    pub liveness: LivenessFileConfig,

    /// Command delivery
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// Node-side settings
    #[serde(default)]
    pub member: MemberFileConfig,

    /// Failover monitor
    #[serde(default)]
    pub monitor: MonitorFileConfig,
}

/// Coordinator server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Bind address (e.g. "0.0.0.0")
    pub bind: Option<String>,
    /// API server port
    pub port: Option<u16>,
    /// Broadcast identity reported to monitors; defaults to the hostname
    pub identity: Option<String>,
    /// Upper bound on concurrently handled requests
    pub max_concurrent_requests: Option<usize>,
    /// Global request budget per minute
    pub rate_limit_per_minute: Option<u32>,
}

/// Liveness configuration
#[derive(Debug, Default, Deserialize)]
pub struct LivenessFileConfig {
    pub sweep_interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// Dispatch configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    pub command_timeout_ms: Option<u64>,
}

/// Member (node) configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemberFileConfig {
    /// Logical node name
    pub node_id: Option<String>,
    /// Coordinator base URL (e.g. "http://192.168.4.1:8080")
    pub coordinator_url: Option<String>,
    /// Command server port
    pub port: Option<u16>,
    /// Explicit `host:port` to report instead of the connection address
    pub advertise_address: Option<String>,
    /// Declared capabilities
    pub capabilities: Option<Vec<String>>,
    pub heartbeat_min_secs: Option<u64>,
    pub heartbeat_max_secs: Option<u64>,
    pub heartbeat_attempts: Option<u32>,
    pub request_timeout_ms: Option<u64>,
    /// Seconds after which a lit LED switches itself off (0 disables)
    pub led_auto_off_secs: Option<u64>,
}

/// Failover monitor configuration
#[derive(Debug, Default, Deserialize)]
pub struct MonitorFileConfig {
    /// Primary coordinator base URL
    pub coordinator_url: Option<String>,
    /// Standby coordinator base URLs
    pub backup_urls: Option<Vec<String>>,
    pub identity_interval_secs: Option<u64>,
    pub reachability_interval_secs: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    /// Status endpoint port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FleetConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FleetConfigFile {
    let Some(path) = config_file_path() else {
        return FleetConfigFile::default();
    };

    if !path.exists() {
        return FleetConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            FleetConfigFile::default()
        }
    }
}

/// Load a config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file_from(path: &Path) -> Result<FleetConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/fleet/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fleet").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let file: FleetConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000

            [member]
            node_id = "pumpkin"
            capabilities = ["led", "temperature"]

            [monitor]
            backup_urls = ["http://192.168.4.2:8080"]
            "#,
        )
        .unwrap();

        assert_eq!(file.server.port, Some(9000));
        assert_eq!(file.member.node_id.as_deref(), Some("pumpkin"));
        assert_eq!(file.monitor.backup_urls.unwrap().len(), 1);
        assert!(file.liveness.timeout_secs.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let file: FleetConfigFile = toml::from_str("").unwrap();
        assert!(file.server.port.is_none());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load_config_file_from(Path::new("/nonexistent/fleet.toml")).is_err());
    }
}
