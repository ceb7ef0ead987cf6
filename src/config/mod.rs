//! Configuration management for the fleet coordinator
//!
//! Precedence, highest first: CLI flags (applied by the binary),
//! `FLEET_*` environment variables, the TOML file, built-in defaults.

pub mod file;

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::member::RetryPolicy;
use crate::nodes::DEFAULT_NODE_PORT;
use crate::{Error, Result};

pub use file::FleetConfigFile;

/// Fleet configuration for every role the binary can run
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Coordinator HTTP server
    pub server: ServerConfig,

    /// Liveness sweep settings
    pub liveness: LivenessConfig,

    /// Command dispatch settings
    pub dispatch: DispatchConfig,

    /// Node-side settings
    pub member: MemberConfig,

    /// Failover monitor settings
    pub monitor: MonitorConfig,
}

/// Coordinator HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Broadcast identity; `None` means use the hostname
    pub identity: Option<String>,

    /// Upper bound on concurrently handled requests
    pub max_concurrent_requests: usize,

    /// Optional global requests-per-minute budget
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            identity: None,
            max_concurrent_requests: 64,
            rate_limit_per_minute: None,
        }
    }
}

/// Liveness configuration
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// How often the sweeper runs
    pub sweep_interval: Duration,

    /// Silence after which an online node is demoted
    pub timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline for a node's reply
    pub command_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// Node-side configuration
#[derive(Debug, Clone)]
pub struct MemberConfig {
    /// Logical node name; falls back to the hostname
    pub node_id: Option<String>,

    /// Coordinator base URL
    pub coordinator_url: String,

    /// Port for the node's command server
    pub port: u16,

    /// Explicit `host:port` to report
    pub advertise_address: Option<String>,

    /// Declared capability names
    pub capabilities: Vec<String>,

    /// Lower bound of the heartbeat interval
    pub heartbeat_min: Duration,

    /// Upper bound of the heartbeat interval
    pub heartbeat_max: Duration,

    /// Per-tick retry policy
    pub retry: RetryPolicy,

    /// Timeout for a single heartbeat request
    pub request_timeout: Duration,

    /// Switch a lit LED off again after this long
    pub led_auto_off: Option<Duration>,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            coordinator_url: "http://192.168.4.1:8080".to_string(),
            port: DEFAULT_NODE_PORT,
            advertise_address: None,
            capabilities: vec!["led".to_string(), "cpu_temperature".to_string()],
            heartbeat_min: Duration::from_secs(15),
            heartbeat_max: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(5),
            led_auto_off: None,
        }
    }
}

/// Failover monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Primary coordinator base URL
    pub coordinator_url: String,

    /// Standby coordinator base URLs
    pub backup_urls: Vec<String>,

    /// Identity probe cadence
    pub identity_interval: Duration,

    /// Reachability probe cadence
    pub reachability_interval: Duration,

    /// Timeout for a single probe
    pub probe_timeout: Duration,

    /// Port for the monitor's status endpoint
    pub port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://192.168.4.1:8080".to_string(),
            backup_urls: Vec::new(),
            identity_interval: Duration::from_secs(10),
            reachability_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            port: 8090,
        }
    }
}

impl Config {
    /// Load configuration from the default file location and the environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file cannot be loaded or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(p) => file::load_config_file_from(p)?,
            None => file::load_config_file(),
        };
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or the combination is invalid
    pub fn from_sources(fc: FleetConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parsed = |key: &str| -> Result<Option<u64>> {
            env(key)
                .map(|v| {
                    v.trim()
                        .parse::<u64>()
                        .map_err(|e| Error::Config(format!("{key}: {e}")))
                })
                .transpose()
        };
        let list = |key: &str| {
            env(key).map(|v| {
                v.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
        };

        let default = Self::default();

        let bind = match env("FLEET_BIND").or(fc.server.bind) {
            Some(s) => s
                .parse()
                .map_err(|e| Error::Config(format!("invalid bind address '{s}': {e}")))?,
            None => default.server.bind,
        };

        let server = ServerConfig {
            bind,
            port: parsed("FLEET_PORT")?
                .map(port_from)
                .transpose()?
                .or(fc.server.port)
                .unwrap_or(default.server.port),
            identity: env("FLEET_IDENTITY").or(fc.server.identity),
            max_concurrent_requests: parsed("FLEET_MAX_CONCURRENT_REQUESTS")?
                .and_then(|v| usize::try_from(v).ok())
                .or(fc.server.max_concurrent_requests)
                .unwrap_or(default.server.max_concurrent_requests),
            rate_limit_per_minute: parsed("FLEET_RATE_LIMIT_RPM")?
                .and_then(|v| u32::try_from(v).ok())
                .or(fc.server.rate_limit_per_minute),
        };

        let liveness = LivenessConfig {
            sweep_interval: parsed("FLEET_SWEEP_INTERVAL_SECS")?
                .or(fc.liveness.sweep_interval_secs)
                .map_or(default.liveness.sweep_interval, Duration::from_secs),
            timeout: parsed("FLEET_LIVENESS_TIMEOUT_SECS")?
                .or(fc.liveness.timeout_secs)
                .map_or(default.liveness.timeout, Duration::from_secs),
        };

        let dispatch = DispatchConfig {
            command_timeout: parsed("FLEET_COMMAND_TIMEOUT_MS")?
                .or(fc.dispatch.command_timeout_ms)
                .map_or(default.dispatch.command_timeout, Duration::from_millis),
        };

        let member = MemberConfig {
            node_id: env("FLEET_NODE_ID").or(fc.member.node_id),
            coordinator_url: env("FLEET_COORDINATOR_URL")
                .or(fc.member.coordinator_url)
                .unwrap_or(default.member.coordinator_url),
            port: parsed("FLEET_NODE_PORT")?
                .map(port_from)
                .transpose()?
                .or(fc.member.port)
                .unwrap_or(default.member.port),
            advertise_address: env("FLEET_ADVERTISE_ADDRESS").or(fc.member.advertise_address),
            capabilities: list("FLEET_CAPABILITIES")
                .or(fc.member.capabilities)
                .unwrap_or(default.member.capabilities),
            heartbeat_min: parsed("FLEET_HEARTBEAT_MIN_SECS")?
                .or(fc.member.heartbeat_min_secs)
                .map_or(default.member.heartbeat_min, Duration::from_secs),
            heartbeat_max: parsed("FLEET_HEARTBEAT_MAX_SECS")?
                .or(fc.member.heartbeat_max_secs)
                .map_or(default.member.heartbeat_max, Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: fc
                    .member
                    .heartbeat_attempts
                    .unwrap_or(default.member.retry.max_attempts),
                ..default.member.retry
            },
            request_timeout: fc
                .member
                .request_timeout_ms
                .map_or(default.member.request_timeout, Duration::from_millis),
            led_auto_off: parsed("FLEET_LED_AUTO_OFF_SECS")?
                .or(fc.member.led_auto_off_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        let monitor = MonitorConfig {
            coordinator_url: env("FLEET_MONITOR_COORDINATOR_URL")
                .or(fc.monitor.coordinator_url)
                .unwrap_or(default.monitor.coordinator_url),
            backup_urls: list("FLEET_BACKUP_URLS")
                .or(fc.monitor.backup_urls)
                .unwrap_or_default(),
            identity_interval: fc
                .monitor
                .identity_interval_secs
                .map_or(default.monitor.identity_interval, Duration::from_secs),
            reachability_interval: fc
                .monitor
                .reachability_interval_secs
                .map_or(default.monitor.reachability_interval, Duration::from_secs),
            probe_timeout: fc
                .monitor
                .probe_timeout_ms
                .map_or(default.monitor.probe_timeout, Duration::from_millis),
            port: parsed("FLEET_MONITOR_PORT")?
                .map(port_from)
                .transpose()?
                .or(fc.monitor.port)
                .unwrap_or(default.monitor.port),
        };

        let config = Self {
            server,
            liveness,
            dispatch,
            member,
            monitor,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations no role can run with
    ///
    /// # Errors
    ///
    /// Returns a config error describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("liveness.sweep_interval", self.liveness.sweep_interval),
            ("liveness.timeout", self.liveness.timeout),
            ("dispatch.command_timeout", self.dispatch.command_timeout),
            ("member.heartbeat_min", self.member.heartbeat_min),
            ("member.request_timeout", self.member.request_timeout),
            ("monitor.identity_interval", self.monitor.identity_interval),
            ("monitor.reachability_interval", self.monitor.reachability_interval),
            ("monitor.probe_timeout", self.monitor.probe_timeout),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }
        if self.member.heartbeat_min > self.member.heartbeat_max {
            return Err(Error::Config(
                "member.heartbeat_min must not exceed member.heartbeat_max".to_string(),
            ));
        }
        if self.member.retry.max_attempts == 0 {
            return Err(Error::Config(
                "member.heartbeat_attempts must be at least 1".to_string(),
            ));
        }
        let urls = [
            ("member.coordinator_url", &self.member.coordinator_url),
            ("monitor.coordinator_url", &self.monitor.coordinator_url),
        ];
        if let Some((name, _)) = urls.iter().find(|(_, url)| url.trim().is_empty()) {
            return Err(Error::Config(format!("{name} must not be empty")));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "server.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Coordinator identity: configured value or the hostname
    #[must_use]
    pub fn coordinator_identity(&self) -> String {
        self.server.identity.clone().unwrap_or_else(local_hostname)
    }

    /// Node id for the member role: configured value or the hostname
    #[must_use]
    pub fn member_node_id(&self) -> String {
        self.member.node_id.clone().unwrap_or_else(local_hostname)
    }
}

fn port_from(value: u64) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::Config(format!("port {value} out of range")))
}

fn local_hostname() -> String {
    hostname::get().map_or_else(|_| "fleet".to_string(), |h| h.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_sources(FleetConfigFile::default(), env_of(&[])).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.liveness.timeout, Duration::from_secs(60));
        assert_eq!(config.liveness.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.dispatch.command_timeout, Duration::from_secs(5));
        assert_eq!(config.member.port, DEFAULT_NODE_PORT);
    }

    #[test]
    fn env_overrides_file() {
        let fc: FleetConfigFile = toml::from_str(
            r"
            [server]
            port = 9000
            [liveness]
            timeout_secs = 90
            ",
        )
        .unwrap();
        let config = Config::from_sources(
            fc,
            env_of(&[
                ("FLEET_PORT", "9100"),
                ("FLEET_CAPABILITIES", "led, relay,,servo"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.liveness.timeout, Duration::from_secs(90));
        assert_eq!(config.member.capabilities, ["led", "relay", "servo"]);
        assert!(config.member.led_auto_off.is_none());
    }

    #[test]
    fn led_auto_off_zero_disables() {
        let fc: FleetConfigFile = toml::from_str("[member]\nled_auto_off_secs = 30\n").unwrap();
        let config = Config::from_sources(fc, env_of(&[])).unwrap();
        assert_eq!(config.member.led_auto_off, Some(Duration::from_secs(30)));

        let fc: FleetConfigFile = toml::from_str("[member]\nled_auto_off_secs = 30\n").unwrap();
        let config =
            Config::from_sources(fc, env_of(&[("FLEET_LED_AUTO_OFF_SECS", "0")])).unwrap();
        assert!(config.member.led_auto_off.is_none());
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let err = Config::from_sources(
            FleetConfigFile::default(),
            env_of(&[("FLEET_LIVENESS_TIMEOUT_SECS", "soon")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("FLEET_LIVENESS_TIMEOUT_SECS"));

        assert!(
            Config::from_sources(FleetConfigFile::default(), env_of(&[("FLEET_PORT", "70000")]))
                .is_err()
        );
    }

    #[test]
    fn validation_rules() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.member.heartbeat_min = Duration::from_secs(40);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.liveness.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.coordinator_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn identity_prefers_configured_value() {
        let mut config = Config::default();
        config.server.identity = Some("ap-primary".to_string());
        assert_eq!(config.coordinator_identity(), "ap-primary");
    }
}
