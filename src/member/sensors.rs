//! Sensor readings attached to outgoing heartbeats

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

/// Linux thermal zone exposing the SoC temperature in millidegrees
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Source of sensor readings sampled once per heartbeat
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Current readings; an empty map is a valid heartbeat payload
    async fn read(&self) -> BTreeMap<String, f64>;
}

/// Readings available from the host itself
#[derive(Debug, Clone)]
pub struct SystemSensors {
    thermal_path: PathBuf,
}

impl Default for SystemSensors {
    fn default() -> Self {
        Self {
            thermal_path: PathBuf::from(DEFAULT_THERMAL_PATH),
        }
    }
}

impl SystemSensors {
    /// Read the CPU temperature from a different file
    #[must_use]
    pub fn with_thermal_path(path: impl Into<PathBuf>) -> Self {
        Self {
            thermal_path: path.into(),
        }
    }

    async fn cpu_temperature(&self) -> Option<f64> {
        let raw = tokio::fs::read_to_string(&self.thermal_path).await.ok()?;
        parse_millidegrees(&raw)
    }
}

#[async_trait]
impl SensorSource for SystemSensors {
    async fn read(&self) -> BTreeMap<String, f64> {
        let mut readings = BTreeMap::new();
        match self.cpu_temperature().await {
            Some(celsius) => {
                readings.insert("cpu_temperature".to_string(), celsius);
            }
            None => {
                tracing::trace!(path = %self.thermal_path.display(), "cpu temperature unavailable");
            }
        }
        readings
    }
}

/// Sensor source that reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSensors;

#[async_trait]
impl SensorSource for NoSensors {
    async fn read(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Convert a thermal zone reading to degrees Celsius
fn parse_millidegrees(raw: &str) -> Option<f64> {
    let milli: i64 = raw.trim().parse().ok()?;
    #[allow(clippy::cast_precision_loss)]
    Some(milli as f64 / 1000.0)
}
