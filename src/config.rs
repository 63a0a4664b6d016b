use std::env;
use std::time::Duration;

/// Tunables for both roles. Each changes a responsiveness/bandwidth
/// trade-off, never correctness.
#[derive(Debug, Clone)]
pub struct Config {
    /// Heartbeat ceiling: a fix is published at least this often while the
    /// reporter is active, even when stationary.
    pub max_interval: Duration,
    /// Displacement floor: movement below this is not worth publishing on
    /// its own.
    pub min_distance_meters: f64,
    /// How long the observer-side marker animates between two fixes.
    pub animation_duration: Duration,
    /// Tick period of the animation loop.
    pub frame_interval: Duration,
    /// Window after which a missing fix is reported as a sensor timeout.
    pub sensor_timeout: Duration,
    /// Alert radius around waypoints and the observer itself.
    pub geofence_radius_km: f64,
    pub tables: Tables,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            max_interval: Duration::from_millis(env_u64("MAX_INTERVAL_MS", 5_000)),
            min_distance_meters: env_f64("MIN_DISTANCE_METERS", 10.0),
            animation_duration: Duration::from_millis(env_u64("ANIMATION_DURATION_MS", 800)),
            frame_interval: Duration::from_millis(env_u64("FRAME_INTERVAL_MS", 16)),
            sensor_timeout: Duration::from_millis(env_u64("SENSOR_TIMEOUT_MS", 10_000)),
            geofence_radius_km: env_f64("GEOFENCE_RADIUS_KM", 2.0),
            tables: Tables::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Backing-store table names.
#[derive(Debug, Clone)]
pub struct Tables {
    pub position: String,
    pub waypoints: String,
}

impl Tables {
    fn from_env() -> Self {
        Self {
            position: env::var("TABLE_POSITION").unwrap_or_else(|_| "bus_status".to_string()),
            waypoints: env::var("TABLE_WAYPOINTS").unwrap_or_else(|_| "bus_stops".to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|value| value.parse::<f64>().ok()).unwrap_or(default)
}
