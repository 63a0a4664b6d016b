use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// One raw sample from the device location sensor. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    /// Sensor-reported ground speed, when the hardware provides one.
    pub speed_mps: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    #[must_use]
    pub fn new(coordinate: Coordinate, speed_mps: Option<f64>) -> Self {
        Self { coordinate, speed_mps, timestamp: Utc::now() }
    }

    /// Sensor speed converted to km/h, if present.
    #[must_use]
    pub fn speed_kmh(&self) -> Option<f64> {
        self.speed_mps.filter(|s| s.is_finite()).map(|s| s * 3.6)
    }
}

/// The record a reporter upserts into the backing store. At most one live
/// row exists per `reporter_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedPosition {
    pub reporter_id: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Direction of travel in [0, 360) degrees, 0 = north. Absent when the
    /// reporter has not moved since its previous publish.
    pub bearing: Option<f64>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl ReportedPosition {
    /// True when the record should drive interpolation and proximity.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_active && self.coordinate.is_valid()
    }
}

/// Static reference point loaded once per observer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub order_index: i32,
}

/// Proximity state recomputed from scratch on every input change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProximityResult {
    pub nearest_waypoint: Option<Waypoint>,
    pub nearest_distance_km: Option<f64>,
    /// Straight-line km between the vehicle and the observer, when both are
    /// known.
    pub distance_remaining_km: Option<f64>,
    pub within_geofence: bool,
}

impl ProximityResult {
    /// The all-null result used whenever the vehicle is inactive or unknown.
    #[must_use]
    pub fn offline() -> Self {
        Self::default()
    }
}
