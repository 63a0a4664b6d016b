//! Presentation seam. The core pushes view records; it never pulls.

use async_trait::async_trait;

use crate::geo::Coordinate;
use crate::models::ProximityResult;

/// Marker state for the tracked vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleView {
    /// Last rendered coordinate; `None` before any position was ever known.
    pub coordinate: Option<Coordinate>,
    pub heading_degrees: f64,
    pub online: bool,
}

/// Proximity panel state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityView {
    pub nearest_waypoint_name: Option<String>,
    pub distance_km: Option<f64>,
    pub within_geofence: bool,
}

impl From<&ProximityResult> for ProximityView {
    fn from(result: &ProximityResult) -> Self {
        Self {
            nearest_waypoint_name: result
                .nearest_waypoint
                .as_ref()
                .map(|waypoint| waypoint.name.clone()),
            distance_km: result.distance_remaining_km,
            within_geofence: result.within_geofence,
        }
    }
}

/// Reporter-side sync indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Synced,
    Failed(String),
}

/// Reporter-side telemetry panel state.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryView {
    pub position: Option<Coordinate>,
    pub speed_kmh: Option<f64>,
    pub sync: SyncStatus,
    pub warning: Option<String>,
}

/// Receives reporter telemetry updates.
#[async_trait]
pub trait ReporterPresenter: Send + Sync + 'static {
    async fn telemetry(&self, view: TelemetryView);
}

/// Receives observer-side vehicle, proximity, and liveness updates.
#[async_trait]
pub trait ObserverPresenter: Send + Sync + 'static {
    async fn vehicle(&self, view: VehicleView);
    async fn proximity(&self, view: ProximityView);
    async fn live(&self, connected: bool);
}
