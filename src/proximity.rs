//! Geofence and nearest-waypoint evaluation. Stateless: everything is
//! recomputed from the latest inputs.

use crate::geo::{Coordinate, distance_km};
use crate::models::{ProximityResult, ReportedPosition, Waypoint};

/// The waypoint closest to `position` and its distance in km. Ties keep the
/// first waypoint in the given ordering; an empty set yields `None`.
#[must_use]
pub fn nearest_waypoint(position: Coordinate, waypoints: &[Waypoint]) -> Option<(&Waypoint, f64)> {
    let mut best: Option<(&Waypoint, f64)> = None;
    for waypoint in waypoints {
        let distance = distance_km(position, waypoint.coordinate);
        if best.is_none_or(|(_, min)| distance < min) {
            best = Some((waypoint, distance));
        }
    }
    best
}

/// True when any waypoint lies within `radius_km` of `position`
/// (boundary-inclusive). Short-circuits on the first match.
#[must_use]
pub fn is_within_geofence(position: Coordinate, waypoints: &[Waypoint], radius_km: f64) -> bool {
    waypoints.iter().any(|waypoint| distance_km(position, waypoint.coordinate) <= radius_km)
}

/// Full proximity state for the latest inputs. An inactive or missing
/// report yields the all-null result, never a silent zero or infinity.
#[must_use]
pub fn evaluate(
    report: Option<&ReportedPosition>, waypoints: &[Waypoint], observer: Option<Coordinate>,
    radius_km: f64,
) -> ProximityResult {
    let Some(report) = report.filter(|report| report.is_live()) else {
        return ProximityResult::offline();
    };

    let position = report.coordinate;
    let nearest = nearest_waypoint(position, waypoints);
    let distance_remaining = observer.map(|own| distance_km(position, own));

    // A geofence hit on either a waypoint or the observer raises the alert.
    let within_geofence = is_within_geofence(position, waypoints, radius_km)
        || distance_remaining.is_some_and(|distance| distance <= radius_km);

    ProximityResult {
        nearest_waypoint: nearest.map(|(waypoint, _)| waypoint.clone()),
        nearest_distance_km: nearest.map(|(_, distance)| distance),
        distance_remaining_km: distance_remaining,
        within_geofence,
    }
}
