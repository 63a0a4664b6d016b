//! Marker motion smoothing: animates between sparse fixes over a fixed
//! duration. All timing is driven by injected instants so the state machine
//! tests without a runtime.

use std::time::{Duration, Instant};

use crate::geo::{Coordinate, bearing_degrees};
use crate::models::ReportedPosition;

/// A per-frame render sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPosition {
    pub coordinate: Coordinate,
    pub heading_degrees: f64,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: Coordinate,
    to: Coordinate,
    started_at: Instant,
}

/// Two-state machine: idle (no live position) or animating toward the most
/// recent fix. Owned by the observer; reset on every arrival.
#[derive(Debug)]
pub struct Interpolator {
    duration: Duration,
    segment: Option<Segment>,
    /// Last accepted target, retained across deactivation for heading
    /// continuity on reactivation.
    last_target: Option<Coordinate>,
    heading: f64,
    online: bool,
}

impl Interpolator {
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration, segment: None, last_target: None, heading: 0.0, online: false }
    }

    /// Accept a new report. Inactive reports stop animation and mark the
    /// vehicle offline; the last coordinate and heading are retained.
    ///
    /// Reactivation (and the very first report) snaps straight to the new
    /// position instead of animating from a stale point.
    pub fn retarget(&mut self, report: &ReportedPosition, now: Instant) {
        if !report.is_live() {
            self.set_offline();
            return;
        }

        let to = report.coordinate;
        let from = if self.online {
            self.rendered_coordinate(now).unwrap_or(to)
        } else {
            to
        };

        // Heading precedence: explicit bearing, then computed from the last
        // accepted position, then whatever we had. A repeated position never
        // resets heading, even when it lands mid-animation.
        self.heading = report.bearing.unwrap_or_else(|| match self.last_target {
            Some(previous) if previous != to => bearing_degrees(previous, to),
            _ => self.heading,
        });

        self.segment = Some(Segment { from, to, started_at: now });
        self.last_target = Some(to);
        self.online = true;
    }

    /// Stop animating and mark the vehicle offline. Coordinate and heading
    /// stay available for a later reactivation.
    pub fn set_offline(&mut self) {
        self.segment = None;
        self.online = false;
    }

    /// Where the marker sits at `now`, or `None` while offline/idle.
    #[must_use]
    pub fn rendered_coordinate(&self, now: Instant) -> Option<Coordinate> {
        let segment = self.segment?;
        let progress = self.progress(&segment, now);
        Some(Coordinate::new(
            segment.from.latitude + (segment.to.latitude - segment.from.latitude) * progress,
            segment.from.longitude + (segment.to.longitude - segment.from.longitude) * progress,
        ))
    }

    /// Coordinate plus heading for the presentation layer.
    #[must_use]
    pub fn sample(&self, now: Instant) -> Option<RenderedPosition> {
        if !self.online {
            return None;
        }
        self.rendered_coordinate(now)
            .map(|coordinate| RenderedPosition { coordinate, heading_degrees: self.heading })
    }

    /// True once the current segment has fully played out (or none exists);
    /// the frame loop stops ticking at that point.
    #[must_use]
    pub fn is_settled(&self, now: Instant) -> bool {
        self.segment.as_ref().is_none_or(|segment| {
            segment.from == segment.to || self.progress(segment, now) >= 1.0
        })
    }

    #[must_use]
    pub const fn heading(&self) -> f64 {
        self.heading
    }

    #[must_use]
    pub const fn online(&self) -> bool {
        self.online
    }

    /// Last accepted position, surviving deactivation.
    #[must_use]
    pub const fn last_known(&self) -> Option<Coordinate> {
        self.last_target
    }

    fn progress(&self, segment: &Segment, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(segment.started_at).as_secs_f64();
        (elapsed / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    const DURATION: Duration = Duration::from_millis(800);

    fn report(coordinate: Coordinate, bearing: Option<f64>, is_active: bool) -> ReportedPosition {
        ReportedPosition {
            reporter_id: "driver-1".to_string(),
            coordinate,
            bearing,
            is_active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn first_report_snaps_without_animation() {
        let mut interpolator = Interpolator::new(DURATION);
        let p1 = Coordinate::new(12.97, 77.59);
        let t0 = Instant::now();

        interpolator.retarget(&report(p1, None, true), t0);

        assert_eq!(interpolator.sample(t0).unwrap().coordinate, p1);
        assert!(interpolator.is_settled(t0 + Duration::from_millis(1)));
    }

    #[test]
    fn animation_endpoints_and_midpoint() {
        let mut interpolator = Interpolator::new(DURATION);
        let p1 = Coordinate::new(10.0, 20.0);
        let p2 = Coordinate::new(11.0, 21.0);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);

        interpolator.retarget(&report(p1, None, true), t0);
        interpolator.retarget(&report(p2, None, true), t1);

        assert_eq!(interpolator.sample(t1).unwrap().coordinate, p1);
        assert_eq!(interpolator.sample(t1 + DURATION).unwrap().coordinate, p2);

        let mid = interpolator.sample(t1 + DURATION / 2).unwrap().coordinate;
        assert!(mid.latitude > p1.latitude && mid.latitude < p2.latitude);
        assert!(mid.longitude > p1.longitude && mid.longitude < p2.longitude);

        // Samples past the end clamp to the target.
        assert_eq!(interpolator.sample(t1 + DURATION * 3).unwrap().coordinate, p2);
    }

    #[test]
    fn retarget_mid_animation_starts_from_rendered_point() {
        let mut interpolator = Interpolator::new(DURATION);
        let p1 = Coordinate::new(0.0, 0.0);
        let p2 = Coordinate::new(1.0, 0.0);
        let p3 = Coordinate::new(1.0, 1.0);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);
        let t2 = t1 + DURATION / 2;

        interpolator.retarget(&report(p1, None, true), t0);
        interpolator.retarget(&report(p2, None, true), t1);
        interpolator.retarget(&report(p3, None, true), t2);

        // The new segment departs from the halfway point, not from p2.
        let start = interpolator.sample(t2).unwrap().coordinate;
        assert!((start.latitude - 0.5).abs() < 1e-9, "got {}", start.latitude);
    }

    #[test]
    fn explicit_bearing_wins_over_computed() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();

        interpolator.retarget(&report(Coordinate::new(0.0, 0.0), None, true), t0);
        interpolator.retarget(
            &report(Coordinate::new(1.0, 0.0), Some(123.0), true),
            t0 + Duration::from_secs(1),
        );

        assert!((interpolator.heading() - 123.0).abs() < f64::EPSILON);
    }

    #[test]
    fn movement_without_bearing_computes_heading() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();

        interpolator.retarget(&report(Coordinate::new(0.0, 0.0), None, true), t0);
        interpolator.retarget(
            &report(Coordinate::new(1.0, 0.0), None, true),
            t0 + Duration::from_secs(1),
        );

        // Due north.
        assert!(interpolator.heading().abs() < 1e-6);
    }

    #[test]
    fn identical_update_keeps_previous_heading() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();
        let spot = Coordinate::new(1.0, 0.0);

        interpolator.retarget(&report(Coordinate::new(0.0, 0.0), None, true), t0);
        interpolator.retarget(&report(spot, None, true), t0 + Duration::from_secs(1));
        let heading = interpolator.heading();

        interpolator.retarget(&report(spot, None, true), t0 + Duration::from_secs(10));
        assert!((interpolator.heading() - heading).abs() < f64::EPSILON);
    }

    #[test]
    fn mid_animation_duplicate_keeps_heading() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();
        let p1 = Coordinate::new(10.0, 10.0);
        let p2 = Coordinate::new(11.0, 11.0);

        interpolator.retarget(&report(p1, None, true), t0);
        interpolator.retarget(&report(p2, None, true), t0 + Duration::from_secs(1));
        let heading = interpolator.heading();

        // The same target arriving again halfway through the animation must
        // not recompute the bearing from the rendered midpoint.
        interpolator
            .retarget(&report(p2, None, true), t0 + Duration::from_secs(1) + DURATION / 2);
        assert!((interpolator.heading() - heading).abs() < f64::EPSILON);
    }

    #[test]
    fn inactive_report_goes_offline_but_retains_state() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();
        let spot = Coordinate::new(1.0, 2.0);

        interpolator.retarget(&report(spot, Some(90.0), true), t0);
        interpolator.retarget(&report(spot, None, false), t0 + Duration::from_secs(1));

        assert!(!interpolator.online());
        assert_eq!(interpolator.sample(t0 + Duration::from_secs(2)), None);
        assert_eq!(interpolator.last_known(), Some(spot));
        assert!((interpolator.heading() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reactivation_snaps() {
        let mut interpolator = Interpolator::new(DURATION);
        let t0 = Instant::now();
        let before = Coordinate::new(0.0, 0.0);
        let after = Coordinate::new(1.0, 0.0);

        interpolator.retarget(&report(before, Some(90.0), true), t0);
        interpolator.retarget(&report(before, None, false), t0 + Duration::from_secs(1));
        interpolator.retarget(&report(after, None, true), t0 + Duration::from_secs(60));

        // No animation from the stale point: the marker is already there.
        let rendered = interpolator.sample(t0 + Duration::from_secs(60)).unwrap();
        assert_eq!(rendered.coordinate, after);
        // Heading continuity still uses the retained coordinate (due north).
        assert!(rendered.heading_degrees.abs() < 1e-6);
    }
}
