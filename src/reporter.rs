//! Reporter role: samples device fixes, throttles them, and publishes the
//! survivors to the backing store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::{Coordinate, bearing_degrees, distance_km};
use crate::models::{PositionFix, ReportedPosition};
use crate::presenter::{ReporterPresenter, SyncStatus, TelemetryView};
use crate::sensor::{FixEvent, FixStream};
use crate::store::PositionStore;
use crate::throttle::{ThrottlePolicy, ThrottleState, should_publish};

/// What became of one sampled fix.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(ReportedPosition),
    /// Neither throttle threshold was crossed.
    Skipped,
}

/// Publisher with reporter-local throttle state. Throttle bookkeeping only
/// advances on a confirmed successful write, so a failed publish retries
/// naturally on the next qualifying fix.
pub struct Reporter<S: PositionStore> {
    store: S,
    reporter_id: String,
    table: String,
    policy: ThrottlePolicy,
    throttle: ThrottleState,
    sensor_timeout: Duration,
    speed_kmh: Option<f64>,
    last_fix: Option<Coordinate>,
    sync: SyncStatus,
}

impl<S: PositionStore> Reporter<S> {
    pub fn new(store: S, reporter_id: impl Into<String>, config: &Config) -> Self {
        Self {
            store,
            reporter_id: reporter_id.into(),
            table: config.tables.position.clone(),
            policy: ThrottlePolicy::from(config),
            throttle: ThrottleState::default(),
            sensor_timeout: config.sensor_timeout,
            speed_kmh: None,
            last_fix: None,
            sync: SyncStatus::Idle,
        }
    }

    /// Evaluate one raw fix: update telemetry, then publish when the
    /// throttle lets it through.
    ///
    /// # Errors
    /// Returns [`Error::PublishFailure`] when the store write fails; the
    /// throttle state is left untouched in that case.
    pub async fn handle_fix(&mut self, fix: &PositionFix, now: Instant) -> Result<PublishOutcome> {
        self.update_speed(fix, now);
        self.last_fix = Some(fix.coordinate);

        if !should_publish(fix.coordinate, &self.throttle, now, &self.policy) {
            debug!(reporter_id = %self.reporter_id, "fix below throttle thresholds, skipping");
            return Ok(PublishOutcome::Skipped);
        }

        let record = self.publish(fix.coordinate, true, now).await?;
        Ok(PublishOutcome::Published(record))
    }

    /// Publish an inactive record immediately, bypassing the throttle, and
    /// forget throttle history.
    ///
    /// # Errors
    /// Returns [`Error::PublishFailure`] when the store write fails.
    pub async fn deactivate(&mut self) -> Result<()> {
        if let Some(coordinate) = self.throttle.last_sent_position {
            self.publish(coordinate, false, Instant::now()).await?;
        }
        self.throttle.clear();
        self.speed_kmh = None;
        info!(reporter_id = %self.reporter_id, "reporter deactivated");
        Ok(())
    }

    /// End the trip entirely: clear throttle state and delete the row, which
    /// observers receive as a delete notification.
    ///
    /// # Errors
    /// Returns [`Error::PublishFailure`] when the delete fails.
    pub async fn end_trip(&mut self) -> Result<()> {
        self.throttle.clear();
        self.speed_kmh = None;
        self.store
            .delete_position(&self.table, &self.reporter_id)
            .await
            .map_err(|err| Error::PublishFailure(err.to_string()))?;
        info!(reporter_id = %self.reporter_id, "trip ended, position row removed");
        Ok(())
    }

    /// Latest speed estimate in km/h, for the telemetry panel.
    #[must_use]
    pub const fn speed_kmh(&self) -> Option<f64> {
        self.speed_kmh
    }

    /// Drive the reporter from a sensor fix stream until the stream closes,
    /// then deactivate. A watchdog fires when no event arrives within the
    /// configured sensor timeout; faults and timeouts are surfaced as
    /// warnings and sampling continues on the last known position.
    ///
    /// # Errors
    /// Returns [`Error::SensorUnavailable`] when the stream closes before
    /// delivering a single fix, otherwise the final deactivation error, if
    /// any; per-fix publish failures are reported through the presenter
    /// instead.
    pub async fn run<P: ReporterPresenter>(
        mut self, mut fixes: FixStream, presenter: Arc<P>,
    ) -> Result<()> {
        let mut got_fix = false;
        loop {
            let event = match timeout(self.sensor_timeout, fixes.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => FixEvent::Timeout,
            };
            match event {
                FixEvent::Fix(fix) => {
                    got_fix = true;
                    match self.handle_fix(&fix, Instant::now()).await {
                        Ok(PublishOutcome::Published(_)) => self.sync = SyncStatus::Synced,
                        Ok(PublishOutcome::Skipped) => {}
                        Err(err) => {
                            warn!(code = err.code(), "publish failed, will retry on next fix");
                            self.sync = SyncStatus::Failed(err.description());
                        }
                    }
                    presenter.telemetry(self.telemetry(None)).await;
                }
                FixEvent::Timeout => {
                    let err = Error::SensorTimeout(
                        "no fix within the configured window, holding last known position"
                            .to_string(),
                    );
                    warn!(reporter_id = %self.reporter_id, code = err.code(), "fix timed out");
                    presenter.telemetry(self.telemetry(Some(err.description()))).await;
                }
                FixEvent::Failed(message) => {
                    warn!(reporter_id = %self.reporter_id, %message, "sensor fault");
                    presenter.telemetry(self.telemetry(Some(message))).await;
                }
            }
        }
        if !got_fix {
            return Err(Error::SensorUnavailable(
                "location stream closed before delivering a fix".to_string(),
            ));
        }
        self.deactivate().await
    }

    fn telemetry(&self, warning: Option<String>) -> TelemetryView {
        TelemetryView {
            position: self.last_fix,
            speed_kmh: self.speed_kmh,
            sync: self.sync.clone(),
            warning,
        }
    }

    // Prefer the sensor's own speed; fall back to displacement over time
    // since the last successful publish.
    fn update_speed(&mut self, fix: &PositionFix, now: Instant) {
        if let Some(kmh) = fix.speed_kmh() {
            self.speed_kmh = Some(kmh);
        } else if let (Some(last_position), Some(last_at)) =
            (self.throttle.last_sent_position, self.throttle.last_sent_at)
        {
            let elapsed = now.duration_since(last_at).as_secs_f64();
            if elapsed > 0.0 {
                self.speed_kmh =
                    Some(distance_km(last_position, fix.coordinate) / elapsed * 3_600.0);
            }
        }
    }

    async fn publish(
        &mut self, coordinate: Coordinate, is_active: bool, now: Instant,
    ) -> Result<ReportedPosition> {
        let bearing = self
            .throttle
            .last_sent_position
            .filter(|last| is_active && *last != coordinate)
            .map(|last| bearing_degrees(last, coordinate));

        let record = ReportedPosition {
            reporter_id: self.reporter_id.clone(),
            coordinate,
            bearing,
            is_active,
            updated_at: Utc::now(),
        };

        self.store
            .upsert_position(&self.table, &record)
            .await
            .map_err(|err| Error::PublishFailure(err.to_string()))?;

        // Only after the store confirmed the write.
        if is_active {
            self.throttle.mark_sent(coordinate, now);
        }
        debug!(reporter_id = %self.reporter_id, is_active, ?bearing, "position published");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

    use super::*;
    use crate::models::Waypoint;
    use crate::sensor::fix_channel;
    use crate::store::{MemoryStore, PositionFeed};

    struct TelemetrySink {
        events: UnboundedSender<TelemetryView>,
    }

    #[async_trait]
    impl ReporterPresenter for TelemetrySink {
        async fn telemetry(&self, view: TelemetryView) {
            let _ = self.events.send(view);
        }
    }

    fn config() -> Config {
        Config::from_env()
    }

    fn fix(latitude: f64, longitude: f64) -> PositionFix {
        PositionFix::new(Coordinate::new(latitude, longitude), None)
    }

    #[tokio::test]
    async fn first_fix_publishes_without_bearing() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store, "driver-1", &config());

        let outcome = reporter.handle_fix(&fix(12.9716, 77.5946), Instant::now()).await.unwrap();
        let PublishOutcome::Published(record) = outcome else {
            panic!("first fix must publish");
        };
        assert_eq!(record.bearing, None);
        assert!(record.is_active);
    }

    #[tokio::test]
    async fn sub_threshold_fix_is_skipped() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store, "driver-1", &config());
        let start = Instant::now();

        reporter.handle_fix(&fix(12.9716, 77.5946), start).await.unwrap();
        let outcome = reporter
            .handle_fix(&fix(12.9716, 77.5946), start + Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Skipped);
    }

    #[tokio::test]
    async fn moving_fix_carries_a_bearing() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store, "driver-1", &config());
        let start = Instant::now();

        reporter.handle_fix(&fix(12.9716, 77.5946), start).await.unwrap();
        // ~110 m north: past the distance floor, and due north of the last
        // published point.
        let outcome = reporter
            .handle_fix(&fix(12.9726, 77.5946), start + Duration::from_millis(200))
            .await
            .unwrap();
        let PublishOutcome::Published(record) = outcome else {
            panic!("displacement must publish");
        };
        assert!(record.bearing.unwrap().abs() < 1e-6);
    }

    #[tokio::test]
    async fn derived_speed_when_sensor_gives_none() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store, "driver-1", &config());
        let start = Instant::now();

        reporter.handle_fix(&fix(12.9716, 77.5946), start).await.unwrap();
        reporter
            .handle_fix(&fix(12.9726, 77.5946), start + Duration::from_secs(10))
            .await
            .unwrap();

        // ~110 m in 10 s is roughly 40 km/h.
        let speed = reporter.speed_kmh().unwrap();
        assert!((speed - 40.0).abs() < 5.0, "got {speed}");
    }

    #[tokio::test]
    async fn sensor_speed_is_preferred() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store, "driver-1", &config());

        let fix = PositionFix::new(Coordinate::new(12.9716, 77.5946), Some(10.0));
        reporter.handle_fix(&fix, Instant::now()).await.unwrap();
        assert!((reporter.speed_kmh().unwrap() - 36.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deactivation_bypasses_throttle_and_clears_state() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store.clone(), "driver-1", &config());
        let start = Instant::now();

        reporter.handle_fix(&fix(12.9716, 77.5946), start).await.unwrap();
        reporter.deactivate().await.unwrap();

        let row = store.select_position("bus_status").await.unwrap().unwrap();
        assert!(!row.is_active);

        // Cleared throttle means the next fix publishes unconditionally.
        let outcome = reporter
            .handle_fix(&fix(12.9716, 77.5946), start + Duration::from_millis(1))
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));
    }

    #[tokio::test]
    async fn ending_a_trip_deletes_the_row() {
        let store = MemoryStore::new();
        let mut reporter = Reporter::new(store.clone(), "driver-1", &config());

        reporter.handle_fix(&fix(12.9716, 77.5946), Instant::now()).await.unwrap();
        reporter.end_trip().await.unwrap();

        assert_eq!(store.select_position("bus_status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_closing_before_any_fix_is_sensor_unavailable() {
        let store = MemoryStore::new();
        let reporter = Reporter::new(store.clone(), "driver-1", &config());
        let (events, _telemetry) = unbounded_channel();

        let (fixes, stream) = fix_channel();
        drop(fixes);

        let err = reporter.run(stream, Arc::new(TelemetrySink { events })).await.unwrap_err();
        assert_eq!(err.code(), "sensor_unavailable");
        // Nothing was ever published, so nothing was deactivated either.
        assert_eq!(store.select_position("bus_status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn watchdog_fires_when_no_fix_arrives_in_time() {
        let store = MemoryStore::new();
        let mut config = config();
        config.sensor_timeout = Duration::from_millis(20);
        let reporter = Reporter::new(store, "driver-1", &config);

        let (fixes, stream) = fix_channel();
        let (events, mut telemetry) = unbounded_channel();
        let task = tokio::spawn(reporter.run(stream, Arc::new(TelemetrySink { events })));

        let view = tokio::time::timeout(Duration::from_secs(5), telemetry.recv())
            .await
            .expect("no telemetry")
            .expect("telemetry channel closed");
        assert!(view.warning.unwrap().contains("sensor_timeout"));

        // A late fix still resumes normal sampling.
        fixes.send(FixEvent::Fix(fix(12.9716, 77.5946))).await.unwrap();
        drop(fixes);
        task.await.unwrap().unwrap();
    }

    /// Store that rejects the first upsert, then delegates to memory.
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        failed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PositionStore for FlakyStore {
        async fn upsert_position(
            &self, table: &str, record: &ReportedPosition,
        ) -> anyhow::Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(anyhow!("connection reset"));
            }
            self.inner.upsert_position(table, record).await
        }

        async fn select_position(&self, table: &str) -> anyhow::Result<Option<ReportedPosition>> {
            self.inner.select_position(table).await
        }

        async fn select_waypoints(&self, table: &str) -> anyhow::Result<Vec<Waypoint>> {
            self.inner.select_waypoints(table).await
        }

        async fn delete_position(&self, table: &str, reporter_id: &str) -> anyhow::Result<()> {
            self.inner.delete_position(table, reporter_id).await
        }

        async fn subscribe(&self, table: &str) -> anyhow::Result<PositionFeed> {
            self.inner.subscribe(table).await
        }
    }

    #[tokio::test]
    async fn failed_publish_leaves_throttle_untouched() {
        let store =
            FlakyStore { inner: MemoryStore::new(), failed: Arc::new(AtomicBool::new(false)) };
        let mut reporter = Reporter::new(store, "driver-1", &config());
        let start = Instant::now();

        let err = reporter.handle_fix(&fix(12.9716, 77.5946), start).await.unwrap_err();
        assert_eq!(err.code(), "publish_failure");

        // Throttle state never advanced, so the identical fix is still
        // treated as the first one and retries immediately.
        let outcome = reporter
            .handle_fix(&fix(12.9716, 77.5946), start + Duration::from_millis(1))
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));
    }
}
