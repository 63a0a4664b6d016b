//! Observer role: reconciles the store's change feed into a single current
//! position, drives the marker animation, and recomputes proximity on every
//! input change.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::interpolate::Interpolator;
use crate::models::{ReportedPosition, Waypoint};
use crate::presenter::{ObserverPresenter, ProximityView, VehicleView};
use crate::proximity;
use crate::sensor::{FixEvent, FixStream};
use crate::store::{ChannelStatus, FeedEvent, PositionChange, PositionFeed, PositionStore};

type AnimSlot = Arc<StdMutex<Option<JoinHandle<()>>>>;

/// A running observer. Shutting down aborts the reconcile loop and any
/// in-flight animation; both are idempotent and safe before first use.
pub struct ObserverSession {
    reconcile: Option<JoinHandle<()>>,
    anim_task: AnimSlot,
}

impl ObserverSession {
    /// Start an observer against `store`, pushing views into `presenter`.
    /// `own_fixes` optionally tracks the observer's own location for the
    /// distance-remaining display.
    ///
    /// # Errors
    /// Fails when the waypoint load, the snapshot fetch, or the feed
    /// subscription fails. Everything after startup is recovered in place.
    pub async fn start<S: PositionStore, P: ObserverPresenter>(
        store: S, presenter: Arc<P>, config: Config, own_fixes: Option<FixStream>,
    ) -> Result<Self> {
        let waypoints = store
            .select_waypoints(&config.tables.waypoints)
            .await
            .map_err(|err| Error::StoreError(err.to_string()))?;
        info!(waypoints = waypoints.len(), "observer session starting");

        let snapshot = store
            .select_position(&config.tables.position)
            .await
            .map_err(|err| Error::StoreError(err.to_string()))?;

        let feed = store
            .subscribe(&config.tables.position)
            .await
            .map_err(|err| Error::ChannelDisconnected(err.to_string()))?;

        let anim_task: AnimSlot = Arc::default();
        let mut reconciler = Reconciler {
            presenter,
            waypoints,
            geofence_radius_km: config.geofence_radius_km,
            interpolator: Arc::new(Mutex::new(Interpolator::new(config.animation_duration))),
            frame_interval: config.frame_interval,
            anim_task: Arc::clone(&anim_task),
            current: None,
            own_position: None,
            live: false,
        };

        if let Some(row) = snapshot {
            reconciler.apply_report(row, Instant::now()).await;
        }

        // An absent own-location stream is modelled as an already-closed
        // channel so the select loop disables that branch on first poll.
        let own_fixes = own_fixes.unwrap_or_else(|| mpsc::channel(1).1);

        let reconcile = tokio::spawn(reconciler.run(feed, own_fixes));
        Ok(Self { reconcile: Some(reconcile), anim_task })
    }

    /// Tear the session down. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.reconcile.take() {
            handle.abort();
        }
        let mut slot = self.anim_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for ObserverSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Reconciler<P: ObserverPresenter> {
    presenter: Arc<P>,
    waypoints: Vec<Waypoint>,
    geofence_radius_km: f64,
    interpolator: Arc<Mutex<Interpolator>>,
    frame_interval: std::time::Duration,
    anim_task: AnimSlot,
    current: Option<ReportedPosition>,
    own_position: Option<Coordinate>,
    live: bool,
}

impl<P: ObserverPresenter> Reconciler<P> {
    async fn run(mut self, mut feed: PositionFeed, mut own_fixes: FixStream) {
        let mut own_open = true;
        loop {
            tokio::select! {
                event = feed.next() => match event {
                    Some(FeedEvent::Change(change)) => self.apply_change(change).await,
                    Some(FeedEvent::Status(status)) => self.apply_status(status).await,
                    None => {
                        self.apply_status(ChannelStatus::Closed).await;
                        break;
                    }
                },
                fix = own_fixes.recv(), if own_open => match fix {
                    Some(FixEvent::Fix(fix)) => {
                        self.own_position = Some(fix.coordinate);
                        self.push_proximity().await;
                    }
                    Some(FixEvent::Timeout) => {
                        warn!("own-location fix timed out, keeping last known");
                    }
                    Some(FixEvent::Failed(message)) => {
                        warn!(%message, "own-location sensor fault");
                    }
                    None => own_open = false,
                },
            }
        }
    }

    async fn apply_change(&mut self, change: PositionChange) {
        match change {
            PositionChange::Upserted(report) => self.apply_report(report, Instant::now()).await,
            PositionChange::Deleted { reporter_id } => {
                debug!(%reporter_id, "position row deleted");
                self.current = None;
                self.go_offline().await;
            }
        }
    }

    // Each accepted record fully replaces the previous one and is delivered
    // to both the interpolator and the proximity engine.
    async fn apply_report(&mut self, report: ReportedPosition, now: Instant) {
        self.current = Some(report.clone());
        if report.is_live() {
            self.interpolator.lock().await.retarget(&report, now);
            self.restart_animation();
            self.push_proximity().await;
        } else {
            self.go_offline().await;
        }
    }

    async fn go_offline(&mut self) {
        self.cancel_animation();
        let (last_known, heading) = {
            let mut interpolator = self.interpolator.lock().await;
            interpolator.set_offline();
            (interpolator.last_known(), interpolator.heading())
        };
        self.presenter
            .vehicle(VehicleView { coordinate: last_known, heading_degrees: heading, online: false })
            .await;
        self.push_proximity().await;
    }

    async fn apply_status(&mut self, status: ChannelStatus) {
        let connected = status.is_connected();
        if connected == self.live {
            return;
        }
        self.live = connected;
        if connected {
            info!("position feed connected");
        } else {
            warn!(?status, "position feed dropped, keeping last known state");
        }
        self.presenter.live(connected).await;
    }

    async fn push_proximity(&self) {
        let result = proximity::evaluate(
            self.current.as_ref(),
            &self.waypoints,
            self.own_position,
            self.geofence_radius_km,
        );
        self.presenter.proximity(ProximityView::from(&result)).await;
    }

    // Always cancels the previous frame loop before scheduling the next; no
    // two loops ever run for the same tracked entity.
    fn restart_animation(&self) {
        let interpolator = Arc::clone(&self.interpolator);
        let presenter = Arc::clone(&self.presenter);
        let frame_interval = self.frame_interval;

        let task = tokio::spawn(async move {
            let mut frames = tokio::time::interval(frame_interval);
            loop {
                frames.tick().await;
                let now = Instant::now();
                let (rendered, settled) = {
                    let interpolator = interpolator.lock().await;
                    (interpolator.sample(now), interpolator.is_settled(now))
                };
                if let Some(rendered) = rendered {
                    presenter
                        .vehicle(VehicleView {
                            coordinate: Some(rendered.coordinate),
                            heading_degrees: rendered.heading_degrees,
                            online: true,
                        })
                        .await;
                }
                if settled {
                    break;
                }
            }
        });

        let mut slot = self.anim_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    fn cancel_animation(&self) {
        let mut slot = self.anim_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}
