//! Backing-store abstraction: an opaque key-value table with upsert
//! semantics plus a push-notification change feed.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{ReportedPosition, Waypoint};

/// Store operations the relay core requires. Implementations map these onto
/// whatever query language the real backend speaks.
#[async_trait]
pub trait PositionStore: Send + Sync + Clone + 'static {
    /// Upsert keyed on `reporter_id`: at most one live row per reporter.
    async fn upsert_position(&self, table: &str, record: &ReportedPosition) -> Result<()>;

    /// The current row, if any. The data model assumes at most one active
    /// reporter.
    async fn select_position(&self, table: &str) -> Result<Option<ReportedPosition>>;

    /// All waypoints, ordered by `order_index` ascending.
    async fn select_waypoints(&self, table: &str) -> Result<Vec<Waypoint>>;

    /// Remove the reporter's row. A no-op when the row does not exist.
    async fn delete_position(&self, table: &str, reporter_id: &str) -> Result<()>;

    /// Open a change feed delivering every insert/update/delete on the
    /// position table, plus channel status transitions.
    async fn subscribe(&self, table: &str) -> Result<PositionFeed>;
}

/// One notification from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(PositionChange),
    Status(ChannelStatus),
}

/// A row-level change. Each change fully replaces prior state; fields are
/// never merged.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Upserted(ReportedPosition),
    Deleted { reporter_id: String },
}

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Error,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

/// A live subscription. Dropping it unsubscribes.
///
/// The feed is unbounded: a slow consumer buffers instead of losing the
/// latest write, so the final state always arrives.
pub struct PositionFeed {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    guard: Option<Box<dyn FnOnce() + Send>>,
}

impl PositionFeed {
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedReceiver<FeedEvent>, unsubscribe: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self { events, guard: Some(unsubscribe) }
    }

    /// Next event, or `None` once the feed is torn down.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Idempotent; safe to call before any event arrived. Events already
    /// buffered are discarded along with the subscription.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.guard.take() {
            release();
        }
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }
}

impl Drop for PositionFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// In-process store used by tests and demos. Waypoints are seeded once;
/// position changes fan out to every live subscriber in arrival order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    positions: DashMap<String, ReportedPosition>,
    waypoints: DashMap<String, Waypoint>,
    subscribers: DashMap<Uuid, mpsc::UnboundedSender<FeedEvent>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_waypoints(&self, waypoints: impl IntoIterator<Item = Waypoint>) {
        for waypoint in waypoints {
            self.inner.waypoints.insert(waypoint.id.clone(), waypoint);
        }
    }

    fn broadcast(&self, change: &PositionChange) {
        let mut dead = Vec::new();
        for entry in &self.inner.subscribers {
            if entry.value().send(FeedEvent::Change(change.clone())).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.inner.subscribers.remove(&id);
        }
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn upsert_position(&self, _table: &str, record: &ReportedPosition) -> Result<()> {
        self.inner.positions.insert(record.reporter_id.clone(), record.clone());
        self.broadcast(&PositionChange::Upserted(record.clone()));
        Ok(())
    }

    async fn select_position(&self, _table: &str) -> Result<Option<ReportedPosition>> {
        Ok(self.inner.positions.iter().next().map(|entry| entry.value().clone()))
    }

    async fn select_waypoints(&self, _table: &str) -> Result<Vec<Waypoint>> {
        let mut waypoints: Vec<Waypoint> =
            self.inner.waypoints.iter().map(|entry| entry.value().clone()).collect();
        waypoints.sort_by_key(|waypoint| waypoint.order_index);
        Ok(waypoints)
    }

    async fn delete_position(&self, _table: &str, reporter_id: &str) -> Result<()> {
        if self.inner.positions.remove(reporter_id).is_some() {
            self.broadcast(&PositionChange::Deleted { reporter_id: reporter_id.to_string() });
        }
        Ok(())
    }

    async fn subscribe(&self, _table: &str) -> Result<PositionFeed> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        // Status lands before any change so the live flag flips first.
        let _ = sender.send(FeedEvent::Status(ChannelStatus::Subscribed));
        self.inner.subscribers.insert(id, sender);

        let inner = Arc::clone(&self.inner);
        let release = Box::new(move || {
            inner.subscribers.remove(&id);
        });
        Ok(PositionFeed::new(receiver, release))
    }
}
