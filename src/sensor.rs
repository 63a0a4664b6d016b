//! Device location source, modelled as a channel of fix events so the
//! sampling loops never depend on a concrete sensor API.

use tokio::sync::mpsc;

use crate::models::PositionFix;

/// One delivery from the location sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum FixEvent {
    Fix(PositionFix),
    /// No fix arrived within the configured window. Non-fatal; the last
    /// known position stays in use.
    Timeout,
    /// The sensor reported an error mid-watch (signal loss, revoked
    /// permission). Non-fatal for an already-running session.
    Failed(String),
}

/// Sink half handed to the platform sensor glue.
pub type FixSender = mpsc::Sender<FixEvent>;

/// Stream half consumed by the reporter and observer loops.
pub type FixStream = mpsc::Receiver<FixEvent>;

/// Default buffer for fix channels; device sensors emit about 1 Hz so this
/// never backs up in practice.
#[must_use]
pub fn fix_channel() -> (FixSender, FixStream) {
    mpsc::channel(16)
}
