//! Live vehicle position relay: a reporter samples and throttles its own
//! GPS fixes into a backing store, observers reconcile the change feed into
//! a smoothly animated marker and proximity alerts.

pub mod config;
pub mod error;
pub mod geo;
pub mod interpolate;
pub mod models;
pub mod observer;
pub mod presenter;
pub mod proximity;
pub mod reporter;
pub mod sensor;
pub mod store;
pub mod throttle;

pub use config::Config;
pub use error::{Error, Result};
pub use geo::{Coordinate, bearing_degrees, distance_km};
pub use interpolate::{Interpolator, RenderedPosition};
pub use models::{PositionFix, ProximityResult, ReportedPosition, Waypoint};
pub use observer::ObserverSession;
pub use presenter::{
    ObserverPresenter, ProximityView, ReporterPresenter, SyncStatus, TelemetryView, VehicleView,
};
pub use reporter::{PublishOutcome, Reporter};
pub use sensor::{FixEvent, FixSender, FixStream, fix_channel};
pub use store::{
    ChannelStatus, FeedEvent, MemoryStore, PositionChange, PositionFeed, PositionStore,
};
pub use throttle::{ThrottlePolicy, ThrottleState, should_publish};
