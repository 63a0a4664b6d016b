use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain error codes for the position relay pipeline. Every variant is
/// recovered at the component boundary; nothing here is process-fatal.
#[derive(Error, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// Device location source absent or permission denied. Fatal for the
    /// tracking feature, not for the surrounding application.
    #[error("code: sensor_unavailable, description: {0}")]
    SensorUnavailable(String),

    /// A single fix failed to arrive in time; sampling continues on the
    /// last known position.
    #[error("code: sensor_timeout, description: {0}")]
    SensorTimeout(String),

    /// The backing-store write failed. Throttle state is left untouched so
    /// the next qualifying fix retries naturally.
    #[error("code: publish_failure, description: {0}")]
    PublishFailure(String),

    /// The push-notification channel dropped; the observer keeps its last
    /// known state.
    #[error("code: channel_disconnected, description: {0}")]
    ChannelDisconnected(String),

    #[error("code: invalid_format, description: {0}")]
    InvalidFormat(String),

    #[error("code: store_error, description: {0}")]
    StoreError(String),
}

impl Error {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::SensorUnavailable(_) => "sensor_unavailable",
            Self::SensorTimeout(_) => "sensor_timeout",
            Self::PublishFailure(_) => "publish_failure",
            Self::ChannelDisconnected(_) => "channel_disconnected",
            Self::InvalidFormat(_) => "invalid_format",
            Self::StoreError(_) => "store_error",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<Self>() {
            Some(Self::SensorUnavailable(e)) => Self::SensorUnavailable(format!("{err}: {e}")),
            Some(Self::SensorTimeout(e)) => Self::SensorTimeout(format!("{err}: {e}")),
            Some(Self::PublishFailure(e)) => Self::PublishFailure(format!("{err}: {e}")),
            Some(Self::ChannelDisconnected(e)) => {
                Self::ChannelDisconnected(format!("{err}: {e}"))
            }
            Some(Self::InvalidFormat(e)) => Self::InvalidFormat(format!("{err}: {e}")),
            Some(Self::StoreError(e)) => Self::StoreError(format!("{err}: {e}")),
            None => {
                let stack = err.chain().fold(String::new(), |cause, e| format!("{cause} -> {e}"));
                let stack = stack.trim_start_matches(" -> ").to_string();
                Self::StoreError(stack)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
