//! Error taxonomy for the tracking engine.
//!
//! Transport failures are retried per schedule and never surface as fatal;
//! credential failures (wrong order number or token) must *not* enter a
//! retry loop; malformed frames are dropped at the channel. Only credential
//! failures and the initial-load failure reach the presentation boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Transient network or channel failure. Always retried per the
    /// reconnect/poll schedules; visible only as a lowered transport state.
    #[error("{message}")]
    Transport { message: String },

    /// The order number does not exist on the backend.
    #[error("Order {order_no} not found")]
    NotFound { order_no: String },

    /// The access token was rejected for this order.
    #[error("Tracking link is invalid or no longer authorized")]
    Unauthorized,

    /// A response or frame that does not match the expected shape.
    #[error("Malformed payload from backend: {context}")]
    Malformed { context: String },

    /// Tracking has ended for this order: the post-completion viewing
    /// window closed, or the order reached a terminal status with no
    /// window (a canceled order, for example). No further fetches.
    #[error("Tracking for this order has ended")]
    WindowExpired,

    /// Command sent to a session that has already been torn down.
    #[error("Tracking session is closed")]
    SessionClosed,
}

impl TrackError {
    pub fn transport(message: impl Into<String>) -> Self {
        TrackError::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(context: impl Into<String>) -> Self {
        TrackError::Malformed {
            context: context.into(),
        }
    }

    /// True for the credential failures that must never be retried.
    /// A wrong order number or token retried forever would hammer the
    /// backend for nothing.
    pub fn is_terminal_credential(&self) -> bool {
        matches!(
            self,
            TrackError::NotFound { .. } | TrackError::Unauthorized
        )
    }
}
