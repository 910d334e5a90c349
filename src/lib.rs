//! order-track — client-side order status synchronization engine.
//!
//! Keeps one remote order's status visible to a viewer in near-real time
//! over an unreliable network. A WebSocket push channel is the primary
//! transport; an adaptive polling loop is the fallback; a bounded access
//! window halts updates after order completion. Status vocabulary from the
//! backend (which differs by fulfillment type and payment method) is
//! normalised onto one ordered, user-facing progress timeline.
//!
//! ```no_run
//! use order_track::{SessionConfig, SyncSession};
//!
//! # async fn demo() -> Result<(), order_track::TrackError> {
//! let config = SessionConfig::new("https://order.thesmall.app", "ORD-20260830-00017", "tok");
//! let session = SyncSession::connect(config).await?;
//! let mut updates = session.subscribe();
//! while updates.changed().await.is_ok() {
//!     let view = updates.borrow().clone();
//!     println!("{:?} via {:?}", view.snapshot.map(|s| s.status), view.transport);
//! }
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod config;
pub mod error;
pub mod expiry;
pub mod model;
pub mod poll;
pub mod push;
pub mod session;
pub mod store;
pub mod timeline;

pub use api::{ApiClient, FetchOrder};
pub use config::SessionConfig;
pub use error::TrackError;
pub use expiry::{ExpiryGuard, ExpiryTick};
pub use model::{
    FulfillmentType, OrderItem, OrderSnapshot, OrderStatus, PaymentInfo, PaymentMethod,
    PaymentState,
};
pub use session::{SessionHandle, SessionPhase, SessionView, SyncSession, TransportState};
pub use store::{MergeOutcome, OrderSnapshotStore};
pub use timeline::{
    current_step_index, progress_fraction, progress_percent, timeline_for, TimelineStep,
};

/// Initialize structured logging for binaries and examples embedding the
/// engine. Library code only emits `tracing` events and never installs a
/// subscriber on its own.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,order_track=debug"));

    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .ok();
}
