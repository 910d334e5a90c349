//! Post-completion access window.
//!
//! Completed, delivered and picked-up orders stay viewable for a fixed
//! window after `completed_at`; canceled orders are terminal with no
//! countdown. The consumer ticks the guard once per second. At exactly one
//! second remaining the guard asks for a single final refetch, to capture
//! any last-moment correction, then expires permanently.
//!
//! All time arrives as explicit `now` arguments so tests control the clock.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::model::OrderSnapshot;

/// Shared expired marker. The poll loop checks this before every fetch
/// without reaching into the session.
#[derive(Debug, Clone, Default)]
pub struct ExpiryFlag(Arc<AtomicBool>);

impl ExpiryFlag {
    pub fn is_expired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn mark_expired(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// What the session should do after a countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryTick {
    /// No deadline armed; nothing to do.
    Idle,
    /// Seconds remaining, for display.
    Countdown(i64),
    /// One second left: perform the single final refetch.
    FinalRefetch,
    /// Window closed; halt updates, keep the last snapshot for display.
    Expired,
}

/// Countdown guard for one tracking session.
#[derive(Debug)]
pub struct ExpiryGuard {
    window: chrono::Duration,
    deadline: Option<DateTime<Utc>>,
    final_refetch_fired: bool,
    flag: ExpiryFlag,
}

impl ExpiryGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            deadline: None,
            final_refetch_fired: false,
            flag: ExpiryFlag::default(),
        }
    }

    /// Clone of the shared expired marker, for the poll loop.
    pub fn flag(&self) -> ExpiryFlag {
        self.flag.clone()
    }

    /// Arm the deadline once the snapshot reaches a terminal success
    /// status with a `completed_at`. Later snapshots never re-arm or move
    /// an existing deadline.
    pub fn arm(&mut self, snapshot: &OrderSnapshot) {
        if self.deadline.is_some() || !snapshot.status.is_terminal_success() {
            return;
        }
        if let Some(completed_at) = snapshot.completed_at {
            let deadline = completed_at + self.window;
            info!(
                order_no = %snapshot.order_no,
                deadline = %deadline.to_rfc3339(),
                "access window armed"
            );
            self.deadline = Some(deadline);
        }
    }

    /// Seconds remaining in the access window, or `None` when no countdown
    /// applies (in-progress or canceled orders). Ceiling-rounded, floored
    /// at zero.
    pub fn seconds_remaining(&self, snapshot: &OrderSnapshot, now: DateTime<Utc>) -> Option<i64> {
        if !snapshot.status.is_terminal_success() {
            return None;
        }
        let completed_at = snapshot.completed_at?;
        let remaining_ms = (completed_at + self.window - now).num_milliseconds();
        Some(ceil_seconds(remaining_ms).max(0))
    }

    /// Advance the countdown by one observed tick.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> ExpiryTick {
        if self.flag.is_expired() {
            return ExpiryTick::Expired;
        }
        let Some(deadline) = self.deadline else {
            return ExpiryTick::Idle;
        };

        let remaining = ceil_seconds((deadline - now).num_milliseconds());
        if remaining <= 0 {
            self.flag.mark_expired();
            info!("access window expired, halting updates");
            return ExpiryTick::Expired;
        }
        if remaining == 1 && !self.final_refetch_fired {
            self.final_refetch_fired = true;
            return ExpiryTick::FinalRefetch;
        }
        ExpiryTick::Countdown(remaining)
    }

    /// Permanently true once the window has closed.
    pub fn is_expired(&self) -> bool {
        self.flag.is_expired()
    }
}

fn ceil_seconds(ms: i64) -> i64 {
    ms.div_euclid(1000) + i64::from(ms.rem_euclid(1000) > 0)
}
