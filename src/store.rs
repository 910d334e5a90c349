//! Last-known-snapshot store.
//!
//! Holds the latest order snapshot and the timestamp of the last accepted
//! merge. Both transports feed through `merge()`, which replaces the
//! snapshot wholesale: no field-level diffing, so repeated or out-of-order
//! backend statuses cannot corrupt the stored view.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::debug;

use crate::model::OrderSnapshot;

/// Outcome of a merge, so dependent timers only re-trigger on real change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Changed,
    Unchanged,
}

#[derive(Debug, Default)]
struct StoreInner {
    snapshot: Option<OrderSnapshot>,
    last_updated: Option<DateTime<Utc>>,
}

/// Store for the one order a session tracks. Private to that session;
/// the presentation layer only ever reads.
#[derive(Debug, Default)]
pub struct OrderSnapshotStore {
    inner: Mutex<StoreInner>,
}

impl OrderSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot wholesale and stamp `last_updated`.
    ///
    /// Idempotent: merging a snapshot identical to the current one leaves
    /// the observable state untouched, including `last_updated`.
    pub fn merge(&self, snapshot: OrderSnapshot) -> MergeOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.snapshot.as_ref() == Some(&snapshot) {
            return MergeOutcome::Unchanged;
        }
        debug!(
            order_no = %snapshot.order_no,
            status = snapshot.status.as_str(),
            "snapshot merged"
        );
        inner.snapshot = Some(snapshot);
        inner.last_updated = Some(Utc::now());
        MergeOutcome::Changed
    }

    /// Latest snapshot, or `None` before the first successful fetch.
    pub fn current(&self) -> Option<OrderSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }

    /// Timestamp of the last accepted merge.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        FulfillmentType, OrderStatus, PaymentInfo, PaymentMethod, PaymentState,
    };

    fn snapshot(status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_no: "ORD-20260830-00001".into(),
            status,
            fulfillment_type: FulfillmentType::Pickup,
            payment: PaymentInfo {
                method: PaymentMethod::Cash,
                status: PaymentState::Pending,
            },
            items: vec![],
            completed_at: None,
            updated_at: "2026-08-30T04:10:00Z".parse().expect("timestamp"),
        }
    }

    #[test]
    fn test_current_is_none_before_first_merge() {
        let store = OrderSnapshotStore::new();
        assert!(store.current().is_none());
        assert!(store.last_updated().is_none());
    }

    #[test]
    fn test_merge_replaces_wholesale() {
        let store = OrderSnapshotStore::new();
        assert_eq!(store.merge(snapshot(OrderStatus::Pending)), MergeOutcome::Changed);
        assert_eq!(
            store.merge(snapshot(OrderStatus::Preparing)),
            MergeOutcome::Changed
        );
        assert_eq!(
            store.current().expect("snapshot").status,
            OrderStatus::Preparing
        );
    }

    #[test]
    fn test_merge_is_idempotent_for_identical_snapshots() {
        let store = OrderSnapshotStore::new();
        store.merge(snapshot(OrderStatus::Preparing));
        let stamped = store.last_updated();
        assert_eq!(
            store.merge(snapshot(OrderStatus::Preparing)),
            MergeOutcome::Unchanged
        );
        assert_eq!(store.last_updated(), stamped);
        assert_eq!(
            store.current().expect("snapshot").status,
            OrderStatus::Preparing
        );
    }

    #[test]
    fn test_out_of_order_status_is_accepted_not_rejected() {
        // The backend enforces monotonicity; the store must simply absorb
        // whatever arrives.
        let store = OrderSnapshotStore::new();
        store.merge(snapshot(OrderStatus::Ready));
        assert_eq!(store.merge(snapshot(OrderStatus::Pending)), MergeOutcome::Changed);
        assert_eq!(store.current().expect("snapshot").status, OrderStatus::Pending);
    }
}
