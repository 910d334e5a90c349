//! Adaptive polling fallback.
//!
//! A single-flight, self-rescheduling fetch loop used when the push channel
//! is unavailable. The interval tracks the order's lifecycle stage: orders
//! on the move are polled hard, orders sitting in a queue gently. Fetch
//! failures reschedule on a fixed retry interval instead of the adaptive
//! table, so an outage never becomes a tight retry loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::FetchOrder;
use crate::error::TrackError;
use crate::expiry::ExpiryFlag;
use crate::model::{OrderSnapshot, OrderStatus};

/// Retry interval after a failed fetch, regardless of status.
const RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Adaptive poll interval, keyed by the current known status.
pub fn interval_for(status: OrderStatus) -> Duration {
    match status {
        OrderStatus::Pending | OrderStatus::Confirmed => Duration::from_secs(30),
        OrderStatus::Preparing => Duration::from_secs(45),
        OrderStatus::Ready | OrderStatus::Delivering => Duration::from_secs(20),
        OrderStatus::WaitingPickup => Duration::from_secs(60),
        // Terminal and unknown statuses poll gently; the loop stops on
        // terminal anyway.
        _ => Duration::from_secs(60),
    }
}

/// Events the poll loop reports to the session.
#[derive(Debug)]
pub enum PollEvent {
    Update(OrderSnapshot),
    /// Transient failure; the loop keeps going.
    Failed,
    /// Credential failure; the loop has stopped itself.
    Fatal(TrackError),
}

/// Self-rescheduling pull loop for one order. At most one fetch is in
/// flight at any time; the next cycle is only scheduled once the previous
/// fetch has completed.
pub struct PollScheduler<F: FetchOrder> {
    fetcher: Arc<F>,
    order_no: String,
    token: String,
    expired: ExpiryFlag,
    events: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
}

impl<F: FetchOrder> PollScheduler<F> {
    pub fn new(
        fetcher: Arc<F>,
        order_no: impl Into<String>,
        token: impl Into<String>,
        expired: ExpiryFlag,
        events: mpsc::Sender<PollEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            order_no: order_no.into(),
            token: token.into(),
            expired,
            events,
            cancel,
        }
    }

    /// Start the loop. The first fetch happens immediately; subsequent
    /// cycles follow the adaptive table for the *newly observed* status.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(order_no = %self.order_no, "poll loop started");

        loop {
            if self.expired.is_expired() {
                info!(order_no = %self.order_no, "access window expired, poll loop stopped");
                return;
            }

            let delay = match self.fetcher.fetch_order(&self.order_no, &self.token).await {
                Ok(snapshot) => {
                    let status = snapshot.status;
                    if self.events.send(PollEvent::Update(snapshot)).await.is_err() {
                        return;
                    }
                    if status.is_terminal() {
                        info!(
                            order_no = %self.order_no,
                            status = status.as_str(),
                            "terminal status, poll loop stopped"
                        );
                        return;
                    }
                    interval_for(status)
                }
                Err(e) if e.is_terminal_credential() => {
                    warn!(order_no = %self.order_no, error = %e, "poll fetch rejected, stopping");
                    let _ = self.events.send(PollEvent::Fatal(e)).await;
                    return;
                }
                Err(e) => {
                    warn!(order_no = %self.order_no, error = %e, "poll fetch failed, will retry");
                    if self.events.send(PollEvent::Failed).await.is_err() {
                        return;
                    }
                    RETRY_INTERVAL
                }
            };

            debug!(
                order_no = %self.order_no,
                delay_secs = delay.as_secs(),
                "next poll cycle scheduled"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(order_no = %self.order_no, "poll loop cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FulfillmentType, PaymentInfo, PaymentMethod, PaymentState};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn snapshot(status: OrderStatus) -> OrderSnapshot {
        OrderSnapshot {
            order_no: "ORD-20260830-00003".into(),
            status,
            fulfillment_type: FulfillmentType::Delivery,
            payment: PaymentInfo {
                method: PaymentMethod::Qris,
                status: PaymentState::Verified,
            },
            items: vec![],
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Fetcher that replays a script and records when each call happened.
    struct ScriptedFetch {
        script: Mutex<VecDeque<Result<OrderSnapshot, TrackError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedFetch {
        fn new(script: Vec<Result<OrderSnapshot, TrackError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_offsets(&self, start: Instant) -> Vec<Duration> {
            self.calls
                .lock()
                .expect("lock")
                .iter()
                .map(|c| *c - start)
                .collect()
        }
    }

    impl FetchOrder for ScriptedFetch {
        async fn fetch_order(
            &self,
            _order_no: &str,
            _token: &str,
        ) -> Result<OrderSnapshot, TrackError> {
            self.calls.lock().expect("lock").push(Instant::now());
            self.script
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Err(TrackError::transport("script exhausted")))
        }
    }

    fn scheduler(
        fetcher: Arc<ScriptedFetch>,
        expired: ExpiryFlag,
        events: mpsc::Sender<PollEvent>,
        cancel: CancellationToken,
    ) -> PollScheduler<ScriptedFetch> {
        PollScheduler::new(fetcher, "ORD-20260830-00003", "tok", expired, events, cancel)
    }

    #[test]
    fn test_interval_table() {
        assert_eq!(interval_for(OrderStatus::Pending), Duration::from_secs(30));
        assert_eq!(interval_for(OrderStatus::Confirmed), Duration::from_secs(30));
        assert_eq!(interval_for(OrderStatus::Preparing), Duration::from_secs(45));
        assert_eq!(interval_for(OrderStatus::Ready), Duration::from_secs(20));
        assert_eq!(interval_for(OrderStatus::Delivering), Duration::from_secs(20));
        assert_eq!(
            interval_for(OrderStatus::WaitingPickup),
            Duration::from_secs(60)
        );
        assert_eq!(interval_for(OrderStatus::Completed), Duration::from_secs(60));
        assert_eq!(interval_for(OrderStatus::Unknown), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_follows_newly_observed_status() {
        let fetcher = ScriptedFetch::new(vec![
            Ok(snapshot(OrderStatus::Preparing)),
            Ok(snapshot(OrderStatus::Ready)),
            Ok(snapshot(OrderStatus::Delivering)),
            Ok(snapshot(OrderStatus::Delivered)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = scheduler(fetcher.clone(), ExpiryFlag::default(), tx, cancel).spawn();

        // Drain until the loop stops on the terminal status.
        while rx.recv().await.is_some() {}
        task.await.expect("poll task");

        // First fetch immediate, then 45s (preparing), 20s (ready),
        // 20s (delivering) — always the *new* status's interval.
        assert_eq!(
            fetcher.call_offsets(start),
            vec![
                Duration::ZERO,
                Duration::from_secs(45),
                Duration::from_secs(65),
                Duration::from_secs(85),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_uses_fixed_retry_interval() {
        let fetcher = ScriptedFetch::new(vec![
            Ok(snapshot(OrderStatus::Ready)),
            Err(TrackError::transport("gateway timeout")),
            Ok(snapshot(OrderStatus::Completed)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = scheduler(fetcher.clone(), ExpiryFlag::default(), tx, cancel).spawn();

        let mut saw_failed = false;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, PollEvent::Failed) {
                saw_failed = true;
            }
        }
        task.await.expect("poll task");

        assert!(saw_failed);
        // 20s after ready, then the fixed 30s retry — not the adaptive 20s.
        assert_eq!(
            fetcher.call_offsets(start),
            vec![
                Duration::ZERO,
                Duration::from_secs(20),
                Duration::from_secs(50),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_stops_loop() {
        let fetcher = ScriptedFetch::new(vec![Ok(snapshot(OrderStatus::Canceled))]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = scheduler(fetcher.clone(), ExpiryFlag::default(), tx, cancel).spawn();

        let mut updates = 0;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, PollEvent::Update(_)) {
                updates += 1;
            }
        }
        task.await.expect("poll task");

        // Even a long wait schedules nothing further.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(updates, 1);
        assert_eq!(fetcher.call_offsets(start).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_stops_without_retry() {
        let fetcher = ScriptedFetch::new(vec![Err(TrackError::Unauthorized)]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let task = scheduler(fetcher.clone(), ExpiryFlag::default(), tx, cancel).spawn();

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        task.await.expect("poll task");

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PollEvent::Fatal(TrackError::Unauthorized)));
        assert_eq!(fetcher.call_offsets(start).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_flag_suppresses_fetch() {
        let fetcher = ScriptedFetch::new(vec![Ok(snapshot(OrderStatus::Completed))]);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        // The expired check runs before each fetch, so a loop started
        // against an already-expired window never touches the network.
        let start = Instant::now();
        let flag = {
            // ExpiryFlag has no public setter; expire through a guard.
            let mut guard = crate::expiry::ExpiryGuard::new(Duration::from_secs(300));
            let mut snap = snapshot(OrderStatus::Completed);
            snap.completed_at = Some(Utc::now() - chrono::Duration::seconds(400));
            guard.arm(&snap);
            let flag = guard.flag();
            guard.on_tick(Utc::now());
            flag
        };
        assert!(flag.is_expired());

        let task = scheduler(fetcher.clone(), flag, tx, cancel).spawn();
        task.await.expect("poll task");
        assert!(fetcher.call_offsets(start).is_empty());
    }
}
