//! Tracking session: composition root for one `(order_no, token)` pair.
//!
//! Performs the blocking initial fetch, then runs a single event loop that
//! centralizes every transition: push connect/disconnect, fallback to
//! polling after the grace period or reconnect exhaustion, terminal-status
//! teardown, the post-completion countdown, and manual refresh. Exactly one
//! live-update transport is active at a time; push is preferred, polling is
//! fallback-only.
//!
//! Tearing a session down cancels every pending timer and closes the
//! channel; no orphaned timer fires afterwards. A viewer submitting a new
//! order/token pair destroys the session and creates a new one, never
//! mutates in place.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, FetchOrder};
use crate::config::SessionConfig;
use crate::error::TrackError;
use crate::expiry::{ExpiryGuard, ExpiryTick};
use crate::model::OrderSnapshot;
use crate::poll::{PollEvent, PollScheduler};
use crate::push::{ConnectionManager, Connector, PushEvent, WsConnector};
use crate::store::OrderSnapshotStore;
use crate::timeline::{self, TimelineStep};

// ---------------------------------------------------------------------------
// Observable state
// ---------------------------------------------------------------------------

/// Which transport currently holds the live-updates role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    LivePush,
    AdaptivePoll,
    None,
}

/// Session lifecycle phase. All transitions are made in the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Connecting,
    LivePush,
    LivePoll,
    IdleExpired,
    IdleTerminal,
    /// A credential failure surfaced mid-session; every transport has been
    /// stopped. A fresh order/token pair means a fresh session.
    IdleError,
}

/// Read-only view handed to the presentation layer through a watch channel.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub snapshot: Option<OrderSnapshot>,
    pub transport: TransportState,
    pub phase: SessionPhase,
    pub seconds_until_expiry: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
    /// User-displayable message for credential failures detected after the
    /// initial load. Transient failures never land here.
    pub last_error: Option<String>,
}

/// Transport bookkeeping. Not user-visible data.
#[derive(Debug, Default)]
struct ConnectionState {
    reconnect_attempts: u32,
}

enum SessionCommand {
    ManualRefresh(oneshot::Sender<Result<(), TrackError>>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side handle to a running session. Dropping it tears the session
/// down; so does `shutdown()`.
pub struct SessionHandle {
    view_rx: watch::Receiver<SessionView>,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Current observable state.
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// Latest snapshot, or `None` before the first successful fetch.
    pub fn snapshot(&self) -> Option<OrderSnapshot> {
        self.view_rx.borrow().snapshot.clone()
    }

    /// Timeline for the latest snapshot.
    pub fn timeline(&self) -> Option<Vec<TimelineStep>> {
        self.view_rx.borrow().snapshot.as_ref().map(|s| {
            timeline::timeline_for(s.fulfillment_type, s.payment.method, s.status)
        })
    }

    /// Subscribe to view changes (for event-driven rendering).
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// One-shot fetch regardless of transport state. Rejected once the
    /// order is terminal or the viewing window has expired.
    pub async fn manual_refresh(&self) -> Result<(), TrackError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::ManualRefresh(tx))
            .await
            .map_err(|_| TrackError::SessionClosed)?;
        rx.await.map_err(|_| TrackError::SessionClosed)?
    }

    /// Synchronously cancel every pending timer and close the channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Entry points for starting a tracking session.
pub struct SyncSession;

impl SyncSession {
    /// Start a session against the real backend.
    pub async fn connect(config: SessionConfig) -> Result<SessionHandle, TrackError> {
        let fetcher = Arc::new(ApiClient::new(config.base_url.clone())?);
        let connector = Arc::new(WsConnector::new(config.push_url()));
        Self::start(config, fetcher, connector).await
    }

    /// Start a session with injected transports. The initial fetch happens
    /// here; its failure (including a bad order number or token) propagates
    /// to the caller and no retry loop is started.
    pub async fn start<F: FetchOrder, C: Connector>(
        config: SessionConfig,
        fetcher: Arc<F>,
        connector: Arc<C>,
    ) -> Result<SessionHandle, TrackError> {
        let initial = fetcher
            .fetch_order(&config.order_no, &config.token)
            .await?;
        info!(
            order_no = %config.order_no,
            status = initial.status.as_str(),
            "tracking session started"
        );

        let store = Arc::new(OrderSnapshotStore::new());
        let mut guard = ExpiryGuard::new(config.expiry_window);
        guard.arm(&initial);
        let terminal_at_start = initial.status.is_terminal();
        store.merge(initial);

        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        // Push channel only makes sense for an order that can still move.
        let mut push_rx = None;
        let mut push_cancel = None;
        let phase = if terminal_at_start {
            SessionPhase::IdleTerminal
        } else {
            let (tx, rx) = mpsc::channel(16);
            let token = cancel.child_token();
            ConnectionManager::new(connector, tx, token.clone()).spawn();
            push_rx = Some(rx);
            push_cancel = Some(token);
            SessionPhase::Connecting
        };

        let runtime = SessionRuntime {
            config,
            fetcher,
            store,
            guard,
            epoch_wall: Utc::now(),
            epoch_mono: tokio::time::Instant::now(),
            conn: ConnectionState::default(),
            phase,
            transport: TransportState::None,
            last_error: None,
            poll_cancel: None,
            push_cancel,
            cancel: cancel.clone(),
            view_tx: watch::channel(SessionView {
                snapshot: None,
                transport: TransportState::None,
                phase,
                seconds_until_expiry: None,
                last_updated: None,
                last_error: None,
            })
            .0,
        };
        runtime.publish();
        let view_rx = runtime.view_tx.subscribe();

        tokio::spawn(runtime.run(push_rx, cmd_rx));

        Ok(SessionHandle {
            view_rx,
            commands: cmd_tx,
            cancel,
        })
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

struct SessionRuntime<F: FetchOrder> {
    config: SessionConfig,
    fetcher: Arc<F>,
    store: Arc<OrderSnapshotStore>,
    guard: ExpiryGuard,
    // Wall-clock epoch paired with a monotonic timer, so countdown and
    // expiry follow the runtime's clock rather than re-reading the system
    // clock on every tick.
    epoch_wall: DateTime<Utc>,
    epoch_mono: tokio::time::Instant,
    conn: ConnectionState,
    phase: SessionPhase,
    transport: TransportState,
    last_error: Option<String>,
    poll_cancel: Option<CancellationToken>,
    push_cancel: Option<CancellationToken>,
    cancel: CancellationToken,
    view_tx: watch::Sender<SessionView>,
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<F: FetchOrder> SessionRuntime<F> {
    async fn run(
        mut self,
        mut push_rx: Option<mpsc::Receiver<PushEvent>>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut poll_rx: Option<mpsc::Receiver<PollEvent>> = None;

        let grace = tokio::time::sleep(self.config.grace_period);
        tokio::pin!(grace);
        let mut grace_armed = matches!(self.phase, SessionPhase::Connecting);

        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        countdown.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                // Push never reported connected in time: fall back to the
                // pull loop. The manager keeps trying in the background and
                // reclaims the live role if it eventually connects.
                _ = &mut grace, if grace_armed => {
                    grace_armed = false;
                    if matches!(self.phase, SessionPhase::Connecting) {
                        info!(
                            grace_secs = self.config.grace_period.as_secs(),
                            "push channel not connected within grace period"
                        );
                        if let Some(rx) = self.start_poll() {
                            poll_rx = Some(rx);
                        }
                    }
                }

                ev = recv_opt(&mut push_rx), if push_rx.is_some() => {
                    match ev {
                        Some(ev) => {
                            if let Some(rx) = self.on_push_event(ev) {
                                poll_rx = Some(rx);
                            }
                        }
                        None => push_rx = None,
                    }
                }

                ev = recv_opt(&mut poll_rx), if poll_rx.is_some() => {
                    match ev {
                        Some(ev) => self.on_poll_event(ev),
                        None => poll_rx = None,
                    }
                }

                cmd = commands.recv() => {
                    match cmd {
                        Some(SessionCommand::ManualRefresh(reply)) => {
                            let result = self.handle_manual_refresh().await;
                            let _ = reply.send(result);
                        }
                        // Handle dropped: viewer went away.
                        None => break,
                    }
                }

                _ = countdown.tick() => self.on_countdown_tick().await,
            }
        }

        self.teardown();
    }

    // -- transitions --------------------------------------------------------

    fn on_push_event(&mut self, ev: PushEvent) -> Option<mpsc::Receiver<PollEvent>> {
        match ev {
            PushEvent::Connected => {
                self.conn.reconnect_attempts = 0;
                self.stop_poll();
                self.phase = SessionPhase::LivePush;
                self.transport = TransportState::LivePush;
                self.publish();
                None
            }
            PushEvent::Disconnected { attempts } => {
                self.conn.reconnect_attempts = attempts;
                if matches!(self.phase, SessionPhase::LivePush) {
                    debug!(attempts, "push channel dropped, reconnecting");
                    self.phase = SessionPhase::Connecting;
                    self.transport = TransportState::None;
                    self.publish();
                }
                None
            }
            PushEvent::Update(snapshot) => {
                self.apply_update(snapshot);
                None
            }
            PushEvent::Exhausted => {
                warn!("push reconnect budget spent, falling back to polling");
                if matches!(
                    self.phase,
                    SessionPhase::Connecting | SessionPhase::LivePush
                ) {
                    return self.start_poll();
                }
                None
            }
        }
    }

    fn on_poll_event(&mut self, ev: PollEvent) {
        match ev {
            PollEvent::Update(snapshot) => self.apply_update(snapshot),
            // Transient: the loop retries on its fixed schedule; nothing
            // surfaces beyond the already-lowered transport state.
            PollEvent::Failed => {}
            PollEvent::Fatal(e) => {
                // The credentials are dead, so the push channel is too.
                warn!(error = %e, "credential failure mid-session, stopping transports");
                self.last_error = Some(e.to_string());
                self.stop_poll();
                self.cancel_push();
                self.phase = SessionPhase::IdleError;
                self.transport = TransportState::None;
                self.publish();
            }
        }
    }

    fn apply_update(&mut self, snapshot: OrderSnapshot) {
        let terminal = snapshot.status.is_terminal();
        self.guard.arm(&snapshot);
        self.store.merge(snapshot);
        if terminal
            && !matches!(
                self.phase,
                SessionPhase::IdleTerminal | SessionPhase::IdleExpired
            )
        {
            self.enter_terminal();
        }
        self.publish();
    }

    fn enter_terminal(&mut self) {
        info!("order reached terminal status, stopping transports");
        self.stop_poll();
        self.cancel_push();
        self.phase = SessionPhase::IdleTerminal;
        self.transport = TransportState::None;
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.epoch_mono.elapsed();
        self.epoch_wall + chrono::Duration::milliseconds(elapsed.as_millis() as i64)
    }

    async fn on_countdown_tick(&mut self) {
        match self.guard.on_tick(self.now()) {
            ExpiryTick::Idle => {}
            ExpiryTick::Countdown(_) => self.publish(),
            ExpiryTick::FinalRefetch => {
                // Capture any last-moment correction before the window
                // closes. One-shot, not a poll restart.
                debug!("final refetch before window expiry");
                let _ = self.one_shot_refresh().await;
                self.publish();
            }
            ExpiryTick::Expired => {
                if !matches!(self.phase, SessionPhase::IdleExpired) {
                    self.stop_poll();
                    self.cancel_push();
                    self.phase = SessionPhase::IdleExpired;
                    self.transport = TransportState::None;
                    self.publish();
                }
            }
        }
    }

    async fn handle_manual_refresh(&mut self) -> Result<(), TrackError> {
        if self.guard.is_expired()
            || matches!(
                self.phase,
                SessionPhase::IdleExpired | SessionPhase::IdleTerminal | SessionPhase::IdleError
            )
        {
            return Err(TrackError::WindowExpired);
        }
        self.one_shot_refresh().await
    }

    /// Shared one-shot refresh primitive behind both the countdown's final
    /// refetch and manual refresh.
    async fn one_shot_refresh(&mut self) -> Result<(), TrackError> {
        match self
            .fetcher
            .fetch_order(&self.config.order_no, &self.config.token)
            .await
        {
            Ok(snapshot) => {
                self.apply_update(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "one-shot refresh failed");
                if e.is_terminal_credential() {
                    self.last_error = Some(e.to_string());
                    self.publish();
                }
                Err(e)
            }
        }
    }

    // -- transports ---------------------------------------------------------

    fn start_poll(&mut self) -> Option<mpsc::Receiver<PollEvent>> {
        if self.guard.is_expired()
            || matches!(
                self.phase,
                SessionPhase::IdleExpired
                    | SessionPhase::IdleTerminal
                    | SessionPhase::IdleError
                    | SessionPhase::LivePoll
            )
        {
            return None;
        }
        let (tx, rx) = mpsc::channel(16);
        let cancel = self.cancel.child_token();
        PollScheduler::new(
            self.fetcher.clone(),
            self.config.order_no.clone(),
            self.config.token.clone(),
            self.guard.flag(),
            tx,
            cancel.clone(),
        )
        .spawn();
        self.poll_cancel = Some(cancel);
        self.phase = SessionPhase::LivePoll;
        self.transport = TransportState::AdaptivePoll;
        self.publish();
        Some(rx)
    }

    fn stop_poll(&mut self) {
        if let Some(token) = self.poll_cancel.take() {
            token.cancel();
        }
    }

    fn cancel_push(&mut self) {
        if let Some(token) = self.push_cancel.take() {
            token.cancel();
        }
    }

    fn teardown(&mut self) {
        self.stop_poll();
        self.cancel.cancel();
        debug!(order_no = %self.config.order_no, "tracking session torn down");
    }

    // -- view ---------------------------------------------------------------

    fn publish(&self) {
        let snapshot = self.store.current();
        let seconds_until_expiry = snapshot
            .as_ref()
            .and_then(|s| self.guard.seconds_remaining(s, self.now()));
        self.view_tx.send_replace(SessionView {
            snapshot,
            transport: self.transport,
            phase: self.phase,
            seconds_until_expiry,
            last_updated: self.store.last_updated(),
            last_error: self.last_error.clone(),
        });
    }
}
