//! Session Lifecycle Manager
//!
//! Owns the gateway session state machine and the three recurring timers.
//!
//! ## State machine
//!
//! ```text
//! disconnected -> connecting -> qr_ready -> connected
//!                      ^           |
//!                      +-----------+   (payload expired)
//! any non-disconnected state -> error
//! error -> connecting
//! any state -> disconnected
//! ```
//!
//! Transitions publish the new state on the context's watch channel. A
//! supervisor task follows that channel and starts or cancels the timers, so
//! whatever triggers a transition (a call, a timer tick, an expired session)
//! the timers always end up matching the state.

use crate::context::SyncContext;
use crate::conversations::UpsertSummary;
use crate::events::SyncEvent;
use crate::gateway::StatusResponse;
use crate::model::{current_timestamp, SessionInfo, SessionState};
use crate::session::TimerKind;
use crate::timer::{RecurringTimer, TickFlow};
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Session stopped and local state cleared
    Stopped,
    /// Session was authenticated; stopping needs `force`
    ConfirmationRequired,
    /// Nothing to stop
    AlreadyStopped,
}

#[derive(Debug)]
struct SessionShared {
    ctx: SyncContext,
    info: RwLock<SessionInfo>,
    timers: Mutex<HashMap<TimerKind, RecurringTimer>>,
    last_qr_refresh: Mutex<Option<Instant>>,
}

/// Gateway session lifecycle
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct SessionLifecycleManager {
    shared: Arc<SessionShared>,
}

impl SessionLifecycleManager {
    /// Create a manager for gateway instance `instance_id`
    ///
    /// Must be called from within a Tokio runtime: the timer supervisor is
    /// spawned here.
    pub fn new(ctx: SyncContext, instance_id: impl Into<String>) -> Self {
        let state_rx = ctx.watch_session();
        let shared = Arc::new(SessionShared {
            ctx,
            info: RwLock::new(SessionInfo::new(instance_id)),
            timers: Mutex::new(HashMap::new()),
            last_qr_refresh: Mutex::new(None),
        });

        tokio::spawn(supervise_timers(Arc::downgrade(&shared), state_rx));

        Self { shared }
    }

    fn ctx(&self) -> &SyncContext {
        &self.shared.ctx
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.ctx().session_state()
    }

    /// Snapshot of the session record
    pub async fn info(&self) -> SessionInfo {
        self.shared.info.read().await.clone()
    }

    /// Current QR payload, if one is showing
    pub async fn qr_payload(&self) -> Option<String> {
        self.shared.info.read().await.qr_payload.clone()
    }

    /// Whether the session was ever authenticated
    pub async fn was_authenticated(&self) -> bool {
        self.shared.info.read().await.was_authenticated()
    }

    /// Timers currently running
    pub async fn active_timers(&self) -> Vec<TimerKind> {
        let timers = self.shared.timers.lock().await;
        TimerKind::ALL
            .into_iter()
            .filter(|kind| timers.get(kind).map(|t| t.is_active()).unwrap_or(false))
            .collect()
    }

    /// Start a pairing flow
    pub async fn start(&self) -> Result<SessionState> {
        let current = self.state();
        if !matches!(current, SessionState::Disconnected | SessionState::Error) {
            return Err(SyncError::invalid_state(format!(
                "cannot start a session that is {}",
                current
            )));
        }

        let instance = self.shared.info.read().await.id.clone();
        info!("Starting gateway session {}", instance);

        self.transition(SessionState::Connecting, |info| info.last_error = None)
            .await;

        match self.ctx().gateway().start_session().await {
            Ok(status) => self.apply_status(status).await,
            Err(e) if e.is_recoverable() => {
                // The status poll keeps probing while connecting
                warn!("Session start did not complete: {}", e);
                self.shared.info.write().await.last_error = Some(e.to_string());
            }
            Err(e) if e.is_auth_expired() => {
                self.force_disconnect(&e).await;
                return Err(e);
            }
            Err(e) => {
                error!("Session start failed: {}", e);
                let reason = e.to_string();
                self.transition(SessionState::Error, |info| info.last_error = Some(reason))
                    .await;
                return Err(e);
            }
        }

        Ok(self.state())
    }

    /// Request a fresh QR payload
    ///
    /// Returns `Ok(false)` when the request was debounced.
    pub async fn refresh_qr(&self) -> Result<bool> {
        let current = self.state();
        if current != SessionState::QrReady {
            return Err(SyncError::invalid_state(format!(
                "no QR code to refresh while {}",
                current
            )));
        }

        {
            let mut last = self.shared.last_qr_refresh.lock().await;
            let debounce = self.ctx().config().qr_refresh_debounce();
            if let Some(at) = *last {
                if at.elapsed() < debounce {
                    debug!("QR refresh debounced");
                    return Ok(false);
                }
            }
            *last = Some(Instant::now());
        }

        debug!("Refreshing QR payload");
        match self.ctx().gateway().refresh_qr().await {
            Ok(status) => {
                self.apply_status(status).await;
                Ok(true)
            }
            Err(e) => {
                self.handle_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Probe the gateway status and apply it
    pub async fn poll(&self) -> Result<SessionState> {
        match self.ctx().gateway().status().await {
            Ok(status) => {
                self.apply_status(status).await;
                Ok(self.state())
            }
            Err(e) => {
                self.handle_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Apply a status reported by the gateway
    pub async fn apply_status(&self, status: StatusResponse) {
        let mut current = self.state();

        // The gateway recovered on its own: resume through connecting
        if current == SessionState::Error
            && matches!(
                status.state,
                SessionState::QrReady | SessionState::Connected | SessionState::Connecting
            )
        {
            info!("Gateway recovered, resuming session");
            self.transition(SessionState::Connecting, |info| info.last_error = None)
                .await;
            current = self.state();
        }

        match status.state {
            SessionState::QrReady => {
                let Some(payload) = status.qr_payload else {
                    warn!("Gateway reported qr_ready without a payload");
                    return;
                };
                if current == SessionState::Connected {
                    warn!("Ignoring QR payload for an authenticated session");
                    return;
                }
                self.show_qr(payload).await;
            }
            SessionState::Connected => {
                let phone_number = status.phone_number;
                let previous = self
                    .transition(SessionState::Connected, |info| {
                        info.phone_number = phone_number;
                        info.last_error = None;
                    })
                    .await;

                if let Some(previous) = previous {
                    if previous.state != SessionState::Connected {
                        info!("Session authenticated");
                        if let Err(e) = self.sync_conversations().await {
                            warn!("Initial conversation sync failed: {}", e);
                        }
                    }
                }
            }
            SessionState::Disconnected => {
                if current != SessionState::Disconnected {
                    warn!("Gateway reports the session as disconnected");
                    self.disconnect(Some("session closed by gateway".to_string()))
                        .await;
                }
            }
            SessionState::Connecting => {
                self.transition(SessionState::Connecting, |_| {}).await;
            }
            SessionState::Error => {
                self.transition(SessionState::Error, |info| {
                    info.last_error = Some("gateway reported an error".to_string())
                })
                .await;
            }
        }
    }

    async fn show_qr(&self, payload: String) {
        let shown = payload.clone();
        let Some(previous) = self
            .transition(SessionState::QrReady, |info| info.qr_payload = Some(shown))
            .await
        else {
            return;
        };

        if previous.qr_payload.as_deref() != Some(payload.as_str()) {
            info!("QR payload updated");
            self.ctx().emit(SyncEvent::QrUpdated { payload });
        }
    }

    /// Fetch the conversation list and merge it into the store
    pub async fn sync_conversations(&self) -> Result<UpsertSummary> {
        self.ctx().ensure_authenticated()?;

        let list = match self.ctx().gateway().list_conversations().await {
            Ok(list) => list,
            Err(e) => {
                self.handle_failure(&e).await;
                return Err(e);
            }
        };

        // Stopped while the list was in flight
        self.ctx().ensure_authenticated()?;

        let summary = self.ctx().conversations().write().await.upsert(list);
        self.ctx().emit(SyncEvent::ConversationsChanged);
        Ok(summary)
    }

    /// Stop the session
    ///
    /// An authenticated session is only stopped with `force`; without it the
    /// caller gets [`StopOutcome::ConfirmationRequired`] and nothing changes.
    pub async fn stop(&self, force: bool) -> Result<StopOutcome> {
        let (state, authenticated) = {
            let info = self.shared.info.read().await;
            (info.state, info.was_authenticated())
        };

        if state == SessionState::Disconnected {
            return Ok(StopOutcome::AlreadyStopped);
        }
        if authenticated && !force {
            info!("Stop of authenticated session needs confirmation");
            return Ok(StopOutcome::ConfirmationRequired);
        }

        info!("Stopping gateway session (force: {})", force);
        match self.ctx().gateway().stop_session(force).await {
            Ok(()) => {}
            Err(e) if e.is_auth_expired() => {
                debug!("Session already gone on the gateway: {}", e);
            }
            Err(e) => {
                warn!("Failed to stop session: {}", e);
                return Err(e);
            }
        }

        self.disconnect(None).await;
        Ok(StopOutcome::Stopped)
    }

    /// Cleanup policy for the UI going away
    ///
    /// Sessions that never authenticated are stopped in the background;
    /// authenticated sessions are left running.
    pub async fn on_page_exit(&self) -> Option<JoinHandle<()>> {
        let (state, authenticated) = {
            let info = self.shared.info.read().await;
            (info.state, info.was_authenticated())
        };

        if authenticated || state == SessionState::Disconnected {
            debug!("Page exit: leaving session as is ({})", state);
            return None;
        }

        info!("Page exit: stopping unauthenticated session");
        let manager = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = manager.stop(false).await {
                warn!("Cleanup on page exit failed: {}", e);
            }
        }))
    }

    /// React to a gateway failure
    pub async fn handle_failure(&self, error: &SyncError) {
        if error.is_auth_expired() {
            self.force_disconnect(error).await;
        } else if error.is_recoverable() {
            warn!("Gateway unavailable, retrying on next tick: {}", error);
            self.shared.info.write().await.last_error = Some(error.to_string());
        } else {
            warn!("Gateway request failed: {}", error);
            self.shared.info.write().await.last_error = Some(error.to_string());
        }
    }

    async fn force_disconnect(&self, error: &SyncError) {
        warn!("Session expired: {}", error);
        self.disconnect(Some(error.to_string())).await;
        self.ctx().emit(SyncEvent::Error {
            conversation_id: None,
            message: error.user_message(),
        });
    }

    async fn disconnect(&self, reason: Option<String>) {
        self.cancel_timers().await;
        self.transition(SessionState::Disconnected, |info| {
            *info = SessionInfo {
                last_error: reason,
                ..SessionInfo::new(info.id.clone())
            };
        })
        .await;
        *self.shared.last_qr_refresh.lock().await = None;
        self.ctx().reset().await;
    }

    async fn cancel_timers(&self) {
        let mut timers = self.shared.timers.lock().await;
        for (_, timer) in timers.drain() {
            timer.cancel();
        }
    }

    /// Move to `next`, returning the record as it was before
    ///
    /// Invalid transitions are logged and ignored (`None`).
    async fn transition(
        &self,
        next: SessionState,
        update: impl FnOnce(&mut SessionInfo),
    ) -> Option<SessionInfo> {
        let mut info = self.shared.info.write().await;
        let from = info.state;

        if !from.can_transition_to(next) {
            warn!("Ignoring invalid session transition {} -> {}", from, next);
            return None;
        }

        let previous = info.clone();
        update(&mut *info);
        info.state = next;

        if next != SessionState::QrReady {
            info.qr_payload = None;
        }
        if next != SessionState::Connected {
            info.phone_number = None;
        }
        if next == SessionState::Connected && info.authenticated_at.is_none() {
            info.authenticated_at = Some(current_timestamp());
        }

        self.ctx().publish_session_state(next);
        drop(info);

        if from != next {
            info!("Session state: {} -> {}", from, next);
            self.ctx().emit(SyncEvent::SessionStateChanged { from, to: next });
        }

        Some(previous)
    }

    async fn tick(&self, kind: TimerKind) -> TickFlow {
        if !kind.runs_in(self.state()) {
            return TickFlow::Continue;
        }

        let result = match kind {
            TimerKind::QrRefresh => self.refresh_qr().await.map(|_| ()),
            TimerKind::StatusPoll => self.poll().await.map(|_| ()),
            TimerKind::ConversationPoll => self.sync_conversations().await.map(|_| ()),
        };

        if let Err(e) = result {
            debug!("{} tick failed: {}", kind.name(), e);
        }
        TickFlow::Continue
    }
}

/// Keep the running timers in line with the session state
async fn supervise_timers(shared: Weak<SessionShared>, mut state_rx: watch::Receiver<SessionState>) {
    loop {
        let state = *state_rx.borrow_and_update();
        let Some(strong) = shared.upgrade() else {
            break;
        };

        {
            let mut timers = strong.timers.lock().await;
            for kind in TimerKind::ALL {
                let wanted = kind.runs_in(state);
                let running = timers.contains_key(&kind);

                if wanted && !running {
                    let period = kind.period(strong.ctx.config());
                    timers.insert(kind, spawn_timer(shared.clone(), kind, period));
                } else if !wanted && running {
                    if let Some(timer) = timers.remove(&kind) {
                        timer.cancel();
                    }
                }
            }
        }
        drop(strong);

        if state_rx.changed().await.is_err() {
            break;
        }
    }
    debug!("Session timer supervisor exiting");
}

fn spawn_timer(
    shared: Weak<SessionShared>,
    kind: TimerKind,
    period: std::time::Duration,
) -> RecurringTimer {
    RecurringTimer::spawn(kind.name(), period, move || {
        let shared = shared.clone();
        async move {
            let Some(shared) = shared.upgrade() else {
                return TickFlow::Stop;
            };
            SessionLifecycleManager { shared }.tick(kind).await
        }
    })
}
