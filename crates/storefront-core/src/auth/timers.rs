//! Periodic session timers.
//!
//! Two independent loops run while a session is authenticated: the refresh
//! loop and the expiry-display loop. Both are owned by a [`SessionTimers`]
//! guard; dropping the guard cancels them, so a torn-down view never acts on
//! a stale session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::claims::EXPIRING_SOON_SECS;
use super::identity::Navigation;
use super::session::{RefreshOutcome, SessionManager};

/// Buffer size for the timer event channel.
/// A minute of display ticks plus a refresh fits several times over.
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Shortest timer period; a zero period would make `interval_at` panic
const MIN_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Events sent from the timer tasks to the owner of the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Tokens were refreshed; seconds until the new expiry
    Refreshed { expires_in: Option<i64> },
    /// Periodic remaining-time update for display
    SessionTime(Option<i64>),
    /// Less than a minute left
    ExpiringSoon(i64),
    /// The refresh loop logged the session out; perform this navigation
    LoggedOut(Navigation),
}

#[derive(Debug)]
pub struct SessionTimers {
    cancel: CancellationToken,
    events: mpsc::Receiver<SessionEvent>,
    handles: Vec<JoinHandle<()>>,
}

impl SessionTimers {
    pub(crate) fn spawn(manager: Arc<SessionManager>) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let refresh_every = manager.config().refresh_interval();
        let display_every = manager.config().display_interval();

        let handles = vec![
            tokio::spawn(refresh_loop(
                manager.clone(),
                refresh_every,
                tx.clone(),
                cancel.clone(),
            )),
            tokio::spawn(display_loop(manager, display_every, tx, cancel.clone())),
        ];
        debug!(?refresh_every, ?display_every, "Session timers started");

        Self {
            cancel,
            events: rx,
            handles,
        }
    }

    /// Wait for the next event. `None` once both loops have stopped.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Collect every event that is ready without waiting
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel both loops and wait for them to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.await;
        }
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Interval that first fires one period from now and delays after a stall
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(MIN_TICK_PERIOD);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn send_event(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.try_send(event) {
        warn!(error = %e, "Dropped session event");
    }
}

async fn refresh_loop(
    manager: Arc<SessionManager>,
    period: Duration,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match manager.refresh_tick().await {
                    RefreshOutcome::Refreshed => send_event(
                        &tx,
                        SessionEvent::Refreshed {
                            expires_in: manager.session_time(),
                        },
                    ),
                    RefreshOutcome::StillValid => {}
                    RefreshOutcome::Skipped => {
                        debug!("Session no longer authenticated, stopping timers");
                        cancel.cancel();
                        break;
                    }
                    RefreshOutcome::LoggedOut(navigation) => {
                        send_event(&tx, SessionEvent::LoggedOut(navigation));
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }
    debug!("Refresh loop stopped");
}

async fn display_loop(
    manager: Arc<SessionManager>,
    period: Duration,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let remaining = manager.session_time();
                send_event(&tx, SessionEvent::SessionTime(remaining));
                if let Some(secs) = remaining {
                    if secs < EXPIRING_SOON_SECS {
                        warn!(expires_in = secs, "Session about to expire");
                        send_event(&tx, SessionEvent::ExpiringSoon(secs));
                    }
                }
            }
        }
    }
    debug!("Display loop stopped");
}
