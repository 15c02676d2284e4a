//! Periodic refresh of one open thread.
//!
//! A poller fetches once immediately, then on every interval tick and on every
//! explicit refresh, and merges each result into the shared timeline under its
//! lock. Fetches are awaited before the next trigger is taken, so at most one
//! is in flight per thread.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    channel::EventSink,
    error::{BackendError, BackendErrorCategory},
    reconcile::ConfirmationMatcher,
    retry::RetryPolicy,
    timeline::ThreadTimeline,
    types::{BackendEvent, Message, PollStatus, ThreadId, unix_now_ms},
};

/// Default interval between polls of an open thread.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Timeline shared between the runtime (provisional inserts) and its poller.
pub type SharedTimeline<M> = Arc<Mutex<ThreadTimeline<M>>>;

/// Server-side message feed used by pollers.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Recent messages visible to the account. May contain other threads;
    /// the merge ignores them.
    async fn fetch_recent_messages(
        &self,
        thread_id: ThreadId,
    ) -> Result<Vec<Message>, BackendError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub retry: RetryPolicy,
    /// The timeline was already seeded, so a failing first fetch is an
    /// ordinary poll failure rather than a failed load.
    pub seeded: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            retry: RetryPolicy::default(),
            seeded: false,
        }
    }
}

/// Handle to a running poller task.
#[derive(Debug)]
pub struct PollHandle {
    thread_id: ThreadId,
    stop: CancellationToken,
    refresh: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Request an immediate fetch. Requests made during a fetch coalesce into
    /// one follow-up fetch.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Whether the task has exited on its own (session expiry).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the timer and wait for the task to finish.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Start polling `timeline`'s thread from `source`.
pub fn spawn_poller<S, M>(
    source: Arc<S>,
    timeline: SharedTimeline<M>,
    thread_id: ThreadId,
    events: EventSink,
    config: PollerConfig,
) -> PollHandle
where
    S: MessageSource + ?Sized + 'static,
    M: ConfirmationMatcher + 'static,
{
    let stop = CancellationToken::new();
    let stop_child = stop.child_token();
    let refresh = Arc::new(Notify::new());
    let refresh_rx = refresh.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut loaded = config.seeded;
        let mut attempt: u32 = 0;

        debug!(thread_id, interval_ms = config.interval.as_millis() as u64, "poller started");

        loop {
            tokio::select! {
                _ = stop_child.cancelled() => break,
                _ = ticker.tick() => {}
                _ = refresh_rx.notified() => {}
            }

            let fetched = tokio::select! {
                _ = stop_child.cancelled() => break,
                fetched = source.fetch_recent_messages(thread_id) => fetched,
            };

            match fetched {
                Ok(messages) => {
                    attempt = 0;
                    loaded = true;
                    let snapshot = {
                        let mut guard = timeline.lock().await;
                        guard.apply_fetch(&messages, unix_now_ms());
                        guard.snapshot()
                    };
                    events.emit(BackendEvent::ThreadSnapshot(snapshot));
                    events.emit(BackendEvent::PollStatus(PollStatus {
                        thread_id,
                        healthy: true,
                        lag_hint_ms: None,
                    }));
                }
                Err(err) if err.category == BackendErrorCategory::Auth => {
                    warn!(thread_id, code = %err.code, "poll rejected; session expired");
                    events.emit(BackendEvent::SessionExpired);
                    break;
                }
                Err(err) => {
                    warn!(thread_id, code = %err.code, error = %err.message, "poll failed");
                    if !loaded {
                        events.emit(BackendEvent::ThreadLoadFailed {
                            thread_id,
                            error_code: err.code.clone(),
                            message: err.message.clone(),
                        });
                    }

                    let evicted_snapshot = {
                        let mut guard = timeline.lock().await;
                        (guard.evict_expired(unix_now_ms()) > 0).then(|| guard.snapshot())
                    };
                    if let Some(snapshot) = evicted_snapshot {
                        events.emit(BackendEvent::ThreadSnapshot(snapshot));
                    }

                    let backoff = (err.category == BackendErrorCategory::RateLimited).then(|| {
                        let delay = config.retry.delay_for_attempt(attempt, err.retry_after_ms);
                        attempt = attempt.saturating_add(1);
                        delay
                    });
                    events.emit(BackendEvent::PollStatus(PollStatus {
                        thread_id,
                        healthy: false,
                        lag_hint_ms: backoff.map(|delay| delay.as_millis() as u64),
                    }));

                    if let Some(delay) = backoff {
                        tokio::select! {
                            _ = stop_child.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        ticker.reset();
                    }
                }
            }
        }

        debug!(thread_id, "poller stopped");
    });

    PollHandle {
        thread_id,
        stop,
        refresh,
        task,
    }
}
