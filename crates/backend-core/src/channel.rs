//! Command and event plumbing between frontends, the runtime and pollers.
//!
//! Commands queue on a bounded channel drained by the single runtime task.
//! Events fan out to every subscriber; a subscriber that falls behind loses
//! the oldest events instead of stalling pollers, and recovers on the next
//! full thread snapshot.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{trace, warn};

use crate::types::{BackendCommand, BackendEvent};

pub const DEFAULT_COMMAND_BUFFER: usize = 128;
pub const DEFAULT_EVENT_BUFFER: usize = 512;

/// Subscriber side of the event fan-out.
pub type EventStream = broadcast::Receiver<BackendEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendChannelError {
    /// The runtime task has ended and dropped its command queue.
    #[error("backend runtime has stopped; '{0}' was not delivered")]
    RuntimeStopped(&'static str),
}

/// Cloneable event emitter held by the runtime and by each thread poller.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: broadcast::Sender<BackendEvent>,
}

impl EventSink {
    /// A sink together with its first subscriber.
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Deliver `event` to the current subscribers. Having none is normal
    /// between frontend restarts and is not reported.
    pub fn emit(&self, event: BackendEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => trace!(event = kind, receivers, "event emitted"),
            Err(_) => trace!(event = kind, "event dropped without subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventStream {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Command queue plus event sink, shared by a runtime and its handles.
#[derive(Clone, Debug)]
pub struct BackendChannels {
    command_tx: mpsc::Sender<BackendCommand>,
    events: EventSink,
}

impl BackendChannels {
    /// Build a channel set and return it with the runtime's command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<BackendCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (events, _) = EventSink::channel(event_buffer);
        (Self { command_tx, events }, command_rx)
    }

    pub fn with_default_capacity() -> (Self, mpsc::Receiver<BackendCommand>) {
        Self::new(DEFAULT_COMMAND_BUFFER, DEFAULT_EVENT_BUFFER)
    }

    /// Sink for a poller or another task that only emits.
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Queue a command, waiting while the runtime is busy.
    pub async fn send_command(&self, command: BackendCommand) -> Result<(), BackendChannelError> {
        let kind = command.kind();
        self.command_tx
            .send(command)
            .await
            .map_err(|_| BackendChannelError::RuntimeStopped(kind))
    }

    pub fn emit(&self, event: BackendEvent) {
        self.events.emit(event);
    }
}

/// Next event from `events`, stepping over any gap left by falling behind.
/// Returns `None` once every sender is gone.
pub async fn next_event(events: &mut EventStream) -> Option<BackendEvent> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber fell behind; oldest events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendLifecycleState, PollStatus};

    fn poll_status(thread_id: u64) -> BackendEvent {
        BackendEvent::PollStatus(PollStatus {
            thread_id,
            healthy: true,
            lag_hint_ms: None,
        })
    }

    #[tokio::test]
    async fn commands_reach_the_runtime_in_order() {
        let (channels, mut rx) = BackendChannels::new(8, 8);
        channels
            .send_command(BackendCommand::OpenThread { thread_id: 7 })
            .await
            .expect("open should queue");
        channels
            .send_command(BackendCommand::RefreshThread { thread_id: 7 })
            .await
            .expect("refresh should queue");

        assert_eq!(
            rx.recv().await,
            Some(BackendCommand::OpenThread { thread_id: 7 })
        );
        assert_eq!(
            rx.recv().await,
            Some(BackendCommand::RefreshThread { thread_id: 7 })
        );
    }

    #[tokio::test]
    async fn poller_sinks_reach_every_subscriber() {
        let (channels, _rx) = BackendChannels::with_default_capacity();
        let mut console = channels.subscribe();
        let mut runtime = channels.subscribe();
        let poller = channels.events();

        poller.emit(BackendEvent::StateChanged {
            state: BackendLifecycleState::Authenticated,
        });

        let seen_by_console = next_event(&mut console).await.expect("console event");
        let seen_by_runtime = next_event(&mut runtime).await.expect("runtime event");
        assert_eq!(seen_by_console, seen_by_runtime);
        assert_eq!(poller.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn stopped_runtime_names_the_lost_command() {
        let (channels, rx) = BackendChannels::new(1, 1);
        drop(rx);

        let err = channels
            .send_command(BackendCommand::ListThreads)
            .await
            .expect_err("send must fail once the runtime is gone");
        assert_eq!(err, BackendChannelError::RuntimeStopped("list_threads"));
        assert!(err.to_string().contains("list_threads"));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_retained_events() {
        let (sink, mut slow) = EventSink::channel(2);
        for thread_id in 1..=4 {
            sink.emit(poll_status(thread_id));
        }

        assert_eq!(next_event(&mut slow).await, Some(poll_status(3)));
        assert_eq!(next_event(&mut slow).await, Some(poll_status(4)));
    }

    #[tokio::test]
    async fn stream_ends_when_all_sinks_are_dropped() {
        let (sink, mut events) = EventSink::channel(4);
        sink.emit(BackendEvent::SessionExpired);
        drop(sink);

        assert_eq!(next_event(&mut events).await, Some(BackendEvent::SessionExpired));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let (channels, _rx) = BackendChannels::new(1, 1);
        channels.emit(BackendEvent::SessionExpired);
        assert_eq!(channels.events().subscriber_count(), 0);
    }
}
