//! The event mirror: a multicast, FIFO, replayable-from-start stream.
//!
//! The producing compilation appends every reporter/logger event to its
//! mirror. Late subscribers attach a [`MirrorCursor`] that starts at the
//! beginning of the stream and yields events in exactly the order they
//! were appended, then observes the close. Subscribers hold read cursors
//! only; the sink side belongs to the producing compilation.
//!
//! The structure is a single-producer, multi-consumer log with
//! per-subscriber read positions, kept deliberately simple: a locked
//! vector plus a notifier. Compilation event streams are short (hundreds
//! of events) and replay correctness matters far more than throughput
//! here.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::event::CompileEvent;

#[derive(Default)]
struct MirrorState {
    events: Vec<CompileEvent>,
    closed: bool,
}

/// Multicast, FIFO, replayable-from-start stream of compilation events.
#[derive(Default)]
pub struct EventMirror {
    state: Mutex<MirrorState>,
    notify: Notify,
}

impl EventMirror {
    /// Creates an empty, open mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the stream.
    ///
    /// Appends after [`close`](Self::close) are dropped: the producing
    /// compilation has already published its end event and subscribers
    /// may have detached.
    pub fn append(&self, event: CompileEvent) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.events.push(event);
        }
        self.notify.notify_waiters();
    }

    /// Closes the stream. Subscribers drain the remaining events and then
    /// observe the end.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Returns `true` once the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of events appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Returns `true` if no events have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches a new subscriber cursor positioned at the start of the
    /// stream.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> MirrorCursor {
        MirrorCursor {
            mirror: Arc::clone(self),
            position: 0,
        }
    }
}

impl std::fmt::Debug for EventMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventMirror")
            .field("events", &state.events.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A subscriber's read position into an [`EventMirror`].
#[derive(Debug)]
pub struct MirrorCursor {
    mirror: Arc<EventMirror>,
    position: usize,
}

impl MirrorCursor {
    /// Waits for and returns the next event.
    ///
    /// Returns `None` once the stream is closed and fully drained. Every
    /// cursor observes the complete sequence from the start, in append
    /// order.
    pub async fn next(&mut self) -> Option<CompileEvent> {
        loop {
            // Register before checking so an append racing the check
            // still wakes this cursor.
            let notified = self.mirror.notify.notified();
            {
                let state = self.mirror.state.lock();
                if let Some(event) = state.events.get(self.position) {
                    self.position += 1;
                    return Some(event.clone());
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// The number of events this cursor has already yielded.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EndStatus, LogLevel};
    use smelt_core::ProjectId;

    fn log(message: &str) -> CompileEvent {
        CompileEvent::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn cursor_replays_from_start_in_order() {
        let mirror = Arc::new(EventMirror::new());
        mirror.append(log("one"));
        mirror.append(log("two"));

        let mut cursor = mirror.subscribe();
        assert_eq!(cursor.next().await, Some(log("one")));
        assert_eq!(cursor.next().await, Some(log("two")));

        mirror.append(log("three"));
        mirror.close();
        assert_eq!(cursor.next().await, Some(log("three")));
        assert_eq!(cursor.next().await, None);
    }

    #[tokio::test]
    async fn two_cursors_see_identical_sequences() {
        let mirror = Arc::new(EventMirror::new());
        let events = vec![log("a"), log("b"), log("c")];
        for event in &events {
            mirror.append(event.clone());
        }
        mirror.close();

        for _ in 0..2 {
            let mut cursor = mirror.subscribe();
            let mut seen = Vec::new();
            while let Some(event) = cursor.next().await {
                seen.push(event);
            }
            assert_eq!(seen, events);
        }
    }

    #[tokio::test]
    async fn cursor_blocks_until_append() {
        let mirror = Arc::new(EventMirror::new());
        let mut cursor = mirror.subscribe();

        let producer = Arc::clone(&mirror);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            producer.append(CompileEvent::Ended {
                project: ProjectId::new("a"),
                status: EndStatus::Ok,
            });
            producer.close();
        });

        assert!(matches!(
            cursor.next().await,
            Some(CompileEvent::Ended { .. })
        ));
        assert_eq!(cursor.next().await, None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn appends_after_close_are_dropped() {
        let mirror = Arc::new(EventMirror::new());
        mirror.append(log("kept"));
        mirror.close();
        mirror.append(log("dropped"));

        let mut cursor = mirror.subscribe();
        assert_eq!(cursor.next().await, Some(log("kept")));
        assert_eq!(cursor.next().await, None);
    }
}
