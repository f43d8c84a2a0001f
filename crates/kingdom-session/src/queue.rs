//! Per-session FIFO task queue.
//!
//! Mutating session operations (perform action, advance phase, toggle dev
//! mode, AI turns) must never interleave for the same session. Each session
//! keeps the tail of a chain of `oneshot` channels: enqueueing swaps in a new
//! tail and waits for the previous one to close before running the task.
//!
//! - Queue position is taken when [`SessionTaskQueue::enqueue`] is called,
//!   not when the returned future is first polled.
//! - A task's sender is dropped however the task ends (value, error or
//!   panic), so a failing task never wedges the queue.
//! - A task whose future is dropped before its turn hands the tail it was
//!   waiting on to its successor, so the tasks around it still never overlap.
//! - Sessions never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Completion signal of the most recently enqueued task for a session.
struct Tail {
    ticket: u64,
    done: oneshot::Receiver<Handoff>,
}

/// Sent by a task dropped before its turn: the tail it was still waiting on,
/// which its successor must now wait on instead. A task that finishes sends
/// nothing; dropping the sender is the completion signal.
struct Handoff(Tail);

#[derive(Default)]
struct QueueState {
    next_ticket: u64,
    tails: HashMap<String, Tail>,
}

/// Serializes asynchronous work per session id.
#[derive(Clone, Default)]
pub struct SessionTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl SessionTaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` behind all work previously enqueued for `session_id`.
    ///
    /// The returned future resolves to the task's own output, so errors reach
    /// exactly the caller that enqueued the failing task. Dropping the future
    /// gives its place up without letting later tasks overtake earlier ones.
    pub fn enqueue<F, T>(&self, session_id: &str, task: F) -> impl Future<Output = T> + use<F, T>
    where
        F: Future<Output = T>,
    {
        let (release, done) = oneshot::channel::<Handoff>();

        let (ticket, previous) = {
            let mut state = self.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let previous = state
                .tails
                .insert(session_id.to_string(), Tail { ticket, done });
            (ticket, previous)
        };

        tracing::trace!(session_id, ticket, waiting = previous.is_some(), "Enqueued session task");

        let mut slot = SlotGuard {
            queue: self.clone(),
            session_id: session_id.to_string(),
            ticket,
            previous,
            release: Some(release),
        };

        async move {
            while let Some(tail) = slot.previous.as_mut() {
                let handoff = (&mut tail.done).await;
                slot.previous = handoff.ok().map(|Handoff(earlier)| earlier);
            }
            task.await
        }
    }

    /// Session ids that currently have queued or running work.
    pub fn pending_sessions(&self) -> Vec<String> {
        self.lock().tails.keys().cloned().collect()
    }
}

/// Owns a task's place in its session's queue.
///
/// Dropped after the task finishes, it signals completion and prunes the
/// session's tail when nothing newer is queued. Dropped while still waiting,
/// it passes the tail it was waiting on to its successor.
struct SlotGuard {
    queue: SessionTaskQueue,
    session_id: String,
    ticket: u64,
    previous: Option<Tail>,
    release: Option<oneshot::Sender<Handoff>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        let is_tail = state
            .tails
            .get(&self.session_id)
            .is_some_and(|tail| tail.ticket == self.ticket);

        match self.previous.take() {
            None => {
                if is_tail {
                    state.tails.remove(&self.session_id);
                }
            }
            Some(previous) if is_tail => {
                state.tails.insert(self.session_id.clone(), previous);
            }
            Some(previous) => {
                if let Some(release) = self.release.take() {
                    // The successor may be gone too; then nobody is waiting.
                    let _ = release.send(Handoff(previous));
                }
            }
        }
    }
}
