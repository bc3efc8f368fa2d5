//! Completion state machine for one subscription.
//!
//! A subscription is `Active` while it holds the sending half of its
//! queue and `Completed` afterwards. Every transition happens under one
//! mutex, and every enqueue re-checks the state under that same mutex, so:
//!
//! - nothing is enqueued after completion,
//! - the queue sender is dropped exactly once,
//! - a terminal message, when there is one, is the last thing queued.
//!
//! The mutex is never held across an `.await`. Waiting for queue space
//! happens on a reserved permit, outside the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::{AckMode, Message, ServerError};

enum State {
    Active(mpsc::Sender<Message>),
    Completed,
}

/// Shared producer side of a subscription queue.
pub struct SubscriptionSink {
    id: String,
    destination: String,
    ack_mode: AckMode,
    state: Mutex<State>,
}

impl SubscriptionSink {
    /// Create an active sink and the receiving end of its bounded queue.
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        ack_mode: AckMode,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Arc::new(Self {
            id: id.into(),
            destination: destination.into(),
            ack_mode,
            state: Mutex::new(State::Active(tx)),
        });
        (sink, rx)
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.lock(), State::Completed)
    }

    /// Queue a regular message.
    ///
    /// Waits while the queue is full. Returns `false` if the message was
    /// dropped because the subscription completed first.
    pub async fn deliver(&self, message: Message) -> bool {
        let tx = match &*self.lock() {
            State::Active(tx) => tx.clone(),
            State::Completed => return false,
        };

        let permit = match tx.reserve_owned().await {
            Ok(permit) => permit,
            // Consumer dropped its receiver.
            Err(_) => return false,
        };

        let state = self.lock();
        match &*state {
            State::Active(_) => {
                permit.send(message);
                true
            }
            State::Completed => false,
        }
    }

    /// Complete without a terminal message.
    ///
    /// Returns `false` if the subscription had already completed.
    pub fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lock(), State::Completed);
        matches!(previous, State::Active(_))
    }

    /// Complete with a terminal message carrying `error`.
    ///
    /// Waits until the terminal message is queued, then closes the queue.
    /// Returns `false` (and delivers nothing) if already completed.
    pub async fn fail(&self, error: ServerError) -> bool {
        let tx = match std::mem::replace(&mut *self.lock(), State::Completed) {
            State::Active(tx) => tx,
            State::Completed => return false,
        };

        let terminal = Message::terminal(&self.id, &self.destination, self.ack_mode, error);
        if tx.send(terminal).await.is_err() {
            tracing::debug!(subscription = %self.id, "terminal message dropped, receiver gone");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubscriptionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSink")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("ack_mode", &self.ack_mode)
            .field("completed", &self.is_completed())
            .finish()
    }
}
