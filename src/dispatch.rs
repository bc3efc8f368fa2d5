//! Frame dispatcher: the read side of a connection.
//!
//! One task per connection reads bytes, decodes frames, and routes each
//! frame in wire order:
//!
//! | Frame | Route |
//! |-------|-------|
//! | MESSAGE | queue of the subscription named by `subscription` |
//! | ERROR with a live `subscription` | terminal message for that subscription |
//! | ERROR otherwise | terminal message for every subscription, loop stops |
//! | RECEIPT | waiter registered for its `receipt-id` |
//!
//! Delivery awaits queue space, so one full subscription queue stalls
//! the whole connection. When the loop stops for any reason, every
//! subscription still registered gets a terminal "connection lost"
//! message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

use crate::error::StompError;
use crate::protocol::{headers, Command, Frame, FrameBuffer};
use crate::subscription::{Message, ServerError, SubscriptionRegistry};

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Pending RECEIPT waiters keyed by receipt id.
///
/// Once closed, new waiters are refused immediately.
#[derive(Clone)]
pub struct Receipts {
    waiters: Arc<Mutex<Option<HashMap<String, oneshot::Sender<()>>>>>,
}

impl Default for Receipts {
    fn default() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }
}

impl Receipts {
    /// Register interest in `receipt`.
    ///
    /// After [`close`](Self::close) the returned receiver fails at once.
    pub fn wait_for(&self, receipt: impl Into<String>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Some(waiters) = self.lock().as_mut() {
            waiters.insert(receipt.into(), tx);
        }
        rx
    }

    /// Wake the waiter for `receipt`. Returns `false` if there was none.
    pub fn complete(&self, receipt: &str) -> bool {
        let waiter = self.lock().as_mut().and_then(|w| w.remove(receipt));
        match waiter {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Fail every current and future waiter.
    pub fn close(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<HashMap<String, oneshot::Sender<()>>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Flow {
    Continue,
    Stop(StompError),
}

/// Routes inbound frames of one connection.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    receipts: Receipts,
    addr: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        receipts: Receipts,
        addr: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            receipts,
            addr: addr.into(),
        }
    }

    /// Run until the connection ends, and return why it ended.
    ///
    /// `buffer` and `pending` continue where the handshake stopped.
    /// `liveness` bounds the silence tolerated between reads.
    pub async fn run<R>(
        self,
        reader: R,
        buffer: FrameBuffer,
        pending: Vec<Frame>,
        liveness: Option<Duration>,
    ) -> StompError
    where
        R: AsyncRead + Unpin,
    {
        let reason = self.serve(reader, buffer, pending, liveness).await;
        self.finish(reason).await
    }

    /// Route frames until the connection ends. Subscriptions are left
    /// registered; [`finish`](Self::finish) fails them.
    pub async fn serve<R>(
        &self,
        mut reader: R,
        mut buffer: FrameBuffer,
        pending: Vec<Frame>,
        liveness: Option<Duration>,
    ) -> StompError
    where
        R: AsyncRead + Unpin,
    {
        for frame in pending {
            if let Flow::Stop(reason) = self.route(frame).await {
                return reason;
            }
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = reader.read(&mut buf);
            let result = match liveness {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(result) => result,
                    Err(_) => return StompError::HeartbeatTimeout(limit),
                },
                None => read.await,
            };

            let n = match result {
                Ok(0) => return StompError::ConnectionClosed,
                Ok(n) => n,
                Err(e) => return StompError::Io(e),
            };

            let frames = match buffer.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => return e,
            };

            for frame in frames {
                if let Flow::Stop(reason) = self.route(frame).await {
                    return reason;
                }
            }
        }
    }

    /// Close receipts and the registry, then give every remaining
    /// subscription its terminal message.
    pub async fn finish(self, reason: StompError) -> StompError {
        let error = match &reason {
            StompError::Subscription(error) => error.clone(),
            other => ServerError::connection_lost(other),
        };

        self.receipts.close();

        let remaining = self.registry.drain();
        if !remaining.is_empty() {
            tracing::debug!(
                addr = %self.addr,
                subscriptions = remaining.len(),
                error = %error,
                "failing remaining subscriptions"
            );
        }
        for sink in remaining {
            sink.fail(error.clone()).await;
        }

        tracing::debug!(addr = %self.addr, reason = %reason, "read loop stopped");
        reason
    }

    async fn route(&self, frame: Frame) -> Flow {
        match frame.command {
            Command::Message => {
                self.on_message(frame).await;
                Flow::Continue
            }
            Command::Error => self.on_error(frame).await,
            Command::Receipt => {
                let receipt = frame.get(headers::RECEIPT_ID).unwrap_or_default();
                if !self.receipts.complete(receipt) {
                    tracing::debug!(receipt = %receipt, "unexpected receipt");
                }
                Flow::Continue
            }
            other => {
                tracing::debug!(command = %other, "ignoring frame");
                Flow::Continue
            }
        }
    }

    async fn on_message(&self, frame: Frame) {
        let Some(id) = frame.subscription() else {
            tracing::debug!(
                destination = %frame.destination(),
                "message without subscription dropped"
            );
            return;
        };

        let Some(sink) = self.registry.get(id) else {
            tracing::debug!(subscription = %id, "message for unknown subscription dropped");
            return;
        };

        let message = Message::from_frame(frame, sink.ack_mode());
        if !sink.deliver(message).await {
            tracing::debug!(
                subscription = %sink.id(),
                "message for completed subscription dropped"
            );
        }
    }

    async fn on_error(&self, frame: Frame) -> Flow {
        let sink = frame.subscription().and_then(|id| self.registry.remove(id));
        let error = ServerError::from_frame(frame);

        match sink {
            Some(sink) => {
                tracing::warn!(
                    subscription = %sink.id(),
                    destination = %sink.destination(),
                    error = %error,
                    "subscription error"
                );
                sink.fail(error).await;
                Flow::Continue
            }
            None => {
                tracing::warn!(addr = %self.addr, error = %error, "connection error");
                Flow::Stop(StompError::Subscription(error))
            }
        }
    }
}
