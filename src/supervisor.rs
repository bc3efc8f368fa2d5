//! Connection supervisor.
//!
//! Wraps a unit of work (typically subscribe-and-consume) in a
//! connect / run / disconnect scope and repeats it forever:
//!
//! ```text
//! ┌──────────► connect ──fail──► sleep(retry) ──┐
//! │               │ ok                          │
//! │               ▼                   ◄─────────┘
//! │          task(session)   (own tokio task, panics caught)
//! │               │
//! │               ▼
//! │          disconnect      (exactly once, errors only logged)
//! │               │
//! └─ sleep(retry) ┘
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::watch;

use crate::client::{Connection, ConnectionState};
use crate::config::{ClientConfig, RetryPolicy};
use crate::error::{Result, StompError};

/// Boxed future for connector and session methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can open sessions.
pub trait Connect: Send + Sync {
    type Session: Session;

    /// One dial + handshake attempt.
    fn connect(&self) -> BoxFuture<'_, Result<Self::Session>>;
}

/// An open session the supervisor hands to the task.
pub trait Session: Clone + Send + Sync + 'static {
    fn disconnect(&self) -> BoxFuture<'_, Result<()>>;
}

impl Session for Connection {
    fn disconnect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(Connection::disconnect(self))
    }
}

/// Opens real [`Connection`]s from a [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct Dialer {
    config: ClientConfig,
}

impl Dialer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Connect for Dialer {
    type Session = Connection;

    fn connect(&self) -> BoxFuture<'_, Result<Connection>> {
        Box::pin(Connection::connect(&self.config))
    }
}

/// Runs tasks against sessions, reconnecting forever.
pub struct Supervisor<C: Connect> {
    connector: C,
    retry: RetryPolicy,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor<Dialer> {
    /// Supervisor over real broker connections.
    pub fn new(config: ClientConfig) -> Self {
        let retry = config.retry;
        Self::with_connector(Dialer::new(config), retry)
    }
}

impl<C: Connect> Supervisor<C> {
    pub fn with_connector(connector: C, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            retry,
            state,
        }
    }

    /// Follow the state of the current session.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Connect, retrying with no attempt cap.
    async fn connect(&self) -> C::Session {
        let mut attempt: u32 = 0;
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            match self.connector.connect().await {
                Ok(session) => {
                    self.state.send_replace(ConnectionState::Connected);
                    return session;
                }
                Err(e) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        retry_in = ?delay,
                        "could not connect"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Connect, run `task` once, disconnect.
    ///
    /// The task runs on its own tokio task; a panic comes back as
    /// [`StompError::TaskPanicked`]. The session is disconnected exactly
    /// once whatever the task returns. A disconnect failure is logged and
    /// never replaces the task's result.
    pub async fn perform<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(C::Session) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let session = self.connect().await;

        let result = match tokio::spawn(task(session.clone())).await {
            Ok(result) => result,
            Err(e) => Err(StompError::TaskPanicked(e.to_string())),
        };

        self.state.send_replace(ConnectionState::Closing);
        if let Err(e) = session.disconnect().await {
            tracing::warn!(error = %e, "disconnect failed");
        }
        self.state.send_replace(ConnectionState::Disconnected);

        result
    }

    /// Run `task` under [`perform`](Self::perform) forever.
    pub async fn run<F, Fut>(&self, mut task: F) -> Infallible
    where
        F: FnMut(C::Session) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        loop {
            match self.perform(&mut task).await {
                Ok(()) => tracing::info!("task finished, restarting"),
                Err(e) => tracing::error!(error = %e, "task error, restarting"),
            }
            tokio::time::sleep(self.retry.delay(0)).await;
        }
    }
}
