//! # stompwire-client
//!
//! Resilient STOMP subscription client.
//!
//! The client keeps a subscription alive across broker restarts and
//! network failures: a [`Supervisor`] dials, hands the session to a task,
//! disconnects when the task ends, and starts over. Inside a session,
//! inbound frames are routed to per-subscription bounded queues, and
//! every subscription ends exactly once, with broker errors delivered to
//! the consumer as a final message rather than lost.
//!
//! ## Architecture
//!
//! - **Reader** (one task per connection): decodes frames and routes
//!   MESSAGE / ERROR / RECEIPT ([`dispatch`])
//! - **Writer** (one task per connection): writes SUBSCRIBE, ACK, ... in
//!   submission order and emits heart-beats ([`writer`])
//! - **Consumer**: drains a [`Subscription`] and acknowledges
//!   ([`consumer`])
//!
//! ## Example
//!
//! ```ignore
//! use stompwire_client::consumer::listen;
//! use stompwire_client::{ClientConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::default().with_destination("/topic/fedora");
//!     let destination = config.destination.clone();
//!     let ack_mode = config.ack_mode;
//!
//!     Supervisor::new(config)
//!         .run(move |connection| {
//!             listen(connection, destination.clone(), ack_mode, |message| {
//!                 println!("{:?}", message.body);
//!             })
//!         })
//!         .await;
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod subscription;
pub mod supervisor;
pub mod transport;
pub mod writer;

mod client;

pub use client::{build_ack_frame, Connection, ConnectionState};
pub use config::{ClientConfig, HeartbeatConfig, RetryPolicy};
pub use error::{Result, StompError};
pub use subscription::{AckMode, Message, ServerError, Subscription};
pub use supervisor::{Connect, Dialer, Session, Supervisor};
