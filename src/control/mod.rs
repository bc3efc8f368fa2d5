//! Control module - CONNECT handshake and heart-beat negotiation.
//!
//! # Workflow
//!
//! 1. Client dials the broker
//! 2. Client sends CONNECT with `accept-version` and `heart-beat`
//! 3. Broker answers CONNECTED (or ERROR)
//! 4. Both sides settle on a version and heart-beat intervals
//! 5. Regular frames flow; the reader/writer tasks take over the stream
//!
//! # Example
//!
//! ```ignore
//! use stompwire_client::control::handshake;
//! use stompwire_client::ClientConfig;
//!
//! let config = ClientConfig::default();
//! let mut stream = tokio::net::TcpStream::connect(config.addr()).await?;
//! let done = handshake(&mut stream, &config).await?;
//! println!("negotiated STOMP {}", done.session.version);
//! ```

mod connect;
mod heartbeat;

pub use connect::{build_connect_frame, handshake, parse_connected, Handshake, SessionInfo};
pub use heartbeat::{format_heartbeat, negotiate_heartbeats, parse_heartbeat};
