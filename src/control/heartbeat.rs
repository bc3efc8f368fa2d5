//! Heart-beat header parsing and negotiation.
//!
//! The `heart-beat` header carries two millisecond values, `cx,cy`:
//! the smallest interval at which the sender can emit heart-beats, and the
//! interval at which it wants to receive them. Zero means "cannot" /
//! "does not want".

use std::time::Duration;

use crate::error::{Result, StompError};

/// Format intervals as a `heart-beat` header value.
pub fn format_heartbeat(send: Duration, receive: Duration) -> String {
    format!("{},{}", send.as_millis(), receive.as_millis())
}

/// Parse a `heart-beat` header value into `(send, receive)`.
pub fn parse_heartbeat(value: &str) -> Result<(Duration, Duration)> {
    let (send, receive) = value
        .split_once(',')
        .ok_or_else(|| StompError::Protocol(format!("invalid heart-beat header {:?}", value)))?;

    let parse = |part: &str| {
        part.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| StompError::Protocol(format!("invalid heart-beat header {:?}", value)))
    };

    Ok((parse(send)?, parse(receive)?))
}

/// Settle the effective intervals.
///
/// `client` is what we advertised, `server` what CONNECTED answered.
/// Returns `(outgoing, incoming)`: how often we must send, and how often
/// we should expect to hear from the broker. Zero disables a direction.
pub fn negotiate_heartbeats(
    client: (Duration, Duration),
    server: (Duration, Duration),
) -> (Duration, Duration) {
    let (client_send, client_receive) = client;
    let (server_send, server_receive) = server;

    let outgoing = if client_send.is_zero() || server_receive.is_zero() {
        Duration::ZERO
    } else {
        client_send.max(server_receive)
    };

    let incoming = if client_receive.is_zero() || server_send.is_zero() {
        Duration::ZERO
    } else {
        client_receive.max(server_send)
    };

    (outgoing, incoming)
}
