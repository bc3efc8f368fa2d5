//! TCP dialing with a bounded connect time.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use stompwire_client::transport::{broker_addr, dial};
//!
//! let stream = dial(&broker_addr("localhost", 61613), Duration::from_secs(5)).await?;
//! ```

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Result, StompError};

/// Format a broker address as `host:port`, bracketing IPv6 literals.
pub fn broker_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Open a TCP connection to `addr`, failing after `timeout`.
///
/// Nagle is disabled: STOMP frames are small and ACKs should leave
/// immediately.
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| StompError::ConnectTimeout(timeout))??;

    stream.set_nodelay(true)?;
    tracing::debug!(addr, "tcp connection established");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_broker_addr() {
        assert_eq!(broker_addr("localhost", 61613), "localhost:61613");
        assert_eq!(broker_addr("10.0.0.7", 61613), "10.0.0.7:61613");
        assert_eq!(broker_addr("::1", 61613), "[::1]:61613");
        assert_eq!(broker_addr("[::1]", 61613), "[::1]:61613");
    }

    #[tokio::test]
    async fn test_dial_ipv6_literal() {
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        dial(&broker_addr("::1", port), Duration::from_secs(2)).await.unwrap();
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        let stream = dial(&addr, Duration::from_secs(2)).await.unwrap();

        assert!(stream.nodelay().unwrap());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = dial(&addr, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(StompError::Io(_))));
    }
}
