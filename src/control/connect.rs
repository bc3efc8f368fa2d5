//! CONNECT / CONNECTED exchange.
//!
//! The handshake runs on the raw stream before the reader and writer
//! tasks exist. Bytes the broker sent after CONNECTED stay in the returned
//! [`FrameBuffer`] so the dispatcher starts exactly where the handshake
//! stopped.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::heartbeat::{format_heartbeat, negotiate_heartbeats, parse_heartbeat};
use crate::config::ClientConfig;
use crate::error::{Result, StompError};
use crate::protocol::{encode_frame, headers, Command, Frame, FrameBuffer, Version};

/// What the broker agreed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated protocol version.
    pub version: Version,
    /// How often we must send something (zero: never).
    pub heartbeat_out: Duration,
    /// How often the broker promised to send something (zero: never).
    pub heartbeat_in: Duration,
    /// `server` header of CONNECTED.
    pub server: Option<String>,
    /// `session` header of CONNECTED.
    pub session: Option<String>,
}

/// Result of a successful handshake.
pub struct Handshake {
    pub session: SessionInfo,
    /// Decoder state, including any bytes received after CONNECTED.
    pub buffer: FrameBuffer,
    /// Frames that arrived in the same read as CONNECTED.
    pub pending: Vec<Frame>,
}

/// Build the CONNECT frame advertised to the broker.
pub fn build_connect_frame(config: &ClientConfig) -> Frame {
    let versions = config
        .versions
        .iter()
        .map(Version::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let mut frame = Frame::new(Command::Connect)
        .header(headers::ACCEPT_VERSION, versions)
        .header(headers::HOST, config.virtual_host())
        .header(
            headers::HEART_BEAT,
            format_heartbeat(config.heartbeat.send, config.heartbeat.receive),
        );

    if let Some(login) = &config.login {
        frame = frame.header(headers::LOGIN, login.as_str());
    }
    if let Some(passcode) = &config.passcode {
        frame = frame.header(headers::PASSCODE, passcode.as_str());
    }
    frame
}

/// Interpret the broker's answer to CONNECT.
pub fn parse_connected(frame: &Frame, config: &ClientConfig) -> Result<SessionInfo> {
    match frame.command {
        Command::Connected => {}
        Command::Error => {
            let message = frame
                .get(headers::MESSAGE)
                .map(str::to_string)
                .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned());
            return Err(StompError::Server(message));
        }
        other => {
            return Err(StompError::Protocol(format!(
                "expected CONNECTED, got {}",
                other
            )))
        }
    }

    let version = match frame.get(headers::VERSION) {
        Some(value) => Version::parse(value)
            .ok_or_else(|| StompError::Protocol(format!("unsupported version {:?}", value)))?,
        None => Version::V1_0,
    };
    if !config.versions.contains(&version) {
        return Err(StompError::Protocol(format!(
            "broker chose version {} which was not offered",
            version
        )));
    }

    let server_heartbeat = frame
        .get(headers::HEART_BEAT)
        .map(parse_heartbeat)
        .transpose()?
        .unwrap_or((Duration::ZERO, Duration::ZERO));

    let (heartbeat_out, heartbeat_in) = negotiate_heartbeats(
        (config.heartbeat.send, config.heartbeat.receive),
        server_heartbeat,
    );

    Ok(SessionInfo {
        version,
        heartbeat_out,
        heartbeat_in,
        server: frame.get(headers::SERVER).map(str::to_string),
        session: frame.get(headers::SESSION).map(str::to_string),
    })
}

/// Send CONNECT and wait for CONNECTED on `stream`.
///
/// Not bounded in time; callers wrap it in `config.connect_timeout`.
pub async fn handshake<S>(stream: &mut S, config: &ClientConfig) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connect = build_connect_frame(config);
    stream
        .write_all(&encode_frame(&connect, Version::V1_0))
        .await?;
    stream.flush().await?;

    let mut buffer = FrameBuffer::with_max_frame_size(config.max_frame_size);
    let mut buf = vec![0u8; 8 * 1024];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(StompError::ConnectionClosed);
        }

        let mut frames = buffer.push(&buf[..n])?.into_iter();
        let Some(first) = frames.next() else {
            continue;
        };

        let session = parse_connected(&first, config)?;
        buffer.set_version(session.version);

        tracing::debug!(
            version = %session.version,
            heartbeat_out = ?session.heartbeat_out,
            heartbeat_in = ?session.heartbeat_in,
            server = session.server.as_deref().unwrap_or("unknown"),
            "handshake complete"
        );

        return Ok(Handshake {
            session,
            buffer,
            pending: frames.collect(),
        });
    }
}
