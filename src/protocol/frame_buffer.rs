//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeaders`: skip heart-beat EOLs, need a full header block
//! - `WaitingForBody`: headers parsed, need the body and its NUL
//!
//! # Example
//!
//! ```
//! use stompwire_client::protocol::{Command, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(b"MESSAGE\nsubscription:sub-0\n").unwrap().is_empty());
//! let frames = buffer.push(b"\nhello\0").unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].command, Command::Message);
//! assert_eq!(&frames[0].body[..], b"hello");
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{headers, unescape, Command, Version, DEFAULT_MAX_FRAME_SIZE, NUL};
use super::Frame;
use crate::error::{Result, StompError};

/// State machine for frame parsing.
#[derive(Debug)]
enum State {
    /// Waiting for a complete command line + header block.
    WaitingForHeaders,
    /// Header block parsed, waiting for body bytes and the NUL.
    WaitingForBody {
        command: Command,
        headers: Vec<(String, String)>,
        content_length: Option<usize>,
    },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Header escaping follows the version set with [`set_version`]; before
/// the handshake completes that is 1.0 (no escaping).
///
/// [`set_version`]: FrameBuffer::set_version
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum size of a single frame.
    max_frame_size: usize,
    /// Version used for header unescaping.
    version: Version,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeaders,
            max_frame_size,
            version: Version::V1_0,
        }
    }

    /// Switch header unescaping to the negotiated version.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for malformed frames or frames larger than
    /// the configured maximum.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match std::mem::replace(&mut self.state, State::WaitingForHeaders) {
            State::WaitingForHeaders => {
                self.skip_heartbeats();

                let Some(end) = find_header_end(&self.buffer) else {
                    self.check_size()?;
                    return Ok(None);
                };

                let block = self.buffer.split_to(end);
                let (command, headers) = self.parse_header_block(&block)?;
                let content_length = parse_content_length(&headers)?;

                if let Some(len) = content_length {
                    if len > self.max_frame_size {
                        return Err(StompError::Protocol(format!(
                            "content-length {} exceeds maximum {}",
                            len, self.max_frame_size
                        )));
                    }
                }

                self.state = State::WaitingForBody {
                    command,
                    headers,
                    content_length,
                };
                self.try_extract_one()
            }

            State::WaitingForBody {
                command,
                headers,
                content_length,
            } => {
                let body_len = match content_length {
                    Some(len) => {
                        if self.buffer.len() <= len {
                            self.state = State::WaitingForBody {
                                command,
                                headers,
                                content_length,
                            };
                            return Ok(None);
                        }
                        if self.buffer[len] != NUL {
                            return Err(StompError::Protocol(format!(
                                "{} frame body not terminated by NUL after {} bytes",
                                command, len
                            )));
                        }
                        len
                    }
                    None => match self.buffer.iter().position(|&b| b == NUL) {
                        Some(pos) => pos,
                        None => {
                            self.check_size()?;
                            self.state = State::WaitingForBody {
                                command,
                                headers,
                                content_length,
                            };
                            return Ok(None);
                        }
                    },
                };

                let body = self.buffer.split_to(body_len).freeze();
                self.buffer.advance(1);

                Ok(Some(Frame {
                    command,
                    headers,
                    body,
                }))
            }
        }
    }

    /// Drop heart-beat EOLs (`\n` or `\r\n`) sitting between frames.
    fn skip_heartbeats(&mut self) {
        loop {
            if self.buffer.starts_with(b"\n") {
                self.buffer.advance(1);
            } else if self.buffer.starts_with(b"\r\n") {
                self.buffer.advance(2);
            } else {
                return;
            }
        }
    }

    fn check_size(&self) -> Result<()> {
        if self.buffer.len() > self.max_frame_size {
            return Err(StompError::Protocol(format!(
                "frame size {} exceeds maximum {}",
                self.buffer.len(),
                self.max_frame_size
            )));
        }
        Ok(())
    }

    fn parse_header_block(&self, block: &[u8]) -> Result<(Command, Vec<(String, String)>)> {
        let text = std::str::from_utf8(block)
            .map_err(|_| StompError::Protocol("frame headers are not UTF-8".to_string()))?;

        let mut lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line));

        let token = lines.next().unwrap_or_default();
        let command = Command::parse(token)
            .ok_or_else(|| StompError::Protocol(format!("unknown command {:?}", token)))?;

        let escaped = self.version.escapes_headers() && !command.is_handshake();
        let mut headers = Vec::new();

        for line in lines.filter(|line| !line.is_empty()) {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                StompError::Protocol(format!("malformed header line {:?}", line))
            })?;
            if escaped {
                headers.push((unescape(key, self.version)?, unescape(value, self.version)?));
            } else {
                headers.push((key.to_string(), value.to_string()));
            }
        }

        Ok((command, headers))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeaders => "WaitingForHeaders",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset just past the blank line that ends the header block.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|&b| b == b'\n') {
        let i = from + pos;
        match buf.get(i + 1) {
            Some(b'\n') => return Some(i + 2),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i + 3),
            _ => from = i + 1,
        }
    }
    None
}

fn parse_content_length(list: &[(String, String)]) -> Result<Option<usize>> {
    let Some((_, value)) = list.iter().find(|(k, _)| k == headers::CONTENT_LENGTH) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| StompError::Protocol(format!("invalid content-length {:?}", value)))
}
