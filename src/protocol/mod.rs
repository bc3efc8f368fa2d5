//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the STOMP text protocol:
//! - command tokens, header names and versions
//! - header escaping and frame encoding
//! - frame buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    encode_frame, escape, headers, unescape, Command, Version, DEFAULT_MAX_FRAME_SIZE, NUL,
};
