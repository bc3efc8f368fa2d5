//! Transport module - TCP dialing.
//!
//! The protocol layer only needs an `AsyncRead + AsyncWrite` stream; this
//! module produces one for a `host:port` broker address.

mod tcp;

pub use tcp::{broker_addr, dial};
