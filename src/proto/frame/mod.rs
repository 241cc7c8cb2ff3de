//! RESP frame types.
//!
//! A [`Frame`] is one self-delimited unit of the wire protocol, either a
//! reply to a command or a server-initiated push message.

mod types;

pub use types::Frame;
