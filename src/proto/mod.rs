//! # Remux Proto
//!
//! RESP (Redis Serialization Protocol) codec implementation.
//! Provides encoding and decoding of Redis protocol messages, including
//! server-initiated push frames.
//!
//! ## Modules
//!
//! - [`codec`] - Encoder and decoder for RESP protocol
//! - [`error`] - Error types for client and protocol operations
//! - [`frame`] - Frame types representing RESP data structures

pub mod codec;
/// Error types.
pub mod error;
pub mod frame;
