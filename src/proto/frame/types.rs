use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents all frame types the client can receive:
/// - SimpleString: Status responses like "OK"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data
/// - Array: Command arguments and array responses
/// - Null: NULL value
/// - Push: Server-initiated out-of-band message, not tied to any request
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
    /// Push message (>2\r\n...), e.g. a subscription notification.
    Push(Vec<Frame>),
}

impl Frame {
    /// Returns true if this frame is a server error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// Returns true if this frame is a push message.
    pub fn is_push(&self) -> bool {
        matches!(self, Frame::Push(_))
    }

    /// Returns true if this frame is Null.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Attempts to extract a bulk string payload from this frame.
    ///
    /// # Returns
    ///
    /// Some(Bytes) if this is a non-null BulkString, None otherwise
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Frame::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract an integer from this frame.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to view this frame as an array of frames.
    ///
    /// Push frames are arrays on the wire as well and are included here.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Frame::Array(a) | Frame::Push(a) => Some(a),
            _ => None,
        }
    }

    /// The server error message, if this frame is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Frame::Error(e) => Some(String::from_utf8_lossy(e).into_owned()),
            _ => None,
        }
    }
}
