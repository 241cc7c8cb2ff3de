use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// A RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder handles streaming input and can decode frames incrementally.
/// Call [`append`](Decoder::append) to add data, then [`decode`](Decoder::decode)
/// to parse frames. Returns `Ok(None)` when more data is needed; no input is
/// consumed in that case, so decoding resumes correctly once more bytes
/// arrive, regardless of where the stream was split.
///
/// # Example
///
/// ```
/// use remux::proto::codec::Decoder;
/// use remux::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    ///
    /// # Arguments
    ///
    /// * `max_frame_size` - Maximum size in bytes for a single frame
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes to the internal buffer.
    ///
    /// Call this method when new data arrives from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Discards all buffered bytes, including any partial frame.
    ///
    /// Called when the underlying transport is replaced so that no stale
    /// partial frame survives a reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Attempts to decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(Frame))` if a complete frame was decoded.
    /// Returns `Ok(None)` if more data is needed (nothing consumed).
    /// Returns `Err(Error::Protocol)` if the data is malformed; the stream
    /// cannot be resynchronized after that.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(Error::Protocol {
                message: "buffer size exceeded maximum frame size".to_string(),
            });
        }

        // Bytes are only consumed once a complete top-level frame parsed, so
        // a partial aggregate never loses its already-scanned prefix.
        let mut pos = 0;
        match self.parse_frame(&mut pos)? {
            Some(frame) => {
                self.buf.advance(pos);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn parse_frame(&self, pos: &mut usize) -> Result<Option<Frame>> {
        let marker = match self.buf.get(*pos) {
            Some(b) => *b,
            None => return Ok(None),
        };
        match marker {
            b'+' => self.parse_simple_string(pos),
            b'-' => self.parse_error(pos),
            b':' => self.parse_integer(pos),
            b'$' => self.parse_bulk_string(pos),
            b'*' => self.parse_aggregate(pos, false),
            b'>' => self.parse_aggregate(pos, true),
            other => Err(Error::Protocol {
                message: format!("unknown frame type: {}", other as char),
            }),
        }
    }

    fn parse_simple_string(&self, pos: &mut usize) -> Result<Option<Frame>> {
        let line = match self.take_line(pos) {
            Some(line) => line,
            None => return Ok(None),
        };
        Ok(Some(Frame::SimpleString(line.to_vec())))
    }

    fn parse_error(&self, pos: &mut usize) -> Result<Option<Frame>> {
        let line = match self.take_line(pos) {
            Some(line) => line,
            None => return Ok(None),
        };
        Ok(Some(Frame::Error(line.to_vec())))
    }

    fn parse_integer(&self, pos: &mut usize) -> Result<Option<Frame>> {
        let line = match self.take_line(pos) {
            Some(line) => line,
            None => return Ok(None),
        };
        let num = parse_decimal(line)?;
        Ok(Some(Frame::Integer(num)))
    }

    fn parse_bulk_string(&self, pos: &mut usize) -> Result<Option<Frame>> {
        let len = match self.take_line(pos) {
            Some(line) => parse_decimal(line)?,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(Frame::BulkString(None)));
        }
        if len < 0 {
            return Err(Error::Protocol {
                message: format!("invalid bulk string length: {len}"),
            });
        }

        let len = len as usize;
        if len > self.max_frame_size {
            return Err(Error::Protocol {
                message: "bulk string length exceeds maximum frame size".to_string(),
            });
        }

        if self.buf.len() < *pos + len + 2 {
            return Ok(None);
        }
        if &self.buf[*pos + len..*pos + len + 2] != b"\r\n" {
            return Err(Error::Protocol {
                message: "bulk string not terminated by CRLF".to_string(),
            });
        }

        let data = Bytes::copy_from_slice(&self.buf[*pos..*pos + len]);
        *pos += len + 2;
        Ok(Some(Frame::BulkString(Some(data))))
    }

    fn parse_aggregate(&self, pos: &mut usize, push: bool) -> Result<Option<Frame>> {
        let len = match self.take_line(pos) {
            Some(line) => parse_decimal(line)?,
            None => return Ok(None),
        };

        if len == -1 {
            if push {
                return Err(Error::Protocol {
                    message: "push frame cannot be null".to_string(),
                });
            }
            return Ok(Some(Frame::Null));
        }
        if len < 0 {
            return Err(Error::Protocol {
                message: format!("invalid aggregate length: {len}"),
            });
        }

        let len = len as usize;
        // Assume a minimum of 16 bytes per element
        if len > self.max_frame_size / 16 {
            return Err(Error::Protocol {
                message: "aggregate length exceeds reasonable maximum".to_string(),
            });
        }

        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            match self.parse_frame(pos)? {
                Some(frame) => items.push(frame),
                None => return Ok(None),
            }
        }

        if push {
            Ok(Some(Frame::Push(items)))
        } else {
            Ok(Some(Frame::Array(items)))
        }
    }

    /// Takes one CRLF-terminated line starting after the type marker at
    /// `*pos`, advancing `*pos` past the terminator.
    ///
    /// # Returns
    ///
    /// The line content without marker or CRLF, or None if incomplete
    fn take_line(&self, pos: &mut usize) -> Option<&[u8]> {
        let start = *pos + 1;
        let mut i = start;
        while i + 1 < self.buf.len() {
            if self.buf[i] == b'\r' && self.buf[i + 1] == b'\n' {
                *pos = i + 2;
                return Some(&self.buf[start..i]);
            }
            i += 1;
        }
        None
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_decimal(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::Protocol {
            message: format!("invalid decimal: {:?}", String::from_utf8_lossy(line)),
        })
}
