use bytes::Bytes;

use crate::proto::codec::Encoder;
use crate::proto::frame::Frame;

/// Commands whose direct reply count is zero because their acknowledgements
/// arrive as push messages.
const PUSH_ONLY_COMMANDS: &[&str] = &["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE"];

/// An ordered sequence of commands submitted as one unit.
///
/// All commands in a request are written to the server in a single batch
/// (pipelined) and their replies are collected into one [`Response`] in the
/// order the commands were pushed. A request is immutable once submitted.
///
/// # Example
///
/// ```
/// use remux::Request;
///
/// let mut req = Request::new();
/// req.push("SET", &["key", "value"]);
/// req.push("GET", &["key"]);
/// assert_eq!(req.expected_replies(), 2);
/// ```
#[derive(Debug, Default)]
pub struct Request {
    commands: Vec<Command>,
}

#[derive(Debug)]
struct Command {
    args: Vec<Bytes>,
    expects_reply: bool,
}

impl Request {
    /// Creates an empty request.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command with the given name and arguments.
    ///
    /// Subscription-family commands (SUBSCRIBE, UNSUBSCRIBE and friends) are
    /// recorded as expecting no direct reply; their acknowledgements are
    /// delivered as push messages.
    pub fn push<T: AsRef<[u8]>>(&mut self, name: &str, args: &[T]) -> &mut Self {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Bytes::copy_from_slice(name.as_bytes()));
        for arg in args {
            all.push(Bytes::copy_from_slice(arg.as_ref()));
        }
        let expects_reply = !PUSH_ONLY_COMMANDS
            .iter()
            .any(|c| name.eq_ignore_ascii_case(c));
        self.commands.push(Command {
            args: all,
            expects_reply,
        });
        self
    }

    /// Number of commands in this request.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if no commands have been pushed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Total number of reply frames this request is owed.
    pub fn expected_replies(&self) -> usize {
        self.commands.iter().filter(|c| c.expects_reply).count()
    }

    /// Serializes every command as a RESP array of bulk strings into one
    /// contiguous byte sequence.
    pub(crate) fn encode(&self) -> Bytes {
        let mut encoder = Encoder::new();
        for command in &self.commands {
            let frame = Frame::Array(
                command
                    .args
                    .iter()
                    .map(|a| Frame::BulkString(Some(a.clone())))
                    .collect(),
            );
            encoder.encode(&frame);
        }
        encoder.take().freeze()
    }
}

/// The replies to a completed [`Request`], one frame per expected reply, in
/// the order the commands were pushed.
///
/// A response is only ever handed to the caller fully populated; partial
/// results are never exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    frames: Vec<Frame>,
}

impl Response {
    pub(crate) fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// All reply frames, in command order.
    #[inline]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// The reply for the command at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Consumes the response, returning the reply frames.
    #[inline]
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
