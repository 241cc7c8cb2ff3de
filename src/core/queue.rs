use std::collections::VecDeque;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;
use tracing::debug;

use crate::core::config::RedeliveryPolicy;
use crate::core::request::{Request, Response};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Internal id used for health probes, which are never exposed to callers.
const PROBE_ID: u64 = u64::MAX;

/// What a reply frame just finished, if anything.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completed {
    /// A user request was fully resolved.
    User,
    /// An internal health probe was answered.
    Probe,
}

/// A submitted request bound to its serialized bytes, the number of reply
/// frames still owed, and its completion handle.
///
/// Owned exclusively by the [`RequestQueue`]; created on submission and
/// destroyed on completion or terminal cancellation.
#[derive(Debug)]
pub(crate) struct PendingEntry {
    id: u64,
    bytes: Bytes,
    expected: usize,
    remaining: usize,
    frames: Vec<Frame>,
    completion: Option<oneshot::Sender<Result<Response>>>,
    canceled: bool,
}

impl PendingEntry {
    /// Wraps a caller-submitted request.
    pub(crate) fn user(
        id: u64,
        request: &Request,
        completion: oneshot::Sender<Result<Response>>,
    ) -> Self {
        let expected = request.expected_replies();
        Self {
            id,
            bytes: request.encode(),
            expected,
            remaining: expected,
            frames: Vec::with_capacity(expected),
            completion: Some(completion),
            canceled: false,
        }
    }

    /// Creates an internal PING probe entry. Probes have no completion
    /// handle and are invisible to callers.
    pub(crate) fn probe() -> Self {
        let mut request = Request::new();
        request.push::<&str>("PING", &[]);
        Self {
            id: PROBE_ID,
            bytes: request.encode(),
            expected: 1,
            remaining: 1,
            frames: Vec::new(),
            completion: None,
            canceled: false,
        }
    }

    fn is_probe(&self) -> bool {
        self.id == PROBE_ID
    }

    fn complete(&mut self, result: Result<Response>) {
        if let Some(tx) = self.completion.take() {
            // The caller may have dropped its wait; the request was still
            // serviced either way.
            let _ = tx.send(result);
        }
    }

    /// Resolves a fully-replied entry: canceled entries fail with
    /// `Canceled`, entries holding a server error frame fail with
    /// `Command`, everything else succeeds with the collected frames.
    fn finish(mut self) {
        if self.canceled {
            self.complete(Err(Error::Canceled));
            return;
        }
        if let Some(message) = self.frames.iter().find_map(|f| f.error_message()) {
            self.complete(Err(Error::Command { message }));
            return;
        }
        let frames = std::mem::take(&mut self.frames);
        self.complete(Ok(Response::new(frames)));
    }

    /// Resolves an entry that owes no reply frames, once its bytes have
    /// been written out.
    fn finish_written(mut self) {
        self.complete(Ok(Response::new(Vec::new())));
    }
}

/// The ordered request queue: `pending` holds submitted-but-unwritten
/// entries, `in_flight` holds written entries awaiting replies.
///
/// Invariant: `in_flight` order equals the order the requests were written
/// to the wire, which equals completion order. Frames are always fed to the
/// head; a frame with nothing in flight is a protocol violation.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    pending: VecDeque<PendingEntry>,
    in_flight: VecDeque<PendingEntry>,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to `pending`. Legal in any connection state.
    pub(crate) fn submit(&mut self, entry: PendingEntry) {
        self.pending.push_back(entry);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Moves every pending entry into `in_flight`, in order, and returns
    /// their bytes as one batched write. Entries owed no replies are
    /// returned separately; they complete once the write has succeeded.
    pub(crate) fn drain_pending(&mut self) -> Option<(Bytes, Vec<PendingEntry>)> {
        if self.pending.is_empty() {
            return None;
        }
        let mut buf = BytesMut::new();
        let mut written = Vec::new();
        while let Some(entry) = self.pending.pop_front() {
            buf.extend_from_slice(&entry.bytes);
            if entry.remaining == 0 {
                written.push(entry);
            } else {
                self.in_flight.push_back(entry);
            }
        }
        Some((buf.freeze(), written))
    }

    /// Completes entries that owed no reply frames after their write.
    pub(crate) fn complete_written(&mut self, written: Vec<PendingEntry>) {
        for entry in written {
            entry.finish_written();
        }
    }

    /// Feeds one reply frame to the head of `in_flight`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if no request is in flight; strict reply
    /// ordering makes that fatal to the connection.
    pub(crate) fn accept_frame(&mut self, frame: Frame) -> Result<Option<Completed>> {
        let head = self.in_flight.front_mut().ok_or_else(|| Error::Protocol {
            message: "reply received with no request in flight".to_string(),
        })?;
        head.frames.push(frame);
        head.remaining -= 1;
        if head.remaining > 0 {
            return Ok(None);
        }
        let entry = self
            .in_flight
            .pop_front()
            .expect("in_flight head exists");
        let kind = if entry.is_probe() {
            Completed::Probe
        } else {
            Completed::User
        };
        entry.finish();
        Ok(Some(kind))
    }

    /// Cancels a specific request.
    ///
    /// Pending entries are removed and failed immediately (nothing was
    /// written). In-flight entries are only marked: the wire offers no
    /// mid-stream cancel, so their reply slots are still consumed in order
    /// and the caller is failed when the turn arrives.
    pub(crate) fn cancel(&mut self, id: u64) {
        if let Some(idx) = self.pending.iter().position(|e| e.id == id) {
            let mut entry = self.pending.remove(idx).expect("index just found");
            debug!(id, "canceled pending request");
            entry.complete(Err(Error::Canceled));
        } else if let Some(entry) = self.in_flight.iter_mut().find(|e| e.id == id) {
            debug!(id, "marked in-flight request canceled");
            entry.canceled = true;
        }
    }

    /// Fails every entry in both queues. Used on full shutdown.
    pub(crate) fn fail_all(&mut self, err: impl Fn() -> Error) {
        for mut entry in self.pending.drain(..).chain(self.in_flight.drain(..)) {
            entry.complete(Err(err()));
        }
    }

    /// Applies the redelivery policy to `in_flight` after a transport
    /// failure. Probes are dropped, canceled entries are resolved, and the
    /// rest are either re-queued to the front of `pending` in original
    /// order (at-least-once) or failed outward (at-most-once).
    pub(crate) fn on_disconnect(&mut self, policy: RedeliveryPolicy) {
        match policy {
            RedeliveryPolicy::AtMostOnce => {
                for mut entry in self.in_flight.drain(..) {
                    if entry.is_probe() {
                        continue;
                    }
                    entry.complete(Err(Error::Io {
                        source: io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "connection lost with request in flight",
                        ),
                    }));
                }
            }
            RedeliveryPolicy::AtLeastOnce => {
                let mut requeue: Vec<PendingEntry> = Vec::new();
                for mut entry in self.in_flight.drain(..) {
                    if entry.is_probe() {
                        continue;
                    }
                    if entry.canceled {
                        entry.complete(Err(Error::Canceled));
                        continue;
                    }
                    entry.frames.clear();
                    entry.remaining = entry.expected;
                    requeue.push(entry);
                }
                for entry in requeue.into_iter().rev() {
                    self.pending.push_front(entry);
                }
            }
        }
    }
}
