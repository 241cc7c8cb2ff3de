//! # Remux Core
//!
//! Connection handling and multiplexing logic for the remux Redis client.
//! One logical [`Connection`] owns one transport and pipelines every
//! concurrently-issued request over it.
//!
//! ## Modules
//!
//! - [`config`] - Connection configuration
//! - [`request`] - Request and response types
//! - [`queue`] - Ordered pending/in-flight request queue
//! - [`transport`] - Plain and TLS byte streams, resolution, authentication
//! - [`multiplexed`] - The run-loop state machine
//! - [`backoff`] - Reconnect delay policy

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};

pub use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

/// Connection configuration.
pub mod config;
/// Request and response types.
pub mod request;

pub(crate) mod backoff;
pub(crate) mod multiplexed;
pub(crate) mod queue;
pub(crate) mod transport;

cfg_if::cfg_if! {
    if #[cfg(feature = "tls")] {
        mod tls;
        pub use tls::VerifyHook;
    }
}

use crate::core::config::Config;
use crate::core::multiplexed::Op;
use crate::core::queue::PendingEntry;
use crate::core::request::{Request, Response};
use crate::core::transport::ConnectOptions;

/// Push messages buffered when the receiver lags; beyond this they are
/// dropped rather than stalling the run loop.
const PUSH_CHANNEL_CAPACITY: usize = 128;

/// Where the connection currently is in its lifecycle.
///
/// Transitions are linear along the forward path; `Ready` and
/// `Reconnecting` may cycle indefinitely. `Canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, [`Connection::run`] not yet called.
    Idle,
    /// Resolving the configured host.
    Resolving,
    /// Attempting TCP connects to resolved addresses.
    Connecting,
    /// Performing the TLS handshake.
    Handshaking,
    /// Running the AUTH / SELECT exchange.
    Authenticating,
    /// Serving requests.
    Ready,
    /// Transport lost; waiting out the backoff delay.
    Reconnecting,
    /// Shut down; every outstanding request has been resolved.
    Canceled,
}

pub(crate) struct Shared {
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    pub(crate) push_tx: mpsc::Sender<Frame>,
    push_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    ops_rx: Mutex<Option<mpsc::UnboundedReceiver<Op>>>,
    next_id: AtomicU64,
}

/// A handle to one logical server connection.
///
/// The handle is cheap to clone and may be shared across tasks; every
/// operation is marshaled onto the connection's run loop, so no two flows
/// of control ever race on its internal state. The loop itself is driven
/// by [`run`](Connection::run), typically from a spawned task.
///
/// # Example
///
/// ```no_run
/// use remux::{Config, Connection, Request};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_url("redis://localhost:6379")?;
///     let conn = Connection::new();
///
///     let runner = conn.clone();
///     tokio::spawn(async move { runner.run(config).await });
///
///     let mut req = Request::new();
///     req.push("PING", &["hello"]);
///     let resp = conn.execute(req).await?;
///     assert_eq!(resp.frames().len(), 1);
///
///     conn.cancel();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    ops: mpsc::UnboundedSender<Op>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates a connection handle. Nothing happens on the network until
    /// [`run`](Connection::run) is called.
    pub fn new() -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (push_tx, push_rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            ops: ops_tx,
            shared: Arc::new(Shared {
                state_tx,
                state_rx,
                push_tx,
                push_rx: Mutex::new(Some(push_rx)),
                ops_rx: Mutex::new(Some(ops_rx)),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Submits a request without waiting for its completion.
    ///
    /// Submission is legal in any state and never blocks: during an outage
    /// the request is buffered and written once the connection is Ready
    /// again. Await the returned handle for the [`Response`]; dropping the
    /// handle abandons only the wait, the request itself is still serviced.
    pub fn submit(&self, request: Request) -> ExecHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry::user(id, &request, tx);
        if self.ops.send(Op::Submit(entry)).is_err() {
            // Run loop already finished; dropping the entry resolves the
            // handle with Canceled.
        }
        ExecHandle {
            id,
            ops: self.ops.clone(),
            rx,
        }
    }

    /// Submits a request and waits for its completion.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.submit(request).await
    }

    /// Runs the connection until [`cancel`](Connection::cancel) is called
    /// (returns `Ok`) or, with reconnection disabled, until the first
    /// connection-fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when called a second time on the
    /// same logical connection.
    pub async fn run(&self, config: Config) -> Result<()> {
        self.run_inner(config, ConnectOptions::default()).await
    }

    /// Like [`run`](Connection::run), with a certificate-verification hook
    /// consulted during every TLS handshake.
    #[cfg(feature = "tls")]
    pub async fn run_with_verifier(&self, config: Config, hook: VerifyHook) -> Result<()> {
        self.run_inner(
            config,
            ConnectOptions {
                verify_hook: Some(hook),
            },
        )
        .await
    }

    async fn run_inner(&self, config: Config, options: ConnectOptions) -> Result<()> {
        let rx = self
            .shared
            .ops_rx
            .lock()
            .expect("ops receiver lock poisoned")
            .take()
            .ok_or_else(|| Error::InvalidArgument {
                message: "run may only be called once per connection".to_string(),
            })?;
        multiplexed::run_loop(self.shared.clone(), rx, config, options).await
    }

    /// Requests full shutdown. Idempotent, never an error, legal in any
    /// state. Every pending and in-flight request resolves with
    /// [`Error::Canceled`] and the transport is closed.
    pub fn cancel(&self) {
        let _ = self.ops.send(Op::Shutdown);
    }

    /// The connection's current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    /// A watch receiver that observes every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    /// Takes the receiver for server-initiated push messages. Returns
    /// `None` on every call after the first. While no receiver exists (or
    /// once it lags too far behind) push messages are dropped.
    pub fn push_messages(&self) -> Option<mpsc::Receiver<Frame>> {
        self.shared
            .push_rx
            .lock()
            .expect("push receiver lock poisoned")
            .take()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The caller's side of a submitted request.
///
/// Await it for the [`Response`]. [`cancel`](ExecHandle::cancel) cancels
/// the request itself: immediately if still pending, or by failing its
/// reply slot once its turn arrives if already written.
pub struct ExecHandle {
    id: u64,
    ops: mpsc::UnboundedSender<Op>,
    rx: oneshot::Receiver<Result<Response>>,
}

impl ExecHandle {
    /// Identifier of the submitted request, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancels the underlying request. The handle still resolves, with
    /// [`Error::Canceled`] or with a response that already arrived.
    pub fn cancel(&self) {
        let _ = self.ops.send(Op::CancelRequest(self.id));
    }
}

impl Future for ExecHandle {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| match r {
            Ok(result) => result,
            Err(_) => Err(Error::Canceled),
        })
    }
}

impl fmt::Debug for ExecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecHandle").field("id", &self.id).finish()
    }
}
