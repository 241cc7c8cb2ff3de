use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::core::backoff::Backoff;
use crate::core::config::Config;
use crate::core::queue::{Completed, PendingEntry, RequestQueue};
use crate::core::transport::{ConnectOptions, Transport};
use crate::core::{ConnectionState, Shared};
use crate::proto::codec::Decoder;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const READ_BUF_SIZE: usize = 16 * 1024;

/// An operation marshaled onto the run loop. All external calls go through
/// this channel so the loop is the only flow of control touching the
/// queues, the decoder, and the transport.
pub(crate) enum Op {
    /// Enqueue a request.
    Submit(PendingEntry),
    /// Cancel a specific request by id.
    CancelRequest(u64),
    /// Tear the whole connection down.
    Shutdown,
}

#[derive(PartialEq, Eq)]
enum OpOutcome {
    Continue,
    Shutdown,
}

enum Flow {
    Shutdown,
    Failed(Error),
}

enum Pause {
    Elapsed,
    Shutdown,
}

/// Drives the connection state machine until canceled or, with
/// reconnection disabled, until the first connection-fatal error.
pub(crate) async fn run_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Op>,
    config: Config,
    options: ConnectOptions,
) -> Result<()> {
    let mut queue = RequestQueue::new();
    let mut backoff = Backoff::new(config.reconnect_min_delay, config.reconnect_max_delay);
    let mut decoder = Decoder::new();
    let mut read_buf = vec![0u8; READ_BUF_SIZE];

    loop {
        // Forward path: Resolving -> Connecting -> Handshaking ->
        // Authenticating. Ops keep being serviced while it runs.
        let established = {
            let establish = Transport::establish(&config, &options, &shared.state_tx);
            tokio::pin!(establish);
            loop {
                tokio::select! {
                    result = &mut establish => break result,
                    op = rx.recv() => {
                        if handle_op(&mut queue, op) == OpOutcome::Shutdown {
                            shutdown(&shared, &mut queue);
                            return Ok(());
                        }
                    }
                }
            }
        };

        let mut transport = match established {
            Ok(transport) => transport,
            Err(e) => {
                if !config.reconnect {
                    queue.fail_all(|| Error::Canceled);
                    return Err(e);
                }
                warn!(error = %e, "connection attempt failed, backing off");
                shared.state_tx.send_replace(ConnectionState::Reconnecting);
                match pause(&mut rx, &mut queue, backoff.next_delay()).await {
                    Pause::Shutdown => {
                        shutdown(&shared, &mut queue);
                        return Ok(());
                    }
                    Pause::Elapsed => continue,
                }
            }
        };

        info!(host = %config.host, port = config.port, "connection ready");
        decoder.reset();
        shared.state_tx.send_replace(ConnectionState::Ready);
        let connected_at = Instant::now();

        let flow = drive(
            &mut transport,
            &mut rx,
            &mut queue,
            &mut decoder,
            &mut read_buf,
            &config,
            &shared,
        )
        .await;
        transport.shutdown().await;

        match flow {
            Flow::Shutdown => {
                shutdown(&shared, &mut queue);
                return Ok(());
            }
            Flow::Failed(e) => {
                shared.state_tx.send_replace(ConnectionState::Reconnecting);
                queue.on_disconnect(config.redelivery);
                if !config.reconnect {
                    queue.fail_all(|| Error::Canceled);
                    return Err(e);
                }
                warn!(error = %e, "transport failed, reconnecting");
                if connected_at.elapsed() >= config.stability_threshold {
                    backoff.reset();
                }
                match pause(&mut rx, &mut queue, backoff.next_delay()).await {
                    Pause::Shutdown => {
                        shutdown(&shared, &mut queue);
                        return Ok(());
                    }
                    Pause::Elapsed => {}
                }
            }
        }
    }
}

/// The Ready steady state: drains pending requests into batched writes,
/// reads and dispatches reply frames in order, and interleaves liveness
/// probes without reordering user requests.
async fn drive(
    transport: &mut Transport,
    rx: &mut mpsc::UnboundedReceiver<Op>,
    queue: &mut RequestQueue,
    decoder: &mut Decoder,
    read_buf: &mut [u8],
    config: &Config,
    shared: &Shared,
) -> Flow {
    let health_enabled = !config.health_check_interval.is_zero();
    let period = if health_enabled {
        config.health_check_interval
    } else {
        Duration::from_secs(3600)
    };
    let mut health = time::interval_at(Instant::now() + period, period);
    health.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let mut last_read = Instant::now();
    let mut probe_sent: Option<Instant> = None;

    loop {
        // All pending requests share one write, and ideally one segment.
        if let Some((bytes, written)) = queue.drain_pending() {
            debug!(len = bytes.len(), "writing batched requests");
            if let Err(e) = transport.write_all(&bytes).await {
                return Flow::Failed(e.into());
            }
            queue.complete_written(written);
        }

        let probe_deadline = probe_sent.map(|sent| sent + config.health_check_timeout);

        tokio::select! {
            op = rx.recv() => {
                let mut outcome = handle_op(queue, op);
                // Batch whatever else is already queued before writing.
                while outcome == OpOutcome::Continue {
                    match rx.try_recv() {
                        Ok(next) => outcome = handle_op(queue, Some(next)),
                        Err(_) => break,
                    }
                }
                if outcome == OpOutcome::Shutdown {
                    return Flow::Shutdown;
                }
            }
            read = transport.read(read_buf) => {
                match read {
                    Ok(0) => {
                        return Flow::Failed(Error::Io {
                            source: io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "connection closed by server",
                            ),
                        });
                    }
                    Ok(n) => {
                        last_read = Instant::now();
                        decoder.append(&read_buf[..n]);
                        loop {
                            match decoder.decode() {
                                Ok(Some(Frame::Push(items))) => {
                                    debug!("push message received");
                                    if shared.push_tx.try_send(Frame::Push(items)).is_err() {
                                        debug!("dropping push message, no receiver");
                                    }
                                }
                                Ok(Some(frame)) => match queue.accept_frame(frame) {
                                    Ok(Some(Completed::Probe)) => probe_sent = None,
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!(error = %e, "reply ordering violated");
                                        return Flow::Failed(e);
                                    }
                                },
                                Ok(None) => break,
                                Err(e) => {
                                    error!(error = %e, "malformed frame");
                                    return Flow::Failed(e);
                                }
                            }
                        }
                    }
                    Err(e) => return Flow::Failed(e.into()),
                }
            }
            _ = async { time::sleep_until(probe_deadline.expect("guarded")).await },
                if probe_deadline.is_some() =>
            {
                warn!("liveness probe went unanswered");
                return Flow::Failed(Error::Timeout);
            }
            _ = health.tick(), if health_enabled => {
                if probe_sent.is_none()
                    && Instant::now().duration_since(last_read) >= config.health_check_interval
                {
                    debug!("issuing liveness probe");
                    queue.submit(PendingEntry::probe());
                    probe_sent = Some(Instant::now());
                }
            }
        }
    }
}

fn handle_op(queue: &mut RequestQueue, op: Option<Op>) -> OpOutcome {
    match op {
        Some(Op::Submit(entry)) => {
            queue.submit(entry);
            OpOutcome::Continue
        }
        Some(Op::CancelRequest(id)) => {
            queue.cancel(id);
            OpOutcome::Continue
        }
        // A closed channel means every handle is gone; nobody can observe
        // results anymore, so treat it like a cancel.
        Some(Op::Shutdown) | None => OpOutcome::Shutdown,
    }
}

/// Backoff delay that keeps servicing submit/cancel ops while sleeping.
async fn pause(
    rx: &mut mpsc::UnboundedReceiver<Op>,
    queue: &mut RequestQueue,
    delay: Duration,
) -> Pause {
    debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
    let deadline = Instant::now() + delay;
    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => return Pause::Elapsed,
            op = rx.recv() => {
                if handle_op(queue, op) == OpOutcome::Shutdown {
                    return Pause::Shutdown;
                }
            }
        }
    }
}

fn shutdown(shared: &Shared, queue: &mut RequestQueue) {
    debug!("connection canceled");
    queue.fail_all(|| Error::Canceled);
    shared.state_tx.send_replace(ConnectionState::Canceled);
}
