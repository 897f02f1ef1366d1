//! Connection lifecycle shared between connection tasks and the server sweep.
//!
//! A connection task owns its socket and buffers. The server only holds an
//! `Arc<dyn ConnectionBase>` and drives it from the periodic sweep: it reports
//! elapsed time, asks whether the connection is still alive, and stops it.
//! When an HTTP connection is upgraded, the handle of the new protocol driver
//! is handed to the server through the next `on_step` call.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::http::source::ServerLog;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Result of one sweep step.
pub struct StepOutcome {
    /// False once the connection task has finished.
    pub retain: bool,
    /// Driver that took over the socket, if the connection was upgraded.
    pub successor: Option<Arc<dyn ConnectionBase>>,
}

pub trait ConnectionBase: Send + Sync {
    /// Advances the idle clock by `elapsed`. Connections silent for longer
    /// than their limit are stopped.
    fn on_step(&self, elapsed: Duration) -> StepOutcome;

    /// Requests the connection to close. Pending socket I/O is cancelled.
    fn stop(&self);

    fn response_count(&self) -> u64;
}

/// Lifecycle state of one connection.
pub struct ConnectionControl {
    id: u64,
    silent_ms: AtomicU64,
    max_silent: Duration,
    finished: AtomicBool,
    stop_tx: watch::Sender<bool>,
    responses: AtomicU64,
    successor: Mutex<Option<Arc<dyn ConnectionBase>>>,
}

impl ConnectionControl {
    pub fn new(max_silent: Duration) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            silent_ms: AtomicU64::new(0),
            max_silent,
            finished: AtomicBool::new(false),
            stop_tx,
            responses: AtomicU64::new(0),
            successor: Mutex::new(None),
        })
    }

    /// Process-unique connection id, used by the server log.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resets the idle clock after socket traffic.
    pub fn touch(&self) {
        self.silent_ms.store(0, Ordering::Relaxed);
    }

    pub fn silent_time(&self) -> Duration {
        Duration::from_millis(self.silent_ms.load(Ordering::Relaxed))
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Marks the connection task as done; the next sweep drops it.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn add_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes the driver that took over this connection's socket.
    ///
    /// A successor published after `stop` is stopped right away.
    pub fn set_successor(&self, successor: Arc<dyn ConnectionBase>) {
        let mut slot = self.successor.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopped() {
            successor.stop();
        }
        *slot = Some(successor);
    }
}

impl ConnectionBase for ConnectionControl {
    fn on_step(&self, elapsed: Duration) -> StepOutcome {
        // `finished` is set after the successor is published; read it first
        // so a dropped connection always hands its successor over.
        let finished = self.is_finished();
        let successor = self
            .successor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let silent_ms = self
            .silent_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed)
            .saturating_add(elapsed_ms);
        if Duration::from_millis(silent_ms) > self.max_silent {
            self.stop();
        }

        StepOutcome {
            retain: !finished,
            successor,
        }
    }

    fn stop(&self) {
        // The flag flips under the successor lock, so a successor is either
        // parked before this point or stopped by `set_successor`.
        let successor = {
            let slot = self.successor.lock().unwrap_or_else(PoisonError::into_inner);
            self.stop_tx.send_replace(true);
            slot.clone()
        };
        if let Some(successor) = successor {
            successor.stop();
        }
    }

    fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }
}

/// Byte stream a connection can be moved onto after an upgrade.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// What an upgraded driver gets besides the socket.
pub struct UpgradeContext {
    pub connection_id: u64,
    pub peer: Option<SocketAddr>,
    pub log: Arc<dyn ServerLog>,
}

/// Takes over a socket after a successful protocol switch.
pub trait ProtocolUpgrade: Send {
    /// Starts the new driver. `leftover` holds bytes the HTTP parser had
    /// already received but not consumed.
    fn upgrade(
        self: Box<Self>,
        stream: BoxedStream,
        leftover: Vec<u8>,
        ctx: UpgradeContext,
    ) -> Arc<dyn ConnectionBase>;
}
