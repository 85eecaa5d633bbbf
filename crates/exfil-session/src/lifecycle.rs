//! Startup and teardown handshakes between the controller and the session.
//!
//! `ready`, `shutdown` and `stopped` are [`Rendezvous`] points: the
//! signalling side blocks until exactly one waiter takes the value.
//! `attached` is a [`Latch`] that fires at most once per session and never
//! blocks the target that trips it.

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ShutdownCause;

type Handoff<T> = (T, oneshot::Sender<()>);

/// Unbuffered handoff: `signal` returns once a `wait` has consumed the value.
pub struct Rendezvous<T> {
    tx: mpsc::Sender<Handoff<T>>,
    rx: Mutex<mpsc::Receiver<Handoff<T>>>,
    closed: CancellationToken,
}

impl<T: Send> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Rendezvous<T> {
    /// An open rendezvous point.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Hand `value` to one waiter. Returns `false` if the point was closed
    /// before a waiter took it.
    pub async fn signal(&self, value: T) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            () = self.closed.cancelled() => false,
            taken = async {
                self.tx.send((value, ack_tx)).await.is_ok() && ack_rx.await.is_ok()
            } => taken,
        }
    }

    /// Take the next signalled value. `None` once closed.
    pub async fn wait(&self) -> Option<T> {
        let mut rx = tokio::select! {
            () = self.closed.cancelled() => return None,
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            () = self.closed.cancelled() => None,
            item = rx.recv() => {
                let (value, ack) = item?;
                let _ = ack.send(());
                Some(value)
            }
        }
    }

    /// Refuse further handoffs and release every blocked caller.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// One-shot flag that later waiters observe immediately.
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// An unset latch.
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    /// Set the latch. Returns `true` only for the call that set it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    /// Whether the latch is set.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// The four session handshakes.
#[derive(Default)]
pub struct Lifecycle {
    ready: Rendezvous<()>,
    attached: Latch,
    shutdown: Rendezvous<Option<ShutdownCause>>,
    stopped: Rendezvous<Option<ShutdownCause>>,
}

impl Lifecycle {
    /// Fresh, unsignalled handshakes.
    pub fn new() -> Self {
        Self::default()
    }

    /// The harness saw the launch page attach; the controller may proceed.
    pub async fn signal_ready(&self) -> bool {
        self.ready.signal(()).await
    }

    /// Block until [`signal_ready`](Self::signal_ready).
    pub async fn wait_ready(&self) -> bool {
        self.ready.wait().await.is_some()
    }

    /// Record that a target finished attaching. Only the first call fires.
    pub fn signal_attached(&self) {
        if self.attached.fire() {
            debug!("first target attached");
        }
    }

    /// Block until any target has attached.
    pub async fn wait_attached(&self) {
        self.attached.wait().await;
    }

    /// Whether any target has attached.
    pub fn is_attached(&self) -> bool {
        self.attached.is_set()
    }

    /// Ask for an orderly shutdown. Blocks until the supervisor takes the
    /// request; returns `false` once shutdown is already under way.
    pub async fn request_shutdown(&self, cause: Option<ShutdownCause>) -> bool {
        self.shutdown.signal(cause).await
    }

    /// Block until a shutdown request arrives. `None` once closed.
    pub async fn wait_shutdown(&self) -> Option<Option<ShutdownCause>> {
        self.shutdown.wait().await
    }

    /// Reject later shutdown requests.
    pub fn close_shutdown(&self) {
        self.shutdown.close();
    }

    /// Confirm teardown finished, carrying the triggering cause.
    pub async fn signal_stopped(&self, cause: Option<ShutdownCause>) -> bool {
        self.stopped.signal(cause).await
    }

    /// Block until teardown finished. Returns the triggering cause.
    pub async fn wait_stopped(&self) -> Option<ShutdownCause> {
        self.stopped.wait().await.flatten()
    }
}
