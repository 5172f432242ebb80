//! Connection runtime shared by the protocol listeners.
//!
//! [`serve`] runs one accept loop: every connection gets its own task, the
//! number of live sessions is capped by a semaphore, and a [`Shutdown`]
//! signal stops accepting and drains sessions within a grace period.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Delay before accepting again after `accept` fails.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Receiving half of the server-wide shutdown flag.
///
/// Cloned into every session so idle sessions can say goodbye and close.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Holds the sender of a `never` receiver so the channel stays open.
    _idle: Option<Arc<watch::Sender<bool>>>,
}

/// Sending half of the shutdown flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Flip the flag. Every [`Shutdown::recv`] completes.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// A new receiver for this trigger.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
            _idle: None,
        }
    }
}

impl Shutdown {
    /// Create a linked trigger and receiver.
    #[must_use]
    pub fn channel() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Self { rx, _idle: None })
    }

    /// A receiver that never fires, for sessions run outside a listener.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _idle: Some(Arc::new(tx)),
        }
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Returns immediately if it already was. A dropped trigger counts as a
    /// shutdown request.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}

/// Limits for one accept loop.
#[derive(Debug, Clone, Copy)]
pub struct ServeOptions {
    /// Concurrent session limit.
    pub max_connections: usize,
    /// How long to wait for sessions after shutdown before aborting them.
    pub grace: Duration,
}

/// Accept connections on `listener` until `shutdown` fires.
///
/// Each connection runs `handler` in its own task, holding a semaphore
/// permit for its lifetime; when the limit is reached the loop stops
/// accepting until a session ends. After shutdown the listener is dropped,
/// sessions get `options.grace` to finish, and the rest are aborted.
pub async fn serve<F, Fut>(
    listener: TcpListener,
    mut shutdown: Shutdown,
    options: ServeOptions,
    handler: F,
) where
    F: Fn(TcpStream, SocketAddr, Shutdown) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let local = listener.local_addr().ok();
    let semaphore = Arc::new(Semaphore::new(options.max_connections.max(1)));
    let handler = Arc::new(handler);
    let mut sessions = JoinSet::new();

    loop {
        // Reap finished sessions so the set does not grow without bound.
        while let Some(done) = sessions.try_join_next() {
            log_join(done);
        }

        let permit = tokio::select! {
            () = shutdown.recv() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            () = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                info!("Accepted connection from {peer}");
                let handler = Arc::clone(&handler);
                let session_shutdown = shutdown.clone();
                sessions.spawn(async move {
                    let _permit = permit;
                    handler(stream, peer, session_shutdown).await;
                    debug!("Connection from {peer} closed");
                });
            }
            Err(e) => {
                warn!("Accept failed: {e}");
                if !back_off(&mut shutdown).await {
                    break;
                }
            }
        }
    }

    drop(listener);
    if let Some(local) = local {
        info!(
            "Listener {local} stopped; waiting for {} session(s)",
            sessions.len()
        );
    }

    let drained = tokio::time::timeout(options.grace, async {
        while let Some(done) = sessions.join_next().await {
            log_join(done);
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "Grace period elapsed; aborting {} session(s)",
            sessions.len()
        );
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

/// Pause after a failed `accept`, such as when the process is out of file
/// descriptors. Returns false if shutdown arrived first.
async fn back_off(shutdown: &mut Shutdown) -> bool {
    tokio::select! {
        () = shutdown.recv() => false,
        () = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        warn!("Session task panicked: {e}");
    }
}
