use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Semaphore;

use super::task::AsyncTask;

/// The sending half of a provider's rendezvous inbox.
///
/// A send may only happen after claiming a readiness permit, and the
/// receiving side posts one permit exactly when it is blocked on receive
/// with a free worker slot. "I can take work" is therefore implicit in
/// claim success, which is the linchpin of the placement algorithm: a task
/// never sits buffered at a busy provider while others are idle.
pub struct Inbox {
    ready: Semaphore,
    conduit: mpsc::Sender<Box<AsyncTask>>,
}

/// The receiving half, held by the provider's acceptor loop.
pub struct InboxReceiver {
    conduit: mpsc::Receiver<Box<AsyncTask>>,
}

/// Create a connected inbox pair.
pub fn channel() -> (Arc<Inbox>, InboxReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        Arc::new(Inbox { ready: Semaphore::new(0), conduit: tx }),
        InboxReceiver { conduit: rx },
    )
}

impl Inbox {
    /// Announce readiness for exactly one task. Called by the receiver
    /// after acquiring a worker slot, right before blocking on receive.
    pub fn post_ready(&self) {
        self.ready.add_permits(1);
    }

    /// Whether the receiver is currently blocked on receive.
    pub fn is_waiting(&self) -> bool {
        self.ready.available_permits() > 0
    }

    /// Claim posted readiness without blocking.
    pub fn try_claim(&self) -> bool {
        match self.ready.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Wait to claim readiness. A closed inbox never resolves; the caller
    /// always races this against a timeout.
    pub async fn claim(&self) {
        match self.ready.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => std::future::pending().await,
        }
    }

    /// Hand over a task after a successful claim. Returns the task when
    /// the receiver is gone (provider closed mid-race); a full conduit
    /// despite a claimed permit is a protocol violation and panics.
    pub fn send_claimed(&self, task: Box<AsyncTask>) -> Result<(), Box<AsyncTask>> {
        match self.conduit.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(task)) => Err(task),
            Err(TrySendError::Full(_)) => {
                panic!("inbox conduit full despite claimed readiness")
            }
        }
    }

    /// Stop accepting claims; pending `claim` futures park forever and
    /// `try_claim` fails from here on.
    pub fn close(&self) {
        self.ready.close();
    }
}

impl InboxReceiver {
    pub async fn recv(&mut self) -> Option<Box<AsyncTask>> {
        self.conduit.recv().await
    }
}
