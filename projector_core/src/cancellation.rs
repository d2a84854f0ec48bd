//! Cooperative cancellation built on a `watch` channel.
//!
//! A [`CancellationSource`] owns the flag; any number of [`CancellationSignal`]s observe it.
//! Signals can be polled with [`CancellationSignal::is_cancelled`] between units of work or
//! awaited with [`CancellationSignal::cancelled`] inside a `tokio::select!`.

use tokio::sync::watch;

/// The owning side of a cancellation flag.
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    /// Creates a source that has not been cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Returns a signal observing this source.
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal(self.sender.subscribe())
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// The observing side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancellationSignal(watch::Receiver<bool>);

impl CancellationSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        drop(sender);
        Self(receiver)
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once cancellation has been requested. Never completes if the source was
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.0.clone();
        let observed = receiver.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if observed.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
