//! Projections and handlers shared by the unit tests.

use crate::bus::Mailbox;
use async_trait::async_trait;
use projector_core::prelude::*;
use projector_mem::InMemoryPositionStore;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Records the positions it applied. Optionally fails or panics at one position.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    seen: Arc<Mutex<Vec<u64>>>,
    fail_at: Option<u64>,
    panic_at: Option<u64>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_at(position: u64) -> Self {
        Self {
            fail_at: Some(position),
            ..Self::default()
        }
    }

    pub(crate) fn panicking_at(position: u64) -> Self {
        Self {
            panic_at: Some(position),
            ..Self::default()
        }
    }

    pub(crate) fn positions(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Projection for Recorder {
    async fn apply(
        &self,
        _context: &mut dyn ProjectionContext,
        event: &StreamEvent,
    ) -> Result<(), BoxError> {
        if self.panic_at == Some(event.position) {
            panic!("projection panicked at {}", event.position);
        }
        if self.fail_at == Some(event.position) {
            return Err(format!("cannot handle position {}", event.position).into());
        }
        self.seen.lock().unwrap().push(event.position);
        Ok(())
    }
}

pub(crate) fn registration(
    name: &str,
    recorder: &Recorder,
    positions: Arc<InMemoryPositionStore>,
) -> ProjectionRegistration {
    ProjectionRegistration::new(name, recorder.clone(), positions)
}

/// Blocks in `handle` until its cancellation signal fires.
#[derive(Clone, Default)]
pub(crate) struct BlockingHandler {
    calls: Arc<AtomicUsize>,
    entered: Arc<Notify>,
}

impl BlockingHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Completes once `handle` has been entered.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for BlockingHandler {
    async fn handle(
        &self,
        _messages: &[StreamEvent],
        cancellation: &CancellationSignal,
    ) -> Result<(), HandleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        cancellation.cancelled().await;
        Ok(())
    }
}

/// Sleeps in `handle` for an hour without ever looking at its cancellation signal.
#[derive(Clone, Default)]
pub(crate) struct StubbornHandler {
    entered: Arc<Notify>,
}

impl StubbornHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Completes once `handle` has been entered.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl MessageHandler for StubbornHandler {
    async fn handle(
        &self,
        _messages: &[StreamEvent],
        _cancellation: &CancellationSignal,
    ) -> Result<(), HandleError> {
        self.entered.notify_one();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Waits for the next command queued on `mailbox`.
pub(crate) async fn next_command(mailbox: &mut Mailbox) -> Command {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(command) = mailbox.try_recv() {
                return command;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for a command")
}
