//! The single live subscription to the event log.

use crate::bus::CommandBus;
use projector_core::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

const NO_GENERATION: u64 = 0;

/// Wraps the log's live subscription, tracking the position of the last event it observed.
///
/// Events are never handled on the log's delivery context: each one is queued on the mailbox
/// as a `ProcessStreamEvent`.
pub(crate) struct StreamStoreSubscription {
    log: Arc<dyn EventLog>,
    bus: CommandBus,
    subscription: Option<Box<dyn LiveSubscription>>,
    /// Incremented on every start. Drop reports from older subscriptions are ignored.
    generation: u64,
    active_generation: Arc<AtomicU64>,
    last_position: Arc<watch::Sender<Option<u64>>>,
}

struct StreamObserver {
    generation: u64,
    active_generation: Arc<AtomicU64>,
    last_position: Arc<watch::Sender<Option<u64>>>,
    bus: CommandBus,
}

impl StreamStoreSubscription {
    pub(crate) fn new(log: Arc<dyn EventLog>, bus: CommandBus) -> Self {
        let (last_position, _) = watch::channel(None);
        Self {
            log,
            bus,
            subscription: None,
            generation: NO_GENERATION,
            active_generation: Arc::new(AtomicU64::new(NO_GENERATION)),
            last_position: Arc::new(last_position),
        }
    }

    /// Whether a subscription is held and has not been dropped by the log.
    pub(crate) fn is_running(&self) -> bool {
        self.subscription.is_some()
            && self.active_generation.load(Ordering::Acquire) == self.generation
    }

    /// The position of the last event observed, or the head the subscription started after.
    pub(crate) fn last_position(&self) -> Option<u64> {
        *self.last_position.borrow()
    }

    /// Opens a subscription right after the current head of the log and returns that head.
    pub(crate) async fn start(&mut self) -> Result<Option<u64>, LogError> {
        if self.is_running() {
            return Ok(self.last_position());
        }
        self.stop();

        let head = self.log.read_head_position().await?;
        self.generation += 1;
        self.last_position.send_replace(head);
        self.active_generation
            .store(self.generation, Ordering::Release);

        let observer = Arc::new(StreamObserver {
            generation: self.generation,
            active_generation: self.active_generation.clone(),
            last_position: self.last_position.clone(),
            bus: self.bus.clone(),
        });

        match self.log.subscribe_to_all(head, observer).await {
            Ok(subscription) => {
                log::info!(
                    "Started subscription stream {} after {:?}",
                    subscription.name(),
                    head
                );
                self.subscription = Some(subscription);
                Ok(head)
            }
            Err(e) => {
                self.clear_active(self.generation);
                Err(e)
            }
        }
    }

    /// Closes the subscription, if any. Events it already queued are skipped by the runner
    /// because their cancellation signal has fired.
    pub(crate) fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.clear_active(self.generation);
            subscription.close();
            log::info!("Stopped subscription stream {}", subscription.name());
        }
    }

    fn clear_active(&self, generation: u64) {
        clear_generation(&self.active_generation, generation);
    }
}

/// Marks the stream as no longer running, unless a newer subscription took over already.
fn clear_generation(active_generation: &AtomicU64, generation: u64) {
    let _ = active_generation.compare_exchange(
        generation,
        NO_GENERATION,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

impl AllStreamObserver for StreamObserver {
    fn on_event(&self, event: StreamEvent, cancellation: &CancellationSignal) {
        if cancellation.is_cancelled() {
            return;
        }
        let position = event.position;
        self.last_position.send_if_modified(|current| {
            if *current < Some(position) {
                *current = Some(position);
                true
            } else {
                false
            }
        });
        self.bus.queue(ProcessStreamEvent {
            event,
            cancellation: cancellation.clone(),
        });
    }

    fn on_dropped(&self, reason: SubscriptionDroppedReason, error: Option<LogError>) {
        clear_generation(&self.active_generation, self.generation);
        match (reason, error) {
            (SubscriptionDroppedReason::Disposed, _) | (_, None) => {
                log::debug!("Subscription stream dropped: {:?}", reason);
            }
            (reason, Some(error)) => {
                log::error!("Subscription stream dropped ({:?}): {}", reason, error);
            }
        }
    }
}
