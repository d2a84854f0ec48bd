//! This module defines the `EventLog` trait, the read/subscribe surface of the append-only log
//! the coordinator consumes, together with the paged forward reader used during catch-up and
//! the observer interface used by live subscriptions.

use crate::BoxError;
use crate::cancellation::CancellationSignal;
use crate::event::StreamEvent;
use async_trait::async_trait;
use std::sync::Arc;

/// Errors reported by an [`EventLog`].
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Reading from the log failed.
    #[error("Error reading from the log: {0}")]
    Read(#[source] BoxError),
    /// Opening a live subscription failed.
    #[error("Error subscribing to the log: {0}")]
    Subscribe(#[source] BoxError),
    /// The connection to the log was lost.
    #[error("Connection to the log was lost: {0}")]
    ConnectionLost(String),
}

/// Why a live subscription stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubscriptionDroppedReason {
    /// The subscription was closed by its owner.
    Disposed,
    /// The observer failed while handling an event.
    SubscriberError,
    /// The log dropped the subscription.
    ServerError,
}

/// Receives the events and the drop notification of a live subscription.
///
/// Both methods are called from the log's own delivery context. Implementations must hand
/// work off and return promptly; they must never block on projection logic.
pub trait AllStreamObserver: Send + Sync {
    /// Called for every event after the position the subscription was opened at, in log order.
    fn on_event(&self, event: StreamEvent, cancellation: &CancellationSignal);

    /// Called once when the subscription stops delivering events.
    fn on_dropped(&self, reason: SubscriptionDroppedReason, error: Option<LogError>);
}

/// Handle to an open live subscription. Closing (or dropping) the handle ends the subscription
/// and reports [`SubscriptionDroppedReason::Disposed`] to its observer.
pub trait LiveSubscription: Send + Sync {
    /// Name of the subscription, for logging.
    fn name(&self) -> &str;

    /// The position of the last event delivered, or the position the subscription was opened
    /// after when nothing has been delivered yet.
    fn last_position(&self) -> Option<u64>;

    /// Ends the subscription.
    fn close(&self);
}

/// A page of events read forwards from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAllPage {
    /// The position the read started at.
    pub from_position: u64,
    /// The position the next page starts at.
    pub next_position: u64,
    /// Whether this page reaches the head of the log as it was when the page was read.
    pub is_end: bool,
    /// The events, in log order.
    pub messages: Vec<StreamEvent>,
}

/// A trait that defines the read and subscribe behaviour of an append-only log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Returns the position of the last event in the log, or `None` when the log is empty.
    async fn read_head_position(&self) -> Result<Option<u64>, LogError>;

    /// Reads at most `max_count` events with a position at or after `from_position`.
    async fn read_all_forwards(
        &self,
        from_position: u64,
        max_count: usize,
    ) -> Result<ReadAllPage, LogError>;

    /// Opens a live subscription delivering every event after `after_position` (every event
    /// when `None`) to `observer`.
    async fn subscribe_to_all(
        &self,
        after_position: Option<u64>,
        observer: Arc<dyn AllStreamObserver>,
    ) -> Result<Box<dyn LiveSubscription>, LogError>;
}

/// A finite, forward-only sequence of pages.
///
/// Each call to [`next_page`](Self::next_page) reads the page after the previous one; once a
/// page reaching the head has been returned the sequence is exhausted and yields `None`.
pub struct AllStreamPages<'a> {
    log: &'a dyn EventLog,
    next_position: Option<u64>,
    page_size: usize,
}

impl<'a> AllStreamPages<'a> {
    /// Starts reading at `from_position`. A `page_size` of 0 is treated as 1.
    pub fn new(log: &'a dyn EventLog, from_position: u64, page_size: usize) -> Self {
        Self {
            log,
            next_position: Some(from_position),
            page_size: page_size.max(1),
        }
    }

    /// Reads the next page, or returns `None` once the head has been reached.
    pub async fn next_page(&mut self) -> Result<Option<ReadAllPage>, LogError> {
        let Some(from_position) = self.next_position else {
            return Ok(None);
        };

        let page = self
            .log
            .read_all_forwards(from_position, self.page_size)
            .await?;
        self.next_position = if page.is_end {
            None
        } else {
            Some(page.next_position)
        };
        Ok(Some(page))
    }
}

/// Decides whether a projection at `projection_position` can join live tailing of a log whose
/// live side has observed up to `live_position`.
///
/// An absent position sorts below every real position, so a projection without a position is
/// only caught up with a live side that has not observed anything either.
pub fn is_caught_up(projection_position: Option<u64>, live_position: Option<u64>) -> bool {
    projection_position >= live_position
}
