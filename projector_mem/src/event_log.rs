use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use projector_core::prelude::*;

/// Errors returned by the [`InMemoryEventLog`].
#[derive(Debug, thiserror::Error)]
pub enum InMemoryEventLogError {
    /// A message with the same id was already appended.
    #[error("Message {0} was already appended")]
    DuplicateMessage(Uuid),
}

struct Subscriber {
    name: String,
    observer: Arc<dyn AllStreamObserver>,
    cancellation: CancellationSource,
    signal: CancellationSignal,
    last_position: watch::Sender<Option<u64>>,
    dropped: AtomicBool,
}

impl Subscriber {
    fn deliver(&self, event: &StreamEvent) {
        if self.dropped.load(Ordering::Acquire) {
            return;
        }
        self.last_position.send_replace(Some(event.position));
        self.observer.on_event(event.clone(), &self.signal);
    }

    /// Reports the drop to the observer once, whatever the number of callers.
    fn drop_with(&self, reason: SubscriptionDroppedReason, error: Option<LogError>) {
        if self.dropped.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("Subscription {} dropped: {:?}", self.name, reason);
        self.cancellation.cancel();
        self.observer.on_dropped(reason, error);
    }

    fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }
}

#[derive(Default)]
struct LogData {
    events: Vec<StreamEvent>,
    message_ids: HashSet<Uuid>,
    stream_versions: HashMap<String, u64>,
    subscribers: Vec<Arc<Subscriber>>,
    next_subscription: u64,
}

/// An in-memory event log.
///
/// Positions are dense and start at 0. Appending hands the event to every open subscription
/// before `append` returns, so subscribers observe events in log order.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    data: Arc<Mutex<LogData>>,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryEventLog");
        Self::default()
    }

    /// Appends an event and returns its position.
    pub async fn append(&self, event: NewStreamEvent) -> Result<u64, InMemoryEventLogError> {
        let mut data = self.data.lock().await;
        Self::append_locked(&mut data, event)
    }

    /// Appends events in order and returns the position of the last one.
    pub async fn append_all(
        &self,
        events: impl IntoIterator<Item = NewStreamEvent>,
    ) -> Result<Option<u64>, InMemoryEventLogError> {
        let mut data = self.data.lock().await;
        let mut last = None;
        for event in events {
            last = Some(Self::append_locked(&mut data, event)?);
        }
        Ok(last)
    }

    fn append_locked(
        data: &mut LogData,
        event: NewStreamEvent,
    ) -> Result<u64, InMemoryEventLogError> {
        if !data.message_ids.insert(event.message_id) {
            return Err(InMemoryEventLogError::DuplicateMessage(event.message_id));
        }

        let position = data.events.len() as u64;
        let stream_version = {
            let version = data
                .stream_versions
                .entry(event.stream_id.clone())
                .or_insert(0);
            let current = *version;
            *version += 1;
            current
        };
        let event = event.into_stream_event(position, stream_version);
        log::debug!(
            "Appended {} to stream {} at position {}",
            event.event_type,
            event.stream_id,
            position
        );

        data.subscribers.retain(|s| !s.is_dropped());
        for subscriber in &data.subscribers {
            subscriber.deliver(&event);
        }
        data.events.push(event);
        Ok(position)
    }

    /// Drops every open subscription as if the log had lost its connection.
    pub async fn drop_subscriptions(&self, message: impl Into<String>) {
        let message = message.into();
        let mut data = self.data.lock().await;
        for subscriber in data.subscribers.drain(..) {
            subscriber.drop_with(
                SubscriptionDroppedReason::ServerError,
                Some(LogError::ConnectionLost(message.clone())),
            );
        }
    }

    /// Number of subscriptions that are still open.
    pub async fn open_subscriptions(&self) -> usize {
        let data = self.data.lock().await;
        data.subscribers.iter().filter(|s| !s.is_dropped()).count()
    }

    /// Number of events in the log.
    pub async fn len(&self) -> usize {
        self.data.lock().await.events.len()
    }

    /// Whether the log holds no events.
    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.events.is_empty()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn read_head_position(&self) -> Result<Option<u64>, LogError> {
        let data = self.data.lock().await;
        Ok(data.events.last().map(|e| e.position))
    }

    async fn read_all_forwards(
        &self,
        from_position: u64,
        max_count: usize,
    ) -> Result<ReadAllPage, LogError> {
        let data = self.data.lock().await;
        let len = data.events.len();
        let start = usize::try_from(from_position).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(max_count.max(1)).min(len);
        let messages = data.events[start..end].to_vec();
        log::debug!(
            "Read {} events from position {}",
            messages.len(),
            from_position
        );

        Ok(ReadAllPage {
            from_position,
            next_position: (end as u64).max(from_position),
            is_end: end >= len,
            messages,
        })
    }

    async fn subscribe_to_all(
        &self,
        after_position: Option<u64>,
        observer: Arc<dyn AllStreamObserver>,
    ) -> Result<Box<dyn LiveSubscription>, LogError> {
        let mut data = self.data.lock().await;
        data.next_subscription += 1;
        let name = format!("in-memory-all-{}", data.next_subscription);

        let cancellation = CancellationSource::new();
        let (last_position, _) = watch::channel(after_position);
        let subscriber = Arc::new(Subscriber {
            name: name.clone(),
            observer,
            signal: cancellation.signal(),
            cancellation,
            last_position,
            dropped: AtomicBool::new(false),
        });

        let replay_from = after_position.map_or(0, |p| p + 1);
        let replay_start = usize::try_from(replay_from).unwrap_or(usize::MAX);
        for event in data.events.iter().skip(replay_start) {
            subscriber.deliver(event);
        }
        data.subscribers.push(subscriber.clone());
        log::debug!("Opened subscription {} after {:?}", name, after_position);

        Ok(Box::new(InMemorySubscription { subscriber }))
    }
}

/// Handle to a live subscription on an [`InMemoryEventLog`].
pub struct InMemorySubscription {
    subscriber: Arc<Subscriber>,
}

impl LiveSubscription for InMemorySubscription {
    fn name(&self) -> &str {
        &self.subscriber.name
    }

    fn last_position(&self) -> Option<u64> {
        *self.subscriber.last_position.borrow()
    }

    fn close(&self) {
        self.subscriber
            .drop_with(SubscriptionDroppedReason::Disposed, None);
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        self.close();
    }
}
