#![allow(dead_code)]

use async_trait::async_trait;
use projector::prelude::*;
use projector_mem::{InMemoryEventLog, InMemoryPositionStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every position it applies; can fail at one position or slow down every event.
#[derive(Clone)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<u64>>>,
    count: Arc<watch::Sender<usize>>,
    fail_at: Option<u64>,
    delay: Option<Duration>,
}

impl Default for Recorder {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(count),
            fail_at: None,
            delay: None,
        }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(position: u64) -> Self {
        Self {
            fail_at: Some(position),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn positions(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    /// Waits until at least `count` events were applied.
    pub async fn wait_for_count(&self, count: usize) {
        let mut receiver = self.count.subscribe();
        tokio::time::timeout(TIMEOUT, receiver.wait_for(|seen| *seen >= count))
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "timed out waiting for {count} events, saw {:?}",
                    self.positions()
                )
            })
            .unwrap();
    }
}

#[async_trait]
impl Projection for Recorder {
    async fn apply(
        &self,
        _context: &mut dyn ProjectionContext,
        event: &StreamEvent,
    ) -> Result<(), BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(event.position) {
            return Err(format!("cannot handle position {}", event.position).into());
        }
        let count = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(event.position);
            seen.len()
        };
        self.count.send_replace(count);
        Ok(())
    }
}

pub fn event(n: u64) -> NewStreamEvent {
    NewStreamEvent::new(
        format!("street-{}", n % 3),
        "StreetNameWasProposed",
        serde_json::json!({ "n": n }),
    )
}

pub async fn log_with(count: u64) -> InMemoryEventLog {
    let log = InMemoryEventLog::new();
    log.append_all((0..count).map(event)).await.unwrap();
    log
}

pub fn registration(
    name: &str,
    recorder: &Recorder,
    positions: &Arc<InMemoryPositionStore>,
) -> ProjectionRegistration {
    ProjectionRegistration::new(name, recorder.clone(), positions.clone())
}

/// Waits until the published snapshot satisfies `predicate`.
pub async fn wait_until(
    manager: &ProjectionManager,
    predicate: impl Fn(&ProjectorSnapshot) -> bool,
) -> ProjectorSnapshot {
    let mut receiver = manager.watch();
    let result = tokio::time::timeout(TIMEOUT, async {
        receiver
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map(|snapshot| snapshot.clone())
    })
    .await;
    match result {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(_)) => panic!("coordinator stopped"),
        Err(_) => panic!("timed out, last snapshot: {:?}", manager.snapshot()),
    }
}

pub async fn wait_for_state(manager: &ProjectionManager, name: &str, state: ProjectionState) {
    wait_until(manager, |snapshot| snapshot.state(name) == Some(state)).await;
}
