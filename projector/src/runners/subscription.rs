//! The live dispatch table and the catch-up-or-live routing decision.

use super::catch_up::CatchUpRunner;
use super::stream_subscription::StreamStoreSubscription;
use crate::bus::CommandBus;
use crate::registry::ProjectionRegistry;
use futures::FutureExt;
use projector_core::prelude::*;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Owns the live dispatch table. Only the mailbox consumer touches it.
pub(crate) struct SubscriptionRunner {
    registry: ProjectionRegistry,
    bus: CommandBus,
    stream: StreamStoreSubscription,
    handlers: HashMap<ProjectionName, Arc<dyn MessageHandler>>,
    /// Position of the last event fanned out to the table. Absent while the table is empty.
    last_processed_position: Option<u64>,
}

impl SubscriptionRunner {
    pub(crate) fn new(
        registry: ProjectionRegistry,
        log: Arc<dyn EventLog>,
        bus: CommandBus,
    ) -> Self {
        Self {
            registry,
            stream: StreamStoreSubscription::new(log, bus.clone()),
            bus,
            handlers: HashMap::new(),
            last_processed_position: None,
        }
    }

    pub(crate) async fn handle(&mut self, command: SubscriptionCommand, catch_ups: &CatchUpRunner) {
        match command {
            SubscriptionCommand::Subscribe(name) => self.subscribe(name, catch_ups).await,
            SubscriptionCommand::SubscribeAll => self.subscribe_all(catch_ups).await,
            SubscriptionCommand::Unsubscribe(name) => self.unsubscribe(&name),
            SubscriptionCommand::UnsubscribeAll => self.unsubscribe_all(),
            SubscriptionCommand::ProcessStreamEvent(process) => {
                self.process_stream_event(process).await
            }
            other => log::error!("No handler defined for {:?}", other),
        }
    }

    pub(crate) fn is_subscribed(&self, name: &ProjectionName) -> bool {
        self.handlers.contains_key(name)
    }

    /// The tracked position of the dispatch table.
    pub(crate) fn last_processed_position(&self) -> Option<u64> {
        self.last_processed_position
    }

    /// The live edge a projection is compared against: the further of what the table has
    /// processed and what the stream has observed and queued.
    fn live_position(&self) -> Option<u64> {
        self.last_processed_position.max(self.stream.last_position())
    }

    async fn subscribe(&mut self, name: ProjectionName, catch_ups: &CatchUpRunner) {
        if self.registry.get(&name).is_none() {
            log::warn!("Cannot subscribe unknown projection {}", name);
            return;
        }
        if !self.start_stream().await {
            return;
        }
        self.route(name, catch_ups).await;
    }

    async fn subscribe_all(&mut self, catch_ups: &CatchUpRunner) {
        if !self.start_stream().await {
            return;
        }
        for name in self.registry.names() {
            self.route(name, catch_ups).await;
        }
    }

    /// Adds the projection to the table when it is at or past the live edge, otherwise hands
    /// it to the catch-up runner.
    async fn route(&mut self, name: ProjectionName, catch_ups: &CatchUpRunner) {
        let Some(registration) = self.registry.get(&name) else {
            return;
        };
        if self.is_subscribed(&name) || catch_ups.is_running(&name) {
            log::debug!("Projection {} is already projecting", name);
            return;
        }

        let position = match registration.read_position().await {
            Ok(position) => position,
            Err(e) => {
                log::error!("Could not read the position of projection {}: {}", name, e);
                return;
            }
        };
        let live_position = self.live_position();

        if is_caught_up(position, live_position) {
            log::info!(
                "Subscribing projection {} at {:?} (live at {:?})",
                name,
                position,
                live_position
            );
            let handler = registration.handler();
            self.handlers.insert(name, handler);
        } else {
            log::info!(
                "Projection {} at {:?} lags behind live position {:?}, catching up",
                name,
                position,
                live_position
            );
            self.bus.queue(CatchUpCommand::StartCatchUp(name));
        }
    }

    /// Makes sure the live subscription runs. Returns false when it could not be started.
    async fn start_stream(&mut self) -> bool {
        if self.stream.is_running() {
            return true;
        }

        // Whatever is left in the table missed events while the stream was down.
        for (name, _) in self.handlers.drain() {
            log::info!("Restarting stale projection {}", name);
            self.bus.queue(Command::Start(name));
        }
        self.last_processed_position = None;

        match self.stream.start().await {
            Ok(_) => true,
            Err(e) => {
                log::error!("Could not start the subscription stream: {}", e);
                false
            }
        }
    }

    fn unsubscribe(&mut self, name: &ProjectionName) {
        if self.handlers.remove(name).is_some() {
            log::info!("Unsubscribed projection {}", name);
        }
        if self.handlers.is_empty() {
            self.last_processed_position = None;
        }
    }

    fn unsubscribe_all(&mut self) {
        if !self.handlers.is_empty() {
            log::info!("Unsubscribing {} projections", self.handlers.len());
        }
        self.handlers.clear();
        self.last_processed_position = None;
    }

    async fn process_stream_event(&mut self, process: ProcessStreamEvent) {
        if self.handlers.is_empty() {
            return;
        }
        let ProcessStreamEvent {
            event,
            cancellation,
        } = process;
        if cancellation.is_cancelled() {
            log::debug!(
                "Skipping event at position {} from a closed subscription",
                event.position
            );
            return;
        }

        self.last_processed_position = self.last_processed_position.max(Some(event.position));
        let position = event.position;
        let messages = [event];
        let mut failed = Vec::new();

        for (name, handler) in &self.handlers {
            let outcome = AssertUnwindSafe(handler.handle(&messages, &cancellation))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!(
                        "Removing projection {} from the live subscription: {}",
                        name,
                        e
                    );
                    failed.push(name.clone());
                }
                Err(_) => {
                    log::error!(
                        "Removing projection {} from the live subscription: panicked at position {}",
                        name,
                        position
                    );
                    failed.push(name.clone());
                }
            }
        }

        for name in failed {
            self.handlers.remove(&name);
        }
        if self.handlers.is_empty() {
            self.last_processed_position = None;
        }
    }

    pub(crate) fn shutdown(&mut self) {
        self.stream.stop();
        self.handlers.clear();
        self.last_processed_position = None;
    }
}
