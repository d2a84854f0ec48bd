//! Paged, cancellable replay of history for projections that lag behind the live edge.

use super::subscription::SubscriptionRunner;
use crate::bus::CommandBus;
use crate::registry::ProjectionRegistry;
use futures::FutureExt;
use futures::future::join_all;
use projector_core::prelude::*;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Why a catch-up task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchUpStopReason {
    /// The projection reached the head of the log.
    Finished,
    /// The task was cancelled.
    Aborted,
    /// The projection or the log failed.
    Error,
}

struct RunningCatchUp {
    id: CatchUpId,
    cancellation: CancellationSource,
    handle: JoinHandle<()>,
}

/// Owns one catch-up task per lagging projection.
pub(crate) struct CatchUpRunner {
    registry: ProjectionRegistry,
    log: Arc<dyn EventLog>,
    bus: CommandBus,
    page_size: usize,
    /// How long a stopped task gets to wind down before it is aborted.
    stop_timeout: Duration,
    running: HashMap<ProjectionName, RunningCatchUp>,
    next_id: u64,
}

impl CatchUpRunner {
    pub(crate) fn new(
        registry: ProjectionRegistry,
        log: Arc<dyn EventLog>,
        bus: CommandBus,
        page_size: usize,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            log,
            bus,
            page_size: page_size.max(1),
            stop_timeout,
            running: HashMap::new(),
            next_id: 0,
        }
    }

    /// Handles one command. Returns the projection that finished catching up and now has to
    /// be routed to the live subscription.
    pub(crate) async fn handle(
        &mut self,
        command: CatchUpCommand,
        subscriptions: &SubscriptionRunner,
    ) -> Option<ProjectionName> {
        match command {
            CatchUpCommand::StartCatchUp(name) => self.start(name, subscriptions),
            CatchUpCommand::StopCatchUp(name) => self.stop(&name).await,
            CatchUpCommand::StopAllCatchUps => self.stop_all().await,
            CatchUpCommand::RemoveStoppedCatchUp {
                name,
                catch_up,
                finished,
            } => return self.remove_stopped(name, catch_up, finished),
            other => log::error!("No handler defined for {:?}", other),
        }
        None
    }

    /// Whether a catch-up task holds the slot of `name`.
    pub(crate) fn is_running(&self, name: &ProjectionName) -> bool {
        self.running.contains_key(name)
    }

    fn start(&mut self, name: ProjectionName, subscriptions: &SubscriptionRunner) {
        let Some(registration) = self.registry.get(&name) else {
            log::warn!("Cannot catch up unknown projection {}", name);
            return;
        };
        if self.is_running(&name) || subscriptions.is_subscribed(&name) {
            log::debug!("Projection {} is already projecting", name);
            return;
        }

        self.next_id += 1;
        let id = CatchUpId(self.next_id);
        let cancellation = CancellationSource::new();
        let catch_up = ConnectedProjectionCatchUp {
            id,
            registration: registration.clone(),
            log: self.log.clone(),
            bus: self.bus.clone(),
            page_size: self.page_size,
        };
        let handle = tokio::spawn(catch_up.run(cancellation.signal()));
        log::info!("Started catch-up {} for projection {}", id, name);

        self.running.insert(
            name,
            RunningCatchUp {
                id,
                cancellation,
                handle,
            },
        );
    }

    /// Cancels the task and waits for it, so it no longer writes positions once this returns.
    /// A task that does not wind down within the stop timeout is aborted.
    async fn stop(&mut self, name: &ProjectionName) {
        let Some(running) = self.running.remove(name) else {
            return;
        };
        let id = running.id;
        running.cancellation.cancel();
        let abort = running.handle.abort_handle();
        match tokio::time::timeout(self.stop_timeout, running.handle).await {
            Ok(Err(e)) if !e.is_cancelled() => {
                log::error!("Catch-up {} for projection {} failed: {}", id, name, e)
            }
            Ok(_) => {}
            Err(_) => {
                log::warn!(
                    "Catch-up {} for projection {} did not stop within {:?}, aborting it",
                    id,
                    name,
                    self.stop_timeout
                );
                abort.abort();
            }
        }
        log::info!("Stopped catch-up {} for projection {}", id, name);
    }

    async fn stop_all(&mut self) {
        let running: Vec<(ProjectionName, RunningCatchUp)> = self.running.drain().collect();
        if running.is_empty() {
            return;
        }
        for (_, catch_up) in &running {
            catch_up.cancellation.cancel();
        }

        let aborts: Vec<_> = running
            .iter()
            .map(|(_, catch_up)| catch_up.handle.abort_handle())
            .collect();
        let stopping = join_all(running.into_iter().map(|(name, catch_up)| async move {
            (name, catch_up.handle.await)
        }));
        match tokio::time::timeout(self.stop_timeout, stopping).await {
            Ok(results) => {
                for (name, result) in results {
                    if let Err(e) = result {
                        log::error!("Catch-up for projection {} failed: {}", name, e);
                    }
                }
            }
            Err(_) => {
                log::warn!(
                    "Catch-ups did not stop within {:?}, aborting them",
                    self.stop_timeout
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }

    /// Releases the slot when `catch_up` still owns it. Reports from tasks whose slot was
    /// already released by a stop are ignored, so a stopped projection stays stopped.
    fn remove_stopped(
        &mut self,
        name: ProjectionName,
        catch_up: CatchUpId,
        finished: bool,
    ) -> Option<ProjectionName> {
        if !self
            .running
            .get(&name)
            .is_some_and(|running| running.id == catch_up)
        {
            log::debug!("Ignoring report of released catch-up {} for projection {}", catch_up, name);
            return None;
        }
        self.running.remove(&name);
        log::debug!("Released catch-up {} for projection {}", catch_up, name);
        finished.then_some(name)
    }

    /// Cancels every task and waits up to `timeout` for them; stragglers are aborted.
    pub(crate) async fn shutdown(&mut self, timeout: Duration) {
        let running: Vec<RunningCatchUp> = self.running.drain().map(|(_, r)| r).collect();
        if running.is_empty() {
            return;
        }
        for catch_up in &running {
            catch_up.cancellation.cancel();
        }

        let aborts: Vec<_> = running.iter().map(|r| r.handle.abort_handle()).collect();
        let handles = running.into_iter().map(|r| r.handle);
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            log::warn!(
                "Catch-ups did not stop within {:?}, aborting them",
                timeout
            );
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

/// One catch-up run for one projection.
struct ConnectedProjectionCatchUp {
    id: CatchUpId,
    registration: ProjectionRegistration,
    log: Arc<dyn EventLog>,
    bus: CommandBus,
    page_size: usize,
}

impl ConnectedProjectionCatchUp {
    async fn run(self, cancellation: CancellationSignal) {
        let reason = match AssertUnwindSafe(self.catch_up(&cancellation))
            .catch_unwind()
            .await
        {
            Ok(reason) => reason,
            Err(_) => {
                log::error!(
                    "Catch-up {} for projection {} panicked",
                    self.id,
                    self.registration.name()
                );
                CatchUpStopReason::Error
            }
        };
        self.stopped(reason);
    }

    async fn catch_up(&self, cancellation: &CancellationSignal) -> CatchUpStopReason {
        let name = self.registration.name();

        let position = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return CatchUpStopReason::Aborted,
            position = self.registration.read_position() => position,
        };
        let position = match position {
            Ok(position) => position,
            Err(e) => {
                log::error!("Could not read the position of projection {}: {}", name, e);
                return CatchUpStopReason::Error;
            }
        };

        let from_position = position.map_or(0, |p| p + 1);
        log::info!("Catching up projection {} from position {}", name, from_position);
        let handler = self.registration.handler();
        let mut pages = AllStreamPages::new(self.log.as_ref(), from_position, self.page_size);

        loop {
            let page = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return CatchUpStopReason::Aborted,
                page = pages.next_page() => page,
            };
            let page = match page {
                Ok(Some(page)) => page,
                Ok(None) => return CatchUpStopReason::Finished,
                Err(e) => {
                    log::error!("Catch-up of projection {} could not read the log: {}", name, e);
                    return CatchUpStopReason::Error;
                }
            };
            log::debug!(
                "Catch-up of projection {} read {} messages from position {}",
                name,
                page.messages.len(),
                page.from_position
            );

            // Dropping an unfinished batch discards its uncommitted context.
            let handled = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return CatchUpStopReason::Aborted,
                handled = handler.handle(&page.messages, cancellation) => handled,
            };
            if let Err(e) = handled {
                log::error!("Catch-up of projection {} failed: {}", name, e);
                return CatchUpStopReason::Error;
            }
            if cancellation.is_cancelled() {
                return CatchUpStopReason::Aborted;
            }
            if page.is_end {
                return CatchUpStopReason::Finished;
            }
        }
    }

    fn stopped(&self, reason: CatchUpStopReason) {
        let name = self.registration.name().clone();
        match reason {
            CatchUpStopReason::Error => {
                log::warn!("Catch-up {} for projection {} stopped: {:?}", self.id, name, reason)
            }
            _ => log::info!("Catch-up {} for projection {} stopped: {:?}", self.id, name, reason),
        }

        self.bus.queue(CatchUpCommand::RemoveStoppedCatchUp {
            name,
            catch_up: self.id,
            finished: reason == CatchUpStopReason::Finished,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{self, Mailbox};
    use crate::test_support::{
        BlockingHandler, Recorder, StubbornHandler, next_command, registration,
    };
    use projector_mem::{InMemoryEventLog, InMemoryPositionStore};

    async fn log_with(count: usize) -> InMemoryEventLog {
        let log = InMemoryEventLog::new();
        log.append_all(
            (0..count).map(|_| NewStreamEvent::new("stream", "Happened", serde_json::json!({}))),
        )
        .await
        .unwrap();
        log
    }

    fn runners(
        log: &InMemoryEventLog,
        registrations: Vec<ProjectionRegistration>,
        page_size: usize,
    ) -> (CatchUpRunner, SubscriptionRunner, Mailbox) {
        let registry = ProjectionRegistry::new(registrations).unwrap();
        let (bus, mailbox) = bus::channel();
        let log: Arc<dyn EventLog> = Arc::new(log.clone());
        (
            CatchUpRunner::new(
                registry.clone(),
                log.clone(),
                bus.clone(),
                page_size,
                Duration::from_secs(5),
            ),
            SubscriptionRunner::new(registry, log, bus),
            mailbox,
        )
    }

    fn report(command: Command) -> (ProjectionName, CatchUpId, bool) {
        match command {
            Command::CatchUp(CatchUpCommand::RemoveStoppedCatchUp {
                name,
                catch_up,
                finished,
            }) => (name, catch_up, finished),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn replays_from_the_stored_position_then_hands_over_to_live() {
        let log = log_with(11).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        positions.set_position("a", 5).await;
        let recorder = Recorder::new();
        let (mut catch_ups, subscriptions, mut mailbox) =
            runners(&log, vec![registration("a", &recorder, positions.clone())], 2);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        assert!(catch_ups.is_running(&"a".into()));

        let (name, id, finished) = report(next_command(&mut mailbox).await);
        assert_eq!(name.as_str(), "a");
        assert!(finished);
        assert!(mailbox.drain().is_empty());
        assert_eq!(recorder.positions(), vec![6, 7, 8, 9, 10]);
        assert_eq!(positions.position("a").await, Some(10));

        let live = catch_ups
            .handle(
                CatchUpCommand::RemoveStoppedCatchUp {
                    name,
                    catch_up: id,
                    finished,
                },
                &subscriptions,
            )
            .await;

        assert_eq!(live, Some(ProjectionName::new("a")));
        assert!(!catch_ups.is_running(&"a".into()));
    }

    #[tokio::test]
    async fn fresh_projection_replays_from_the_start() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let recorder = Recorder::new();
        let (mut catch_ups, subscriptions, mut mailbox) =
            runners(&log, vec![registration("a", &recorder, positions)], 1000);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        next_command(&mut mailbox).await;

        assert_eq!(recorder.positions(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn second_start_is_ignored_while_running() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let blocking = BlockingHandler::new();
        let registration =
            ProjectionRegistration::with_handler("a", Arc::new(blocking.clone()), positions);
        let (mut catch_ups, subscriptions, _mailbox) = runners(&log, vec![registration], 1);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        blocking.entered().await;
        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;

        assert_eq!(catch_ups.next_id, 1);
        catch_ups
            .handle(CatchUpCommand::StopCatchUp("a".into()), &subscriptions)
            .await;
    }

    #[tokio::test]
    async fn cancelling_mid_page_stops_reading_and_does_not_go_live() {
        let log = log_with(10).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let blocking = BlockingHandler::new();
        let registration =
            ProjectionRegistration::with_handler("a", Arc::new(blocking.clone()), positions);
        let (mut catch_ups, subscriptions, mut mailbox) = runners(&log, vec![registration], 2);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        blocking.entered().await;

        tokio::time::timeout(
            Duration::from_secs(5),
            catch_ups.handle(CatchUpCommand::StopCatchUp("a".into()), &subscriptions),
        )
        .await
        .expect("stop should complete once the task observes cancellation");

        assert!(!catch_ups.is_running(&"a".into()));
        assert_eq!(blocking.calls(), 1);
        let commands = mailbox.drain();
        assert!(matches!(
            commands.as_slice(),
            [Command::CatchUp(CatchUpCommand::RemoveStoppedCatchUp { finished: false, .. })]
        ));
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_a_handler_that_ignores_cancellation() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let stubborn = StubbornHandler::new();
        let registration =
            ProjectionRegistration::with_handler("a", Arc::new(stubborn.clone()), positions);
        let (mut catch_ups, subscriptions, mut mailbox) = runners(&log, vec![registration], 1);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        stubborn.entered().await;

        tokio::time::timeout(
            Duration::from_secs(2),
            catch_ups.handle(CatchUpCommand::StopCatchUp("a".into()), &subscriptions),
        )
        .await
        .expect("stop should not wait for the handler");

        assert!(!catch_ups.is_running(&"a".into()));
        let (_, _, finished) = report(next_command(&mut mailbox).await);
        assert!(!finished);
    }

    #[tokio::test]
    async fn stop_all_does_not_wait_for_handlers_that_ignore_cancellation() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let first = StubbornHandler::new();
        let second = StubbornHandler::new();
        let (mut catch_ups, subscriptions, _mailbox) = runners(
            &log,
            vec![
                ProjectionRegistration::with_handler(
                    "first",
                    Arc::new(first.clone()),
                    positions.clone(),
                ),
                ProjectionRegistration::with_handler("second", Arc::new(second.clone()), positions),
            ],
            1,
        );

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("first".into()), &subscriptions)
            .await;
        catch_ups
            .handle(CatchUpCommand::StartCatchUp("second".into()), &subscriptions)
            .await;
        first.entered().await;
        second.entered().await;

        tokio::time::timeout(
            Duration::from_secs(2),
            catch_ups.handle(CatchUpCommand::StopAllCatchUps, &subscriptions),
        )
        .await
        .expect("stop all should not wait for the handlers");

        assert!(!catch_ups.is_running(&"first".into()));
        assert!(!catch_ups.is_running(&"second".into()));
    }

    #[tokio::test]
    async fn handler_failure_stops_only_that_projection() {
        let log = log_with(4).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let failing = Recorder::failing_at(2);
        let healthy = Recorder::new();
        let (mut catch_ups, subscriptions, mut mailbox) = runners(
            &log,
            vec![
                registration("failing", &failing, positions.clone()),
                registration("healthy", &healthy, positions.clone()),
            ],
            1,
        );

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("failing".into()), &subscriptions)
            .await;
        catch_ups
            .handle(CatchUpCommand::StartCatchUp("healthy".into()), &subscriptions)
            .await;

        let mut live = Vec::new();
        for _ in 0..2 {
            let (name, catch_up, finished) = report(next_command(&mut mailbox).await);
            let handed_over = catch_ups
                .handle(
                    CatchUpCommand::RemoveStoppedCatchUp {
                        name,
                        catch_up,
                        finished,
                    },
                    &subscriptions,
                )
                .await;
            live.extend(handed_over);
        }

        assert_eq!(live, vec![ProjectionName::new("healthy")]);
        assert_eq!(positions.position("failing").await, Some(1));
        assert_eq!(positions.position("healthy").await, Some(3));
        assert_eq!(healthy.positions(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn panicking_projection_reports_an_unfinished_stop() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let panicking = Recorder::panicking_at(1);
        let (mut catch_ups, subscriptions, mut mailbox) =
            runners(&log, vec![registration("a", &panicking, positions.clone())], 1);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;

        let (_, _, finished) = report(next_command(&mut mailbox).await);
        assert!(!finished);
        assert_eq!(positions.position("a").await, Some(0));
    }

    #[tokio::test]
    async fn finished_report_after_a_stop_does_not_go_live() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let recorder = Recorder::new();
        let (mut catch_ups, subscriptions, mut mailbox) =
            runners(&log, vec![registration("a", &recorder, positions)], 1000);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        let (name, catch_up, finished) = report(next_command(&mut mailbox).await);
        assert!(finished);
        catch_ups
            .handle(CatchUpCommand::StopCatchUp("a".into()), &subscriptions)
            .await;

        let live = catch_ups
            .handle(
                CatchUpCommand::RemoveStoppedCatchUp {
                    name,
                    catch_up,
                    finished,
                },
                &subscriptions,
            )
            .await;

        assert_eq!(live, None);
        assert!(!catch_ups.is_running(&"a".into()));
    }

    #[tokio::test]
    async fn late_report_from_a_stopped_task_keeps_the_new_slot() {
        let log = log_with(3).await;
        let positions = Arc::new(InMemoryPositionStore::new());
        let blocking = BlockingHandler::new();
        let registration =
            ProjectionRegistration::with_handler("a", Arc::new(blocking.clone()), positions);
        let (mut catch_ups, subscriptions, _mailbox) = runners(&log, vec![registration], 1);

        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;
        blocking.entered().await;
        catch_ups
            .handle(CatchUpCommand::StopCatchUp("a".into()), &subscriptions)
            .await;
        catch_ups
            .handle(CatchUpCommand::StartCatchUp("a".into()), &subscriptions)
            .await;

        let live = catch_ups
            .handle(
                CatchUpCommand::RemoveStoppedCatchUp {
                    name: "a".into(),
                    catch_up: CatchUpId(1),
                    finished: true,
                },
                &subscriptions,
            )
            .await;

        assert_eq!(live, None);
        assert!(catch_ups.is_running(&"a".into()));
        catch_ups.shutdown(Duration::from_secs(5)).await;
        assert!(!catch_ups.is_running(&"a".into()));
    }
}
