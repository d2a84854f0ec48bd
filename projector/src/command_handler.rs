//! Routes mailbox commands to the runners and publishes the resulting state.

use crate::bus::CommandBus;
use crate::registry::ProjectionRegistry;
use crate::runners::{CatchUpRunner, SubscriptionRunner};
use crate::state::{ProjectionState, ProjectorSnapshot};
use projector_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub(crate) struct CommandHandler {
    registry: ProjectionRegistry,
    subscriptions: SubscriptionRunner,
    catch_ups: CatchUpRunner,
    snapshot: watch::Sender<ProjectorSnapshot>,
    shutdown_timeout: Duration,
}

impl CommandHandler {
    pub(crate) fn new(
        registry: ProjectionRegistry,
        log: Arc<dyn EventLog>,
        bus: CommandBus,
        snapshot: watch::Sender<ProjectorSnapshot>,
        page_size: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            subscriptions: SubscriptionRunner::new(registry.clone(), log.clone(), bus.clone()),
            catch_ups: CatchUpRunner::new(registry.clone(), log, bus, page_size, shutdown_timeout),
            registry,
            snapshot,
            shutdown_timeout,
        }
    }

    pub(crate) async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(name) => {
                self.subscription(SubscriptionCommand::Subscribe(name)).await
            }
            Command::StartAll => self.subscription(SubscriptionCommand::SubscribeAll).await,
            Command::Stop(name) => {
                self.catch_up(CatchUpCommand::StopCatchUp(name.clone())).await;
                self.subscription(SubscriptionCommand::Unsubscribe(name)).await;
            }
            Command::StopAll => {
                self.catch_up(CatchUpCommand::StopAllCatchUps).await;
                self.subscription(SubscriptionCommand::UnsubscribeAll).await;
            }
            Command::Subscription(command) => self.subscription(command).await,
            Command::CatchUp(command) => self.catch_up(command).await,
            other => log::error!("No handler defined for {:?}", other),
        }
        self.publish();
    }

    async fn subscription(&mut self, command: SubscriptionCommand) {
        self.subscriptions.handle(command, &self.catch_ups).await
    }

    /// A projection whose catch-up finished is routed in the same command, so a `Stop` queued
    /// before the report was processed can never be overtaken.
    async fn catch_up(&mut self, command: CatchUpCommand) {
        if let Some(finished) = self.catch_ups.handle(command, &self.subscriptions).await {
            self.subscription(SubscriptionCommand::Subscribe(finished))
                .await
        }
    }

    fn state_of(&self, name: &ProjectionName) -> ProjectionState {
        if self.subscriptions.is_subscribed(name) {
            ProjectionState::Live
        } else if self.catch_ups.is_running(name) {
            ProjectionState::CatchingUp
        } else {
            ProjectionState::Idle
        }
    }

    fn current_snapshot(&self) -> ProjectorSnapshot {
        ProjectorSnapshot {
            states: self
                .registry
                .names()
                .into_iter()
                .map(|name| {
                    let state = self.state_of(&name);
                    (name, state)
                })
                .collect(),
            live_position: self.subscriptions.last_processed_position(),
        }
    }

    pub(crate) fn publish_initial(&self) {
        self.snapshot.send_replace(self.current_snapshot());
    }

    /// Notifies watchers only when the snapshot changed.
    fn publish(&self) {
        let snapshot = self.current_snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    pub(crate) async fn shutdown(&mut self) {
        self.catch_ups.shutdown(self.shutdown_timeout).await;
        self.subscriptions.shutdown();
        self.publish();
        log::info!("Projection coordinator stopped");
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

    struct Fixture {
        log: InMemoryEventLog,
        handler: CommandHandler,
        mailbox: Mailbox,
        snapshots: watch::Receiver<ProjectorSnapshot>,
    }

    async fn fixture(events: usize, registrations: Vec<ProjectionRegistration>) -> Fixture {
        let log = InMemoryEventLog::new();
        log.append_all(
            (0..events).map(|_| NewStreamEvent::new("stream", "Happened", serde_json::json!({}))),
        )
        .await
        .unwrap();
        let registry = ProjectionRegistry::new(registrations).unwrap();
        let (bus, mailbox) = bus::channel();
        let (snapshot, snapshots) = watch::channel(ProjectorSnapshot::default());
        let handler = CommandHandler::new(
            registry,
            Arc::new(log.clone()),
            bus,
            snapshot,
            1000,
            Duration::from_secs(5),
        );
        handler.publish_initial();
        Fixture {
            log,
            handler,
            mailbox,
            snapshots,
        }
    }

    impl Fixture {
        /// Handles the next command the runners queued.
        async fn handle_next(&mut self) {
            let command = next_command(&mut self.mailbox).await;
            self.handler.handle(command).await;
        }

        fn state(&self, name: &str) -> Option<ProjectionState> {
            self.snapshots.borrow().state(name)
        }
    }

    #[tokio::test]
    async fn start_on_an_empty_log_goes_live_and_stop_returns_to_idle() {
        let positions = Arc::new(InMemoryPositionStore::new());
        let recorder = Recorder::new();
        let mut f = fixture(0, vec![registration("a", &recorder, positions)]).await;
        assert_eq!(f.state("a"), Some(ProjectionState::Idle));

        f.handler.handle(Command::Start("a".into())).await;
        assert_eq!(f.state("a"), Some(ProjectionState::Live));

        f.log
            .append(NewStreamEvent::new("stream", "Happened", serde_json::json!({})))
            .await
            .unwrap();
        f.handle_next().await;
        assert_eq!(recorder.positions(), vec![0]);
        assert_eq!(f.snapshots.borrow().live_position, Some(0));

        f.handler.handle(Command::Stop("a".into())).await;
        assert_eq!(f.state("a"), Some(ProjectionState::Idle));
        assert_eq!(f.snapshots.borrow().live_position, None);
    }

    #[tokio::test]
    async fn lagging_projection_goes_live_once_its_catch_up_reports() {
        let positions = Arc::new(InMemoryPositionStore::new());
        positions.set_position("a", 5).await;
        let recorder = Recorder::new();
        let mut f = fixture(11, vec![registration("a", &recorder, positions)]).await;

        f.handler.handle(Command::Start("a".into())).await;
        f.handle_next().await;
        assert_eq!(f.state("a"), Some(ProjectionState::CatchingUp));

        f.handle_next().await;

        assert_eq!(f.state("a"), Some(ProjectionState::Live));
        assert_eq!(recorder.positions(), vec![6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn stop_queued_before_a_finished_report_keeps_the_projection_idle() {
        let positions = Arc::new(InMemoryPositionStore::new());
        positions.set_position("a", 5).await;
        let recorder = Recorder::new();
        let mut f = fixture(11, vec![registration("a", &recorder, positions)]).await;

        f.handler.handle(Command::Start("a".into())).await;
        f.handle_next().await;
        let report = next_command(&mut f.mailbox).await;
        assert!(matches!(
            report,
            Command::CatchUp(CatchUpCommand::RemoveStoppedCatchUp { finished: true, .. })
        ));

        f.handler.handle(Command::Stop("a".into())).await;
        assert_eq!(f.state("a"), Some(ProjectionState::Idle));
        f.handler.handle(report).await;

        assert_eq!(f.state("a"), Some(ProjectionState::Idle));
        assert!(f.mailbox.drain().is_empty());
    }

    #[tokio::test]
    async fn stop_all_stops_catch_ups_and_clears_the_live_table() {
        let positions = Arc::new(InMemoryPositionStore::new());
        positions.set_position("live", 2).await;
        let live = Recorder::new();
        let blocking = BlockingHandler::new();
        let mut f = fixture(
            3,
            vec![
                registration("live", &live, positions.clone()),
                ProjectionRegistration::with_handler(
                    "lagging",
                    Arc::new(blocking.clone()),
                    positions,
                ),
            ],
        )
        .await;

        f.handler.handle(Command::StartAll).await;
        f.handle_next().await;
        blocking.entered().await;
        f.log
            .append(NewStreamEvent::new("stream", "Happened", serde_json::json!({})))
            .await
            .unwrap();
        f.handle_next().await;
        {
            let snapshot = f.snapshots.borrow();
            assert_eq!(snapshot.state("live"), Some(ProjectionState::Live));
            assert_eq!(snapshot.state("lagging"), Some(ProjectionState::CatchingUp));
            assert_eq!(snapshot.live_position, Some(3));
        }

        f.handler.handle(Command::StopAll).await;

        let snapshot = f.snapshots.borrow().clone();
        assert!(snapshot.all_in(ProjectionState::Idle));
        assert_eq!(snapshot.live_position, None);
        assert_eq!(live.positions(), vec![3]);
    }

    #[tokio::test]
    async fn stop_does_not_stall_on_a_catch_up_that_ignores_cancellation() {
        let positions = Arc::new(InMemoryPositionStore::new());
        let stubborn = StubbornHandler::new();
        let mut f = fixture(
            3,
            vec![ProjectionRegistration::with_handler(
                "a",
                Arc::new(stubborn.clone()),
                positions,
            )],
        )
        .await;

        f.handler.handle(Command::Start("a".into())).await;
        f.handle_next().await;
        stubborn.entered().await;
        assert_eq!(f.state("a"), Some(ProjectionState::CatchingUp));

        tokio::time::timeout(
            Duration::from_secs(2),
            f.handler.handle(Command::Stop("a".into())),
        )
        .await
        .expect("stop should not wait for the handler");

        assert_eq!(f.state("a"), Some(ProjectionState::Idle));
    }

    #[tokio::test]
    async fn unchanged_state_is_not_republished() {
        let positions = Arc::new(InMemoryPositionStore::new());
        let recorder = Recorder::new();
        let mut f = fixture(0, vec![registration("a", &recorder, positions)]).await;
        f.snapshots.mark_unchanged();

        f.handler.handle(Command::Stop("a".into())).await;
        f.handler.handle(Command::Start("missing".into())).await;
        assert!(!f.snapshots.has_changed().unwrap());

        f.handler.handle(Command::Start("a".into())).await;
        assert!(f.snapshots.has_changed().unwrap());
        assert_eq!(f.state("missing"), None);
    }

    #[tokio::test]
    async fn shutdown_leaves_every_projection_idle() {
        let positions = Arc::new(InMemoryPositionStore::new());
        let recorder = Recorder::new();
        let blocking = BlockingHandler::new();
        let mut f = fixture(
            3,
            vec![
                registration("a", &recorder, positions.clone()),
                ProjectionRegistration::with_handler("b", Arc::new(blocking.clone()), positions),
            ],
        )
        .await;
        f.handler.handle(Command::Start("b".into())).await;
        f.handle_next().await;
        blocking.entered().await;

        f.handler.shutdown().await;

        assert!(f.snapshots.borrow().all_in(ProjectionState::Idle));
        assert_eq!(f.log.open_subscriptions().await, 0);
    }
}
