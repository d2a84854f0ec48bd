//! The commands drained by the coordinator's mailbox.
//!
//! `Start`, `StartAll`, `Stop` and `StopAll` are the public surface. Everything else is
//! internal machinery issued by the coordinator to itself: subscription commands are handled
//! by the live subscription runner, catch-up commands by the catch-up runner.

use crate::cancellation::CancellationSignal;
use crate::event::StreamEvent;
use crate::name::ProjectionName;
use std::fmt;

/// A command for the coordinator.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Command {
    /// Start a projection: catch it up if it lags, then tail the log.
    Start(ProjectionName),
    /// Start every registered projection.
    StartAll,
    /// Stop a projection, whether it is catching up or live.
    Stop(ProjectionName),
    /// Stop every projection.
    StopAll,
    /// A command for the live subscription runner.
    Subscription(SubscriptionCommand),
    /// A command for the catch-up runner.
    CatchUp(CatchUpCommand),
}

/// Commands handled by the live subscription runner.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SubscriptionCommand {
    /// Route a projection to the live dispatch table, or to catch-up when it lags.
    Subscribe(ProjectionName),
    /// Apply [`SubscriptionCommand::Subscribe`] to every registered projection.
    SubscribeAll,
    /// Remove a projection from the live dispatch table.
    Unsubscribe(ProjectionName),
    /// Clear the live dispatch table.
    UnsubscribeAll,
    /// Fan a live event out to the dispatch table.
    ProcessStreamEvent(ProcessStreamEvent),
}

/// Commands handled by the catch-up runner.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CatchUpCommand {
    /// Spawn a catch-up task for a projection.
    StartCatchUp(ProjectionName),
    /// Cancel a projection's catch-up task and wait for it to stop.
    StopCatchUp(ProjectionName),
    /// Cancel every catch-up task and wait for them to stop.
    StopAllCatchUps,
    /// Release the catch-up slot of a task that has stopped. A task that reached the head
    /// re-enters the live subscription decision, but only while it still owns the slot.
    RemoveStoppedCatchUp {
        /// The projection the task was catching up.
        name: ProjectionName,
        /// The task that stopped. Slots held by any other task are left alone.
        catch_up: CatchUpId,
        /// Whether the task reached the head of the log.
        finished: bool,
    },
}

/// A live event handed from the log subscription to the mailbox.
#[derive(Debug, Clone)]
pub struct ProcessStreamEvent {
    /// The event.
    pub event: StreamEvent,
    /// Fires when the subscription that delivered the event has gone away.
    pub cancellation: CancellationSignal,
}

/// Identifies one catch-up task among all the tasks ever spawned for a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CatchUpId(pub u64);

impl fmt::Display for CatchUpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<SubscriptionCommand> for Command {
    fn from(value: SubscriptionCommand) -> Self {
        Command::Subscription(value)
    }
}

impl From<CatchUpCommand> for Command {
    fn from(value: CatchUpCommand) -> Self {
        Command::CatchUp(value)
    }
}

impl From<ProcessStreamEvent> for Command {
    fn from(value: ProcessStreamEvent) -> Self {
        Command::Subscription(SubscriptionCommand::ProcessStreamEvent(value))
    }
}
