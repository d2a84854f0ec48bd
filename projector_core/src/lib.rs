//! # Projector core
//!
//! Value types and backend traits shared by the projection coordinator and its storage
//! backends. Nothing in here spawns tasks or owns state: the coordinator lives in the
//! `projector` crate, the backends in `projector_mem` and `projector_pg`.

#![deny(missing_docs)]

pub mod cancellation;
pub mod command;
pub mod context;
pub mod event;
pub mod handler;
pub mod event_log;
pub mod name;
pub mod registration;

pub use name::NamedProjection;

/// Boxed error used wherever a backend or a projection reports a failure the core does not
/// need to inspect.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub mod prelude {
    //! The prelude module for the `projector_core` crate.
    pub use super::BoxError;
    pub use super::cancellation::{CancellationSignal, CancellationSource};
    pub use super::command::{
        CatchUpCommand, CatchUpId, Command, ProcessStreamEvent, SubscriptionCommand,
    };
    pub use super::context::{ContextError, ContextFactory, ProjectionContext};
    pub use super::event::{NewStreamEvent, StreamEvent};
    pub use super::handler::{
        ConnectedProjectionHandler, HandleError, MessageHandler, MessageHandlingError,
        Projection,
    };
    pub use super::event_log::{
        AllStreamObserver, AllStreamPages, EventLog, LiveSubscription, LogError, ReadAllPage,
        SubscriptionDroppedReason, is_caught_up,
    };
    pub use super::name::{NamedProjection, ProjectionName};
    pub use super::registration::ProjectionRegistration;
}
