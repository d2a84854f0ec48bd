//! Registration of projections with the coordinator.

use crate::context::{ContextError, ContextFactory};
use crate::handler::{ConnectedProjectionHandler, MessageHandler, Projection};
use crate::name::{NamedProjection, ProjectionName};
use std::fmt;
use std::sync::Arc;

/// Everything the coordinator needs to drive one projection: its name, the handler that
/// processes events for it, and the factory for contexts exposing its durable position.
///
/// Registrations are created once at startup; the coordinator never mutates them.
#[derive(Clone)]
pub struct ProjectionRegistration {
    name: ProjectionName,
    handler: Arc<dyn MessageHandler>,
    contexts: Arc<dyn ContextFactory>,
}

impl ProjectionRegistration {
    /// Registers `projection` under `name`, recording its progress in `contexts`.
    pub fn new<P>(
        name: impl Into<ProjectionName>,
        projection: P,
        contexts: Arc<dyn ContextFactory>,
    ) -> Self
    where
        P: Projection + 'static,
    {
        let name = name.into();
        let handler = ConnectedProjectionHandler::new(name.clone(), projection, contexts.clone());
        Self {
            name,
            handler: Arc::new(handler),
            contexts,
        }
    }

    /// Registers `projection` under the name it provides.
    pub fn named<P>(projection: P, contexts: Arc<dyn ContextFactory>) -> Self
    where
        P: Projection + NamedProjection + 'static,
    {
        let name = ProjectionName::new(projection.projection_name());
        Self::new(name, projection, contexts)
    }

    /// Registers a custom handler under `name`. The handler is responsible for advancing the
    /// position `contexts` reports.
    pub fn with_handler(
        name: impl Into<ProjectionName>,
        handler: Arc<dyn MessageHandler>,
        contexts: Arc<dyn ContextFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            contexts,
        }
    }

    /// The projection's name.
    pub fn name(&self) -> &ProjectionName {
        &self.name
    }

    /// The projection's handler.
    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.handler.clone()
    }

    /// Reads the projection's durable position through a fresh context.
    pub async fn read_position(&self) -> Result<Option<u64>, ContextError> {
        let mut context = self.contexts.create().await?;
        context.get_position(&self.name).await
    }
}

impl fmt::Debug for ProjectionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
