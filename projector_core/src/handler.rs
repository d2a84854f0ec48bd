//! This module defines the `Projection` trait implemented by users, and the `MessageHandler`
//! capability the coordinator drives.
//!
//! A `MessageHandler` processes a batch of events and durably advances the projection's
//! position as a side effect. [`ConnectedProjectionHandler`] is the standard handler: it binds
//! a `Projection` to a position store and makes delivery idempotent by skipping events at or
//! below the stored position.

use crate::BoxError;
use crate::cancellation::CancellationSignal;
use crate::context::{ContextError, ContextFactory, ProjectionContext};
use crate::event::StreamEvent;
use crate::name::ProjectionName;
use async_trait::async_trait;
use std::sync::Arc;

/// A projection failed to handle the event at a specific position.
#[derive(Debug, thiserror::Error)]
#[error("Projection {projection} failed to handle the message at position {position}: {source}")]
pub struct MessageHandlingError {
    /// The failing projection.
    pub projection: ProjectionName,
    /// The position of the offending event.
    pub position: u64,
    /// What the projection reported.
    #[source]
    pub source: BoxError,
}

/// Errors returned by a [`MessageHandler`].
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The projection failed on a specific event.
    #[error(transparent)]
    Message(#[from] MessageHandlingError),
    /// The position store failed.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Processes events on behalf of one projection, durably advancing its position.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles `messages` in order. Implementations check `cancellation` between events and
    /// stop early, keeping what has been handled so far.
    async fn handle(
        &self,
        messages: &[StreamEvent],
        cancellation: &CancellationSignal,
    ) -> Result<(), HandleError>;
}

/// A read model built from the event log.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Applies one event. Writes meant to be atomic with the position go through `context`.
    async fn apply(
        &self,
        context: &mut dyn ProjectionContext,
        event: &StreamEvent,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<P> Projection for Arc<P>
where
    P: Projection + ?Sized,
{
    async fn apply(
        &self,
        context: &mut dyn ProjectionContext,
        event: &StreamEvent,
    ) -> Result<(), BoxError> {
        (**self).apply(context, event).await
    }
}

/// Binds a [`Projection`] to the position store it records its progress in.
pub struct ConnectedProjectionHandler<P> {
    name: ProjectionName,
    projection: P,
    contexts: Arc<dyn ContextFactory>,
}

impl<P> ConnectedProjectionHandler<P>
where
    P: Projection,
{
    /// Creates a handler for the projection registered under `name`.
    pub fn new(
        name: impl Into<ProjectionName>,
        projection: P,
        contexts: Arc<dyn ContextFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            projection,
            contexts,
        }
    }

    /// The name the handler records positions under.
    pub fn name(&self) -> &ProjectionName {
        &self.name
    }
}

#[async_trait]
impl<P> MessageHandler for ConnectedProjectionHandler<P>
where
    P: Projection,
{
    async fn handle(
        &self,
        messages: &[StreamEvent],
        cancellation: &CancellationSignal,
    ) -> Result<(), HandleError> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut context = self.contexts.create().await?;
        let mut current = context.get_position(&self.name).await?;

        for event in messages {
            if cancellation.is_cancelled() {
                log::debug!(
                    "Projection {} cancelled before position {}",
                    self.name,
                    event.position
                );
                break;
            }

            if current.is_some_and(|position| event.position <= position) {
                log::debug!(
                    "Projection {} already handled position {}, skipping",
                    self.name,
                    event.position
                );
                continue;
            }

            self.projection
                .apply(context.as_mut(), event)
                .await
                .map_err(|source| MessageHandlingError {
                    projection: self.name.clone(),
                    position: event.position,
                    source,
                })?;
            context.set_position(&self.name, event.position).await?;
            current = Some(event.position);
        }

        context.commit().await?;
        Ok(())
    }
}
