//! The durable position store, seen through a scoped per-use context.
//!
//! A [`ContextFactory`] opens a [`ProjectionContext`]: a unit of work that can read and write
//! projection positions. Writes become durable on [`ProjectionContext::commit`]; dropping a
//! context without committing discards them. Backends that store projected state next to the
//! position (such as Postgres) expose their transaction through
//! [`ProjectionContext::as_any_mut`] so that state and position commit together.

use crate::BoxError;
use crate::name::ProjectionName;
use async_trait::async_trait;
use std::any::Any;

/// Errors reported by a position store.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The context could not be opened.
    #[error("Error opening projection context: {0}")]
    Open(#[source] BoxError),
    /// Reading, writing or committing a position failed.
    #[error("Position store error: {0}")]
    Store(#[source] BoxError),
}

/// A scoped unit of work against the position store.
#[async_trait]
pub trait ProjectionContext: Send {
    /// Returns the last position durably processed by `name`, if any.
    async fn get_position(&mut self, name: &ProjectionName)
    -> Result<Option<u64>, ContextError>;

    /// Records `position` as processed by `name`. Takes effect on commit.
    async fn set_position(
        &mut self,
        name: &ProjectionName,
        position: u64,
    ) -> Result<(), ContextError>;

    /// Makes every write done through this context durable.
    async fn commit(self: Box<Self>) -> Result<(), ContextError>;

    /// Gives projections access to the concrete backend context.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Opens projection contexts.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    /// Opens a new context.
    async fn create(&self) -> Result<Box<dyn ProjectionContext>, ContextError>;
}
