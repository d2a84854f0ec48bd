use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use projector_core::prelude::*;

/// An in-memory position store.
///
/// Contexts buffer their writes and apply them on commit; a context dropped without committing
/// leaves the store untouched.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPositionStore {
    positions: Arc<Mutex<HashMap<ProjectionName, u64>>>,
}

impl InMemoryPositionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed position of `name`.
    pub async fn position(&self, name: impl Into<ProjectionName>) -> Option<u64> {
        self.positions.lock().await.get(&name.into()).copied()
    }

    /// Overwrites the committed position of `name`.
    pub async fn set_position(&self, name: impl Into<ProjectionName>, position: u64) {
        self.positions.lock().await.insert(name.into(), position);
    }

    /// Forgets the committed position of `name`.
    pub async fn reset(&self, name: impl Into<ProjectionName>) {
        self.positions.lock().await.remove(&name.into());
    }
}

#[async_trait]
impl ContextFactory for InMemoryPositionStore {
    async fn create(&self) -> Result<Box<dyn ProjectionContext>, ContextError> {
        Ok(Box::new(InMemoryProjectionContext {
            positions: self.positions.clone(),
            pending: HashMap::new(),
        }))
    }
}

/// A unit of work against an [`InMemoryPositionStore`].
pub struct InMemoryProjectionContext {
    positions: Arc<Mutex<HashMap<ProjectionName, u64>>>,
    pending: HashMap<ProjectionName, u64>,
}

#[async_trait]
impl ProjectionContext for InMemoryProjectionContext {
    async fn get_position(
        &mut self,
        name: &ProjectionName,
    ) -> Result<Option<u64>, ContextError> {
        if let Some(position) = self.pending.get(name) {
            return Ok(Some(*position));
        }
        Ok(self.positions.lock().await.get(name).copied())
    }

    async fn set_position(
        &mut self,
        name: &ProjectionName,
        position: u64,
    ) -> Result<(), ContextError> {
        self.pending.insert(name.clone(), position);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ContextError> {
        let InMemoryProjectionContext { positions, pending } = *self;
        positions.lock().await.extend(pending);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
