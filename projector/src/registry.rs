use crate::error::ProjectorError;
use projector_core::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// The projections known to the coordinator, fixed at build time.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProjectionRegistry {
    projections: Arc<HashMap<ProjectionName, ProjectionRegistration>>,
}

impl ProjectionRegistry {
    pub(crate) fn new(
        registrations: impl IntoIterator<Item = ProjectionRegistration>,
    ) -> Result<Self, ProjectorError> {
        let mut projections = HashMap::new();
        for registration in registrations {
            let name = registration.name().clone();
            if projections.insert(name.clone(), registration).is_some() {
                return Err(ProjectorError::DuplicateProjection(name));
            }
        }
        Ok(Self {
            projections: Arc::new(projections),
        })
    }

    pub(crate) fn get(&self, name: &ProjectionName) -> Option<&ProjectionRegistration> {
        self.projections.get(name)
    }

    /// Registered names in name order.
    pub(crate) fn names(&self) -> Vec<ProjectionName> {
        let mut names: Vec<ProjectionName> = self.projections.keys().cloned().collect();
        names.sort();
        names
    }
}
