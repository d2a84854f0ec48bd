//! # Projector
//!
//! Coordinates projections over an append-only event log. Every projection sees every event in
//! log order: projections that lag behind replay history in pages, then join a single shared
//! live subscription. All state changes are serialized through one command mailbox, so the
//! handoff between replay and live tailing is race free, and a failing projection only takes
//! itself down.
//!
//! ```ignore
//! use std::sync::Arc;
//! use projector::prelude::*;
//!
//! let log = InMemoryEventLog::new();
//! let positions = Arc::new(InMemoryPositionStore::new());
//!
//! let manager = ProjectionManager::builder(Arc::new(log.clone()))
//!     .register(ProjectionRegistration::named(StreetCountProjection::default(), positions))
//!     .build()?;
//! manager.start_all();
//! // ...
//! manager.shutdown().await?;
//! ```

#![deny(missing_docs)]

mod bus;
mod command_handler;
mod config;
mod error;
mod manager;
mod registry;
mod runners;
mod state;
#[cfg(test)]
mod test_support;

pub use config::ProjectorConfig;
pub use error::ProjectorError;
pub use manager::{ProjectionManager, ProjectionManagerBuilder};
pub use state::{ProjectionState, ProjectorSnapshot};

pub use projector_core as core;

#[cfg(feature = "derive")]
/// Proc-macros for the `projector` crate.
pub mod derive {
    //! Contains the `ProjectionName` derive.
    pub use projector_derive::*;
}

#[cfg(feature = "in-memory")]
/// In-memory event log and position store.
pub mod mem {
    //! Contains the in-memory backend.
    pub use projector_mem::*;
}

#[cfg(feature = "postgres")]
/// Postgres event log, position store and migrations.
pub mod pg {
    //! Contains the postgres backend.
    pub use projector_pg::*;
}

pub mod prelude {
    //! The prelude module for the `projector` crate.
    pub use super::{
        ProjectionManager, ProjectionManagerBuilder, ProjectionState, ProjectorConfig,
        ProjectorError, ProjectorSnapshot,
    };
    pub use projector_core::prelude::*;

    #[cfg(feature = "derive")]
    pub use super::derive::*;
    #[cfg(feature = "in-memory")]
    pub use super::mem::*;
}
