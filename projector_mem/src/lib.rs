//! # Projector memory backend
//!
//! In-memory implementations of the event log and the position store, primarily for tests
//! and demos. Nothing is persisted.
//!
//! ```ignore
//! use std::sync::Arc;
//! use projector_core::prelude::*;
//! use projector_mem::{InMemoryEventLog, InMemoryPositionStore};
//!
//! let log = InMemoryEventLog::new();
//! let positions = Arc::new(InMemoryPositionStore::new());
//!
//! log.append(NewStreamEvent::new("street-1", "StreetNameProposed", serde_json::json!({})))
//!     .await?;
//! positions.set_position("streets", 0).await;
//! ```

#![deny(missing_docs)]

mod event_log;
mod position_store;

pub use event_log::*;
pub use position_store::*;
