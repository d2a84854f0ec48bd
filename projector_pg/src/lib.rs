//! # Projector postgres backend
//!
//! A Postgres-backed event log with LISTEN/NOTIFY live subscriptions, a position store whose
//! contexts are database transactions, and the embedded migrations for both.
//!
//! ```rust,ignore
//! use projector_pg::{Migrator, PgEventLog, PgPositionStore};
//!
//! Migrator::new(pool.clone()).run().await?;
//! let log = PgEventLog::new(pool.clone());
//! log.setup_trigger().await?;
//! let positions = PgPositionStore::new(pool.clone());
//! ```

#![deny(missing_docs)]

/// The event_log module exports the postgres implementation of the EventLog
pub mod event_log;

/// Database migrations for projector_pg schema management
pub mod migrations;

/// The position store implementation for postgres
pub mod position_store;

pub use event_log::{PgEventLog, PgEventLogConfig, PgEventLogError, PgSubscription};
pub use migrations::{AppliedMigration, Migration, MigrationError, Migrator};
pub use position_store::{PgPositionStore, PgProjectionContext};
