//! Database migration system for projector_pg.
//!
//! Migrations are versioned, checksummed and forward-only. Applied migrations are tracked in
//! the `_projector_migrations` table.
//!
//! ```rust,ignore
//! use projector_pg::Migrator;
//!
//! let migrator = Migrator::new(pool);
//! let applied = migrator.run().await?;
//! println!("Applied {} migrations, now at {}", applied, migrator.current_version().await?);
//! ```

mod m001_create_stream_events_table;
mod m002_create_projection_states_table;
mod m003_create_notify_function;

use m001_create_stream_events_table::CreateStreamEventsTable;
use m002_create_projection_states_table::CreateProjectionStatesTable;
use m003_create_notify_function::CreateNotifyFunction;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;

/// All migrations in order. Add new migrations to the end.
const MIGRATIONS: &[&dyn Migration] = &[
    &CreateStreamEventsTable,
    &CreateProjectionStatesTable,
    &CreateNotifyFunction,
];

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration's checksum doesn't match what was previously applied.
    #[error("Migration {version} ({name}) checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        /// The version of the migration.
        version: i64,
        /// The name of the migration.
        name: String,
        /// The checksum recorded in the database.
        expected: String,
        /// The checksum computed from the code.
        found: String,
    },

    /// A migration failed to execute.
    #[error("Migration {version} ({name}) failed: {reason}")]
    MigrationFailed {
        /// The version of the migration that failed.
        version: i64,
        /// The name of the migration.
        name: String,
        /// The reason for the failure.
        reason: String,
    },
}

/// A single database migration.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique, increasing version number.
    fn version(&self) -> i64;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Executes the migration inside the transaction the [`Migrator`] owns. Do not commit.
    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError>;

    /// SHA-256 over version and name, used to detect edited migrations.
    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version().to_le_bytes());
        hasher.update(self.name().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Record of a migration that has been applied.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// The version number of the migration.
    pub version: i64,
    /// The name of the migration.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: chrono::DateTime<chrono::Utc>,
    /// The checksum recorded when the migration was applied.
    pub checksum: String,
}

/// Applies projector_pg's migrations in order, each exactly once.
#[derive(Debug, Clone)]
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    /// Creates a migrator on `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_tracking_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _projector_migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum VARCHAR(64) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Runs all pending migrations, each in its own transaction, and returns how many ran.
    ///
    /// Fails without running anything if an applied migration's checksum changed.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        let applied = self.applied().await?;
        verify_checksums(&applied)?;

        let applied_versions: HashSet<i64> = applied.iter().map(|m| m.version).collect();
        let mut count = 0;

        for migration in MIGRATIONS {
            if applied_versions.contains(&migration.version()) {
                log::debug!(
                    "Skipping migration {} ({}): already applied",
                    migration.version(),
                    migration.name()
                );
                continue;
            }

            log::info!(
                "Running migration {} ({})...",
                migration.version(),
                migration.name()
            );
            let mut tx = self.pool.begin().await?;

            migration.up(&mut tx).await.map_err(|e| match e {
                MigrationError::Database(db_err) => MigrationError::MigrationFailed {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    reason: db_err.to_string(),
                },
                other => other,
            })?;

            sqlx::query(
                r#"
                INSERT INTO _projector_migrations (version, name, checksum)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(migration.version())
            .bind(migration.name())
            .bind(migration.checksum())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            count += 1;
        }

        Ok(count)
    }

    /// Returns the highest applied version, 0 when nothing was applied.
    pub async fn current_version(&self) -> Result<i64, MigrationError> {
        self.ensure_tracking_table().await?;

        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM _projector_migrations")
                .fetch_one(&self.pool)
                .await?;

        Ok(version.unwrap_or(0))
    }

    /// Returns the migrations that have not been applied yet.
    pub async fn pending(&self) -> Result<Vec<&'static dyn Migration>, MigrationError> {
        let applied_versions: HashSet<i64> =
            self.applied().await?.iter().map(|m| m.version).collect();

        Ok(MIGRATIONS
            .iter()
            .filter(|m| !applied_versions.contains(&m.version()))
            .copied()
            .collect())
    }

    /// Returns the applied migrations, oldest first.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_tracking_table().await?;

        let rows = sqlx::query(
            r#"
            SELECT version, name, applied_at, checksum
            FROM _projector_migrations
            ORDER BY version ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                version: row.get("version"),
                name: row.get("name"),
                applied_at: row.get("applied_at"),
                checksum: row.get("checksum"),
            })
            .collect())
    }
}

fn verify_checksums(applied: &[AppliedMigration]) -> Result<(), MigrationError> {
    for record in applied {
        let Some(migration) = MIGRATIONS.iter().find(|m| m.version() == record.version) else {
            continue;
        };
        let found = migration.checksum();
        if found != record.checksum {
            return Err(MigrationError::ChecksumMismatch {
                version: record.version,
                name: record.name.clone(),
                expected: record.checksum.clone(),
                found,
            });
        }
    }
    Ok(())
}
