//! Migration 002: Create the projection states table.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::{Migration, MigrationError};

/// Creates the table holding each projection's last processed position.
pub struct CreateProjectionStatesTable;

#[async_trait]
impl Migration for CreateProjectionStatesTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &'static str {
        "create_projection_states_table"
    }

    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projector_projection_states (
                name TEXT PRIMARY KEY,
                position BIGINT NOT NULL CHECK (position >= 0),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
