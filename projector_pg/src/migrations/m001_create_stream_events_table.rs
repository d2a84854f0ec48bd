//! Migration 001: Create the stream events table.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::{Migration, MigrationError};

/// Creates the append-only log table.
pub struct CreateStreamEventsTable;

#[async_trait]
impl Migration for CreateStreamEventsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &'static str {
        "create_stream_events_table"
    }

    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projector_stream_events (
                position BIGSERIAL PRIMARY KEY,
                message_id UUID NOT NULL UNIQUE,
                stream_id TEXT NOT NULL,
                stream_version BIGINT NOT NULL,
                event_type VARCHAR(255) NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (stream_id, stream_version)
            )
            "#,
        )
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
