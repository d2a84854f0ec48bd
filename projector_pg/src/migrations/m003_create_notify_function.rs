//! Migration 003: Create the notification function used by the insert trigger.
//!
//! The trigger itself is installed by `PgEventLog::setup_trigger`, because its channel is
//! configurable.

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use super::{Migration, MigrationError};

/// Creates `projector_notify_stream_event(channel)`.
pub struct CreateNotifyFunction;

#[async_trait]
impl Migration for CreateNotifyFunction {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &'static str {
        "create_notify_function"
    }

    async fn up<'a>(&self, tx: &mut Transaction<'a, Postgres>) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION projector_notify_stream_event()
            RETURNS TRIGGER AS $$
            BEGIN
                PERFORM pg_notify(TG_ARGV[0], (NEW.position - 1)::text);
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql;
            "#,
        )
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
