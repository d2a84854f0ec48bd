//! The postgres event log.
//!
//! Events live in `projector_stream_events`. The table's `BIGSERIAL` key starts at 1, positions
//! exposed to the coordinator start at 0: position `p` is stored as `p + 1`.

mod config;
mod listener;

pub use config::{DEFAULT_CHANNEL_NAME, PgEventLogConfig};
pub use listener::PgSubscription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use projector_core::prelude::*;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

/// Key of the transaction-scoped advisory lock serializing appends, so that positions become
/// visible in order.
const APPEND_LOCK_KEY: i64 = 0x7072_6f6a_6563_746f;

/// Errors returned by [`PgEventLog`]'s inherent methods.
#[derive(Debug, thiserror::Error)]
pub enum PgEventLogError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgStreamEventRow {
    position: i64,
    message_id: Uuid,
    stream_id: String,
    stream_version: i64,
    event_type: String,
    data: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<PgStreamEventRow> for StreamEvent {
    fn from(row: PgStreamEventRow) -> Self {
        StreamEvent {
            position: from_db_position(row.position),
            message_id: row.message_id,
            stream_id: row.stream_id,
            stream_version: u64::try_from(row.stream_version).unwrap_or_default(),
            event_type: row.event_type,
            data: row.data,
            created_at: row.created_at,
        }
    }
}

pub(crate) fn from_db_position(position: i64) -> u64 {
    u64::try_from(position.saturating_sub(1)).unwrap_or_default()
}

pub(crate) fn to_db_position(position: u64) -> i64 {
    i64::try_from(position)
        .unwrap_or(i64::MAX - 1)
        .saturating_add(1)
}

/// Reads at most `limit` rows stored strictly after `after_db_position`.
pub(crate) async fn read_rows_after(
    pool: &PgPool,
    after_db_position: i64,
    limit: i64,
) -> Result<Vec<PgStreamEventRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT position, message_id, stream_id, stream_version, event_type, data, created_at
        FROM projector_stream_events
        WHERE position > $1
        ORDER BY position ASC
        LIMIT $2
        "#,
    )
    .bind(after_db_position)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// An event log stored in postgres.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
    config: Arc<PgEventLogConfig>,
}

impl PgEventLog {
    /// Creates a log with the default configuration.
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, PgEventLogConfig::default())
    }

    /// Creates a log with a custom configuration.
    pub fn with_config(pool: PgPool, config: PgEventLogConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// The log's configuration.
    pub fn config(&self) -> &PgEventLogConfig {
        &self.config
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Appends an event and returns its position.
    pub async fn append(&self, event: NewStreamEvent) -> Result<u64, PgEventLogError> {
        let mut tx = self.pool.begin().await?;
        let position = Self::append_in(&mut tx, event).await?;
        tx.commit().await?;
        Ok(position)
    }

    /// Appends events in order within one transaction and returns the position of the last one.
    pub async fn append_all(
        &self,
        events: impl IntoIterator<Item = NewStreamEvent>,
    ) -> Result<Option<u64>, PgEventLogError> {
        let mut tx = self.pool.begin().await?;
        let mut last = None;
        for event in events {
            last = Some(Self::append_in(&mut tx, event).await?);
        }
        tx.commit().await?;
        Ok(last)
    }

    /// Appends an event inside a caller-owned transaction. Positions become visible when the
    /// transaction commits; the append lock is held until then.
    pub async fn append_in(
        tx: &mut Transaction<'_, Postgres>,
        event: NewStreamEvent,
    ) -> Result<u64, PgEventLogError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut **tx)
            .await?;

        let position: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO projector_stream_events
                (message_id, stream_id, stream_version, event_type, data, created_at)
            SELECT $1, $2, COALESCE(MAX(stream_version) + 1, 0), $3, $4, NOW()
            FROM projector_stream_events
            WHERE stream_id = $2
            RETURNING position
            "#,
        )
        .bind(event.message_id)
        .bind(&event.stream_id)
        .bind(&event.event_type)
        .bind(&event.data)
        .fetch_one(&mut **tx)
        .await?;

        log::debug!(
            "Appended {} to stream {} at position {}",
            event.event_type,
            event.stream_id,
            from_db_position(position)
        );
        Ok(from_db_position(position))
    }

    /// Sets up the trigger that notifies this log's channel on every insert.
    ///
    /// Call this after running migrations. Idempotent: the trigger is dropped and recreated.
    pub async fn setup_trigger(&self) -> Result<(), PgEventLogError> {
        sqlx::query(
            r#"
            DROP TRIGGER IF EXISTS projector_stream_events_notify_trigger ON projector_stream_events;
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trigger arguments can't be bound; quotes in the channel name are escaped instead.
        let create_trigger_query = format!(
            r#"
            CREATE TRIGGER projector_stream_events_notify_trigger
            AFTER INSERT ON projector_stream_events
            FOR EACH ROW
            EXECUTE FUNCTION projector_notify_stream_event('{}');
            "#,
            self.config.channel_name.replace('\'', "''")
        );
        sqlx::query(&create_trigger_query)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn read_head_position(&self) -> Result<Option<u64>, LogError> {
        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(position) FROM projector_stream_events")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| LogError::Read(Box::new(e)))?;
        Ok(head.map(from_db_position))
    }

    async fn read_all_forwards(
        &self,
        from_position: u64,
        max_count: usize,
    ) -> Result<ReadAllPage, LogError> {
        let max_count = max_count.max(1);
        // One extra row tells whether the page reaches the head.
        let limit = i64::try_from(max_count).unwrap_or(i64::MAX - 1) + 1;
        let after = to_db_position(from_position) - 1;
        let rows = read_rows_after(&self.pool, after, limit)
            .await
            .map_err(|e| LogError::Read(Box::new(e)))?;

        let is_end = rows.len() <= max_count;
        let messages: Vec<StreamEvent> = rows
            .into_iter()
            .take(max_count)
            .map(StreamEvent::from)
            .collect();
        let next_position = messages
            .last()
            .map_or(from_position, |e| e.position + 1);
        log::debug!(
            "Read {} events from position {}",
            messages.len(),
            from_position
        );

        Ok(ReadAllPage {
            from_position,
            next_position,
            is_end,
            messages,
        })
    }

    async fn subscribe_to_all(
        &self,
        after_position: Option<u64>,
        observer: Arc<dyn AllStreamObserver>,
    ) -> Result<Box<dyn LiveSubscription>, LogError> {
        let subscription = PgSubscription::open(
            self.pool.clone(),
            self.config.clone(),
            after_position,
            observer,
        )
        .await?;
        Ok(Box::new(subscription))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_shifted_by_one() {
        assert_eq!(to_db_position(0), 1);
        assert_eq!(from_db_position(1), 0);
        assert_eq!(from_db_position(to_db_position(41)), 41);
    }

    #[test]
    fn out_of_range_positions_saturate() {
        assert_eq!(from_db_position(0), 0);
        assert_eq!(from_db_position(-5), 0);
        assert_eq!(to_db_position(u64::MAX), i64::MAX);
    }
}
