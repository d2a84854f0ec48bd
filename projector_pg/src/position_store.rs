use async_trait::async_trait;
use projector_core::prelude::*;
use sqlx::{PgPool, Postgres, Transaction};
use std::any::Any;

/// Stores projection positions in `projector_projection_states`.
///
/// Each context is a database transaction. Projections that keep their read model in the same
/// database write it through [`PgProjectionContext::transaction`], so the state and the
/// position commit or roll back together.
#[derive(Debug, Clone)]
pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    /// Creates a store on `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the committed position of `name`.
    pub async fn position(&self, name: &ProjectionName) -> Result<Option<u64>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        read_position(&mut conn, name).await
    }

    /// Overwrites the committed position of `name`.
    pub async fn set_position(
        &self,
        name: &ProjectionName,
        position: u64,
    ) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        write_position(&mut conn, name, position).await
    }

    /// Forgets the committed position of `name`, so the projection replays from the start.
    pub async fn reset(&self, name: &ProjectionName) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM projector_projection_states WHERE name = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn read_position(
    conn: &mut sqlx::PgConnection,
    name: &ProjectionName,
) -> Result<Option<u64>, sqlx::Error> {
    let position: Option<i64> =
        sqlx::query_scalar("SELECT position FROM projector_projection_states WHERE name = $1")
            .bind(name.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(position.and_then(|p| u64::try_from(p).ok()))
}

async fn write_position(
    conn: &mut sqlx::PgConnection,
    name: &ProjectionName,
    position: u64,
) -> Result<(), sqlx::Error> {
    let position = i64::try_from(position).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        r#"
        INSERT INTO projector_projection_states (name, position, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (name) DO UPDATE
        SET position = EXCLUDED.position, updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(name.as_str())
    .bind(position)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ContextFactory for PgPositionStore {
    async fn create(&self) -> Result<Box<dyn ProjectionContext>, ContextError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ContextError::Open(Box::new(e)))?;
        Ok(Box::new(PgProjectionContext { tx }))
    }
}

/// A transaction on the position store.
///
/// Dropping the context without committing rolls the transaction back.
pub struct PgProjectionContext {
    tx: Transaction<'static, Postgres>,
}

impl PgProjectionContext {
    /// The transaction positions are written in.
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

#[async_trait]
impl ProjectionContext for PgProjectionContext {
    async fn get_position(
        &mut self,
        name: &ProjectionName,
    ) -> Result<Option<u64>, ContextError> {
        read_position(&mut self.tx, name)
            .await
            .map_err(|e| ContextError::Store(Box::new(e)))
    }

    async fn set_position(
        &mut self,
        name: &ProjectionName,
        position: u64,
    ) -> Result<(), ContextError> {
        write_position(&mut self.tx, name, position)
            .await
            .map_err(|e| ContextError::Store(Box::new(e)))
    }

    async fn commit(self: Box<Self>) -> Result<(), ContextError> {
        self.tx
            .commit()
            .await
            .map_err(|e| ContextError::Store(Box::new(e)))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
