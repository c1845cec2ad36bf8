use crate::config::DatabaseConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Caller-supplied identity of a registered owner
pub type OwnerId = i16;

/// Store-assigned identity of a persisted frame
pub type FrameId = i64;

/// Errors raised by the record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable storage for owners and raw frame bytes.
///
/// Every call is an independent write. Callers persisting an owner followed
/// by several frames get no atomicity across those calls: rows written before
/// a failure stay written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert an owner record
    async fn create_owner(&self, owner_id: OwnerId) -> Result<(), StoreError>;

    /// Insert one frame for an owner, returning the assigned frame id
    async fn create_frame(&self, owner_id: OwnerId, payload: &[u8]) -> Result<FrameId, StoreError>;

    /// Check store connectivity
    async fn ping(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed record store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn create_owner(&self, owner_id: OwnerId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, created_at)
            VALUES ($1, $2)
            "#,
        )
        .bind(owner_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(user_id = owner_id, "Owner created");
        metrics::counter!("attendance.owners.created").increment(1);

        Ok(())
    }

    #[instrument(skip(self, payload), fields(frame_size = payload.len()))]
    async fn create_frame(&self, owner_id: OwnerId, payload: &[u8]) -> Result<FrameId, StoreError> {
        // No transaction: each frame commits on its own
        let (frame_id,): (FrameId,) = sqlx::query_as(
            r#"
            INSERT INTO frames (user_id, created_at, frame_bytes)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(owner_id)
        .bind(Utc::now())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(frame_id = frame_id, user_id = owner_id, "Frame persisted");
        metrics::counter!("attendance.frames.persisted").increment(1);

        Ok(frame_id)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
