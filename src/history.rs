// Strip history: one row per saved strip, updated as copies print

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::HistoryError;
use crate::events::{BoothEvent, EventBus};

#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct StripRecord {
    pub id: String,
    pub created_at: String,
    pub template: String,
    pub path: String,
    pub shots: i64,
    pub copies_printed: i64,
}

#[derive(Clone)]
pub struct StripHistory {
    pool: SqlitePool,
}

impl StripHistory {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, HistoryError> {
        info!("Initializing database at: {:?}", config.path);

        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HistoryError::MigrationFailed(format!(
                    "Failed to create database directory: {}",
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&config.connection_string()).await?;
        let history = Self::from_pool(pool).await?;
        info!("Database connected and migrations completed");
        Ok(history)
    }

    /// Private in-memory database, used when no file is wanted.
    pub async fn in_memory() -> Result<Self, HistoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| HistoryError::MigrationFailed(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn record_strip(
        &self,
        id: Uuid,
        path: &str,
        template: &str,
        shots: usize,
    ) -> Result<(), HistoryError> {
        sqlx::query(
            r#"
            INSERT INTO strip (id, created_at, template, path, shots, copies_printed)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
        )
        .bind(id.to_string())
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(template)
        .bind(path)
        .bind(shots as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryError::QueryFailed(format!("Failed to record strip: {}", e)))?;

        Ok(())
    }

    /// Adds printed copies to a strip. Unknown ids are ignored.
    pub async fn add_copies(&self, id: Uuid, copies: u32) -> Result<(), HistoryError> {
        sqlx::query("UPDATE strip SET copies_printed = copies_printed + ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(copies as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| HistoryError::QueryFailed(format!("Failed to update copies: {}", e)))?;

        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<StripRecord>, HistoryError> {
        let record = sqlx::query_as::<_, StripRecord>(
            r#"
            SELECT id, created_at, template, path, shots, copies_printed
            FROM strip
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HistoryError::QueryFailed(format!("Failed to load strip: {}", e)))?;

        Ok(record)
    }

    /// Newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StripRecord>, HistoryError> {
        let records = sqlx::query_as::<_, StripRecord>(
            r#"
            SELECT id, created_at, template, path, shots, copies_printed
            FROM strip
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HistoryError::QueryFailed(format!("Failed to list strips: {}", e)))?;

        Ok(records)
    }

    async fn apply(&self, event: &BoothEvent) -> Result<(), HistoryError> {
        match event {
            BoothEvent::ArtifactSaved {
                id,
                path,
                template,
                shots,
            } => self.record_strip(*id, path, template, *shots).await,
            BoothEvent::PrintFinished { id, copies } => self.add_copies(*id, *copies).await,
            BoothEvent::PrintFailed { id, completed, .. } if *completed > 0 => {
                self.add_copies(*id, *completed).await
            }
            _ => Ok(()),
        }
    }

    /// Follows the event bus and records saved strips and finished print
    /// runs until the bus is dropped.
    pub fn spawn_recorder(&self, events: &EventBus) -> JoinHandle<()> {
        let history = self.clone();
        let mut receiver = events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = history.apply(&event).await {
                            warn!("Failed to record history: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("History recorder skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
