//! # PostgreSQL Snapshot Store
//!
//! Snapshots are stored as JSONB, one row per resource. The upsert only replaces
//! a row when the incoming generation is at least the stored one, and never
//! replaces an outdated row with a live snapshot of the same generation. A
//! rejected write is reported as [`StoreError::StaleGeneration`] or
//! [`StoreError::Superseded`].

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::snapshot_store::SnapshotStore;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::ProcessSnapshot;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS process_snapshots (
    resource_id TEXT PRIMARY KEY,
    generation BIGINT NOT NULL,
    snapshot JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

const UPSERT_SQL: &str = r#"
INSERT INTO process_snapshots (resource_id, generation, snapshot, updated_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (resource_id) DO UPDATE
SET generation = EXCLUDED.generation,
    snapshot = EXCLUDED.snapshot,
    updated_at = EXCLUDED.updated_at
WHERE process_snapshots.generation < EXCLUDED.generation
   OR (process_snapshots.generation = EXCLUDED.generation
       AND (process_snapshots.snapshot->>'status' IS DISTINCT FROM 'outdated'
            OR EXCLUDED.snapshot->>'status' = 'outdated'))
"#;

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the `database` configuration section
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Database("database.url is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "💾 DATABASE: Snapshot store connected"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the snapshot table if it does not exist yet
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        debug!("process_snapshots table ensured");
        Ok(())
    }

    pub async fn health_check(&self) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    async fn stored_generation(&self, resource_id: &str) -> StoreResult<Option<u64>> {
        let row = sqlx::query("SELECT generation FROM process_snapshots WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let generation: i64 = row.try_get("generation")?;
                Ok(Some(from_db_generation(generation)?))
            }
            None => Ok(None),
        }
    }
}

fn to_db_generation(generation: u64) -> StoreResult<i64> {
    i64::try_from(generation)
        .map_err(|_| StoreError::Database(format!("generation {generation} exceeds BIGINT")))
}

fn from_db_generation(generation: i64) -> StoreResult<u64> {
    u64::try_from(generation)
        .map_err(|_| StoreError::Database(format!("negative generation {generation} stored")))
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self, resource_id: &str) -> StoreResult<Option<ProcessSnapshot>> {
        let row = sqlx::query("SELECT snapshot FROM process_snapshots WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(snapshot): Json<ProcessSnapshot> = row.try_get("snapshot")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &ProcessSnapshot) -> StoreResult<()> {
        let result = sqlx::query(UPSERT_SQL)
            .bind(&snapshot.resource_id)
            .bind(to_db_generation(snapshot.generation)?)
            .bind(Json(snapshot))
            .bind(snapshot.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            let stored = self
                .stored_generation(&snapshot.resource_id)
                .await?
                .unwrap_or_default();
            if stored == snapshot.generation {
                return Err(StoreError::Superseded {
                    resource_id: snapshot.resource_id.clone(),
                    generation: snapshot.generation,
                });
            }
            return Err(StoreError::StaleGeneration {
                resource_id: snapshot.resource_id.clone(),
                attempted: snapshot.generation,
                stored,
            });
        }

        debug!(
            resource_id = %snapshot.resource_id,
            generation = snapshot.generation,
            "Snapshot persisted"
        );
        Ok(())
    }
}
