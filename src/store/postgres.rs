use anyhow::{anyhow, Context};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::model::Entity;
use crate::store::traits::{EntityStore, StoreError};

/// PostgreSQL entity store keeping each entity as a JSONB snapshot with an
/// integer version column used for compare-and-swap updates.
pub struct PostgresEntityStore<E> {
    pool: PgPool,
    factory: Box<dyn Fn() -> E + Send + Sync>,
}

impl<E: Entity> PostgresEntityStore<E> {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        factory: impl Fn() -> E + Send + Sync + 'static,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self {
            pool,
            factory: Box::new(factory),
        })
    }

    /// Create the entities table if it does not exist yet
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oak_entities (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                version BIGINT NOT NULL,
                snapshot JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create oak_entities table")?;

        Ok(())
    }

    async fn current_version(&self, id: &str) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT version FROM oak_entities WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(E::KIND)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch entity version")?;

        row.map(|row| from_db_version(row.get("version"))).transpose()
    }
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Backend(anyhow!("version {version} out of range")))
}

fn from_db_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version)
        .map_err(|_| StoreError::Backend(anyhow!("negative version {version} in storage")))
}

#[async_trait::async_trait]
impl<E: Entity> EntityStore<E> for PostgresEntityStore<E> {
    async fn create(&self) -> Result<(String, E), StoreError> {
        let id = Uuid::new_v4().to_string();
        let entity = (self.factory)();
        let snapshot = serde_json::to_value(&entity)?;

        sqlx::query(
            "INSERT INTO oak_entities (id, kind, version, snapshot) VALUES ($1, $2, $3, $4)",
        )
        .bind(&id)
        .bind(E::KIND)
        .bind(to_db_version(entity.version())?)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .context("Failed to insert entity")?;

        Ok((id, entity))
    }

    async fn read(&self, id: &str) -> Result<E, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM oak_entities WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(E::KIND)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch entity")?;

        let Some(row) = row else {
            return Err(StoreError::NotFound(id.to_string()));
        };

        let snapshot: serde_json::Value = row.get("snapshot");
        Ok(serde_json::from_value(snapshot)?)
    }

    async fn update(&self, id: &str, entity: &mut E) -> Result<(), StoreError> {
        let expected = entity.version();
        let mut next = entity.clone();
        next.bump_version();
        let snapshot = serde_json::to_value(&next)?;

        let result = sqlx::query(
            r#"
            UPDATE oak_entities
            SET snapshot = $3, version = $4, updated_at = NOW()
            WHERE id = $1 AND kind = $5 AND version = $2
            "#,
        )
        .bind(id)
        .bind(to_db_version(expected)?)
        .bind(snapshot)
        .bind(to_db_version(next.version())?)
        .bind(E::KIND)
        .execute(&self.pool)
        .await
        .context("Failed to update entity")?;

        if result.rows_affected() == 0 {
            return match self.current_version(id).await? {
                Some(found) => Err(StoreError::VersionConflict {
                    id: id.to_string(),
                    expected,
                    found,
                }),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }

        *entity = next;
        Ok(())
    }
}
