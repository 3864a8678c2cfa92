use axum_extra::extract::cookie::SignedCookieJar;
use thiserror::Error;

use crate::model::{Entity, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(String),
    #[error("version conflict on entity {id}: expected {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },
    #[error("failed to encode entity snapshot: {0}")]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for entities with optimistic, version-gated writes.
#[async_trait::async_trait]
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Allocate a fresh entity and the id it is stored under
    async fn create(&self) -> Result<(String, E), StoreError>;
    /// Latest persisted snapshot of an entity
    async fn read(&self, id: &str) -> Result<E, StoreError>;
    /// Compare-and-swap write.
    ///
    /// Succeeds only if the persisted version equals `entity.version()`; the
    /// version is then bumped on both the stored copy and `entity`. On a
    /// mismatch nothing is written and `StoreError::VersionConflict` is
    /// returned.
    async fn update(&self, id: &str, entity: &mut E) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cookie is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to compress session: {0}")]
    Compress(#[from] std::io::Error),
    #[error("session already saved for this request")]
    AlreadySaved,
}

/// Cookie-backed session persistence.
pub trait SessionStore<E: Entity>: Send + Sync {
    fn get(&self, jar: &SignedCookieJar) -> Result<Session<E>, SessionError>;
    /// Write `session` into the jar, returning the jar to attach to the response
    fn save(
        &self,
        jar: SignedCookieJar,
        session: &Session<E>,
    ) -> Result<SignedCookieJar, SessionError>;
}
