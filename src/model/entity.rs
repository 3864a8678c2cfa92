use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors raised by an entity's own business rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("entity is no longer active")]
    Inactive,
    #[error("entity is full ({max} users)")]
    Full { max: usize },
    #[error("user {0} is not registered with this entity")]
    UnknownUser(String),
    #[error("{0}")]
    Rejected(String),
}

/// A versioned, mutable unit of shared state.
///
/// Handlers only ever talk to an entity through this capability set. The
/// store owns the authoritative copy; sessions carry a snapshot of it.
///
/// Implementations must keep `is_active` monotonic: once an entity reports
/// inactive it never becomes active again.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Parameters accepted by [`Entity::act`], decoded from the request body.
    type Action: DeserializeOwned + Send + Sync;

    /// Tag written next to session snapshots so a cookie minted for one
    /// entity type is never decoded as another.
    const KIND: &'static str;

    fn version(&self) -> u64;

    /// Advance the version by one. Called by stores on a committed write.
    fn bump_version(&mut self);

    fn is_active(&self) -> bool;

    fn created_by(&self) -> &str;

    fn register_new_user(&mut self) -> Result<String, EntityError>;

    fn unregister_user(&mut self, user_id: &str) -> Result<(), EntityError>;

    /// Self-maintenance hook run on every fetch. Returns true when the
    /// entity changed and needs to be persisted.
    fn kick(&mut self) -> bool;

    fn act(&mut self, user_id: &str, action: &Self::Action) -> Result<(), EntityError>;
}
