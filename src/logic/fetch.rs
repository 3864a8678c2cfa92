use log::debug;
use rand::Rng;
use std::time::Duration;

use crate::error::OakError;
use crate::model::Entity;
use crate::store::{EntityStore, StoreError};

/// Bounds the optimistic retry loop used when a version-gated write loses.
///
/// Delays use full jitter: retry `n` sleeps a random duration in
/// `[0, min(max_delay, base_delay * 2^n)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Total attempts, never less than one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound of the delay before retry `retry_index` (0-based)
    pub fn backoff_cap(&self, retry_index: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    async fn backoff(&self, retry_index: u32) {
        let cap = self.backoff_cap(retry_index).as_millis() as u64;
        if cap == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=cap);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

/// Read an entity and let it maintain itself.
///
/// When `kick` reports a change the entity is written back. A conflicting
/// write restarts the read-kick-write sequence, up to the policy's attempt
/// limit; then the conflict is returned.
pub async fn fetch_entity<E: Entity>(
    store: &dyn EntityStore<E>,
    policy: &RetryPolicy,
    id: &str,
) -> Result<E, OakError> {
    let attempts = policy.attempts();
    let mut retry = 0;

    loop {
        let mut entity = store
            .read(id)
            .await
            .map_err(|e| OakError::from_store(id, e))?;

        if !entity.kick() {
            return Ok(entity);
        }

        match store.update(id, &mut entity).await {
            Ok(()) => {
                debug!("Persisted maintenance of entity {} at v{}", id, entity.version());
                return Ok(entity);
            }
            Err(StoreError::VersionConflict { .. }) if retry + 1 < attempts => {
                debug!("Conflict persisting maintenance of entity {}, retry {}", id, retry + 1);
                policy.backoff(retry).await;
                retry += 1;
            }
            Err(StoreError::VersionConflict { .. }) => {
                return Err(OakError::VersionConflict {
                    id: id.to_string(),
                    attempts,
                })
            }
            Err(e) => return Err(OakError::from_store(id, e)),
        }
    }
}

/// Apply `apply` to `entity` and commit it with a version-gated write.
///
/// On a conflict the authoritative entity is fetched again and `apply` runs
/// on the fresh copy, so a losing writer never persists stale state. Errors
/// returned by `apply` abort immediately.
pub async fn commit_entity<E, T, F>(
    store: &dyn EntityStore<E>,
    policy: &RetryPolicy,
    id: &str,
    mut entity: E,
    mut apply: F,
) -> Result<(E, T), OakError>
where
    E: Entity,
    F: FnMut(&mut E) -> Result<T, OakError>,
{
    let attempts = policy.attempts();
    let mut retry = 0;

    loop {
        let output = apply(&mut entity)?;

        match store.update(id, &mut entity).await {
            Ok(()) => return Ok((entity, output)),
            Err(StoreError::VersionConflict { found, .. }) if retry + 1 < attempts => {
                debug!(
                    "Entity {} moved to v{} under us, retry {}",
                    id,
                    found,
                    retry + 1
                );
                policy.backoff(retry).await;
                retry += 1;
                entity = fetch_entity(store, policy, id).await?;
            }
            Err(StoreError::VersionConflict { .. }) => {
                return Err(OakError::VersionConflict {
                    id: id.to_string(),
                    attempts,
                })
            }
            Err(e) => return Err(OakError::from_store(id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityError, Tally, TallyAction, TallyConfig};
    use crate::store::MemoryEntityStore;
    use parking_lot::Mutex;

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    /// Wraps a memory store and lets another writer sneak in before the next
    /// `conflicts` updates land.
    struct ContendedStore {
        inner: MemoryEntityStore<Tally>,
        conflicts: Mutex<u32>,
        updates: Mutex<u32>,
    }

    impl ContendedStore {
        fn new(conflicts: u32) -> Self {
            Self {
                inner: MemoryEntityStore::new(|| Tally::new(&TallyConfig::default())),
                conflicts: Mutex::new(conflicts),
                updates: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EntityStore<Tally> for ContendedStore {
        async fn create(&self) -> Result<(String, Tally), StoreError> {
            self.inner.create().await
        }

        async fn read(&self, id: &str) -> Result<Tally, StoreError> {
            self.inner.read(id).await
        }

        async fn update(&self, id: &str, entity: &mut Tally) -> Result<(), StoreError> {
            let interfere = {
                let mut conflicts = self.conflicts.lock();
                if *conflicts > 0 {
                    *conflicts -= 1;
                    true
                } else {
                    false
                }
            };

            if interfere {
                let mut rival = self.inner.read(id).await?;
                let creator = rival.created_by().to_string();
                rival
                    .act(&creator, &TallyAction::Add { amount: 100 })
                    .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
                self.inner.update(id, &mut rival).await?;
            }

            *self.updates.lock() += 1;
            self.inner.update(id, entity).await
        }
    }

    #[test]
    fn test_backoff_cap_doubles_then_clamps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(30),
        };
        assert_eq!(policy.backoff_cap(0), Duration::from_millis(5));
        assert_eq!(policy.backoff_cap(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_cap(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_cap(3), Duration::from_millis(30));
        assert_eq!(policy.backoff_cap(40), Duration::from_millis(30));
        assert_eq!(quick_policy(0).attempts(), 1);
    }

    #[tokio::test]
    async fn test_fetch_persists_kick() {
        let store = MemoryEntityStore::new(|| {
            Tally::new(&TallyConfig {
                max_users: 4,
                idle_timeout_secs: 60,
            })
        });
        let (id, mut tally) = store.create().await.unwrap();
        let user = tally.register_new_user().unwrap();
        tally.backdate(&user, 600);
        store.update(&id, &mut tally).await.unwrap();

        let fetched = fetch_entity(&store, &quick_policy(3), &id).await.unwrap();
        assert!(!fetched.is_member(&user));
        assert_eq!(fetched.version(), 2);
        assert_eq!(store.read(&id).await.unwrap(), fetched);
    }

    #[tokio::test]
    async fn test_fetch_without_changes_does_not_write() {
        let store = MemoryEntityStore::new(|| Tally::new(&TallyConfig::default()));
        let (id, _) = store.create().await.unwrap();

        let fetched = fetch_entity(&store, &quick_policy(3), &id).await.unwrap();
        assert_eq!(fetched.version(), 0);
    }

    #[tokio::test]
    async fn test_fetch_missing_entity() {
        let store = MemoryEntityStore::new(|| Tally::new(&TallyConfig::default()));
        let err = fetch_entity(&store, &quick_policy(3), "nope").await.unwrap_err();
        assert!(matches!(err, OakError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_converges_after_conflicts() {
        let store = ContendedStore::new(2);
        let (id, tally) = store.create().await.unwrap();
        let creator = tally.created_by().to_string();

        let (committed, ()) = commit_entity(&store, &quick_policy(5), &id, tally, |t| {
            t.act(&creator, &TallyAction::Add { amount: 1 })
                .map_err(OakError::ActionRejected)
        })
        .await
        .unwrap();

        // Two rival writes landed first, then ours on top of them.
        assert_eq!(committed.count(), 201);
        assert_eq!(committed.version(), 3);
        assert_eq!(store.read(&id).await.unwrap(), committed);
        assert_eq!(*store.updates.lock(), 3);
    }

    #[tokio::test]
    async fn test_commit_gives_up_when_attempts_run_out() {
        let store = ContendedStore::new(u32::MAX);
        let (id, tally) = store.create().await.unwrap();
        let creator = tally.created_by().to_string();

        let err = commit_entity(&store, &quick_policy(3), &id, tally, |t| {
            t.act(&creator, &TallyAction::Add { amount: 1 })
                .map_err(OakError::ActionRejected)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, OakError::VersionConflict { attempts: 3, .. }));
        assert_eq!(*store.updates.lock(), 3);
        // Only the rival writes were committed.
        assert_eq!(store.read(&id).await.unwrap().count(), 300);
    }

    #[tokio::test]
    async fn test_commit_stops_on_rejection() {
        let store = ContendedStore::new(0);
        let (id, tally) = store.create().await.unwrap();
        let creator = tally.created_by().to_string();

        let err = commit_entity(&store, &quick_policy(3), &id, tally, |t| {
            t.act(&creator, &TallyAction::Add { amount: 0 })
                .map_err(OakError::ActionRejected)
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            OakError::ActionRejected(EntityError::Rejected(_))
        ));
        assert_eq!(*store.updates.lock(), 0);
    }
}
