use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::model::Entity;
use crate::store::traits::{EntityStore, StoreError};

type Factory<E> = Box<dyn Fn() -> E + Send + Sync>;

/// In-process entity store. The write lock is the compare-and-swap point.
pub struct MemoryEntityStore<E> {
    entities: RwLock<HashMap<String, E>>,
    factory: Factory<E>,
}

impl<E: Entity> MemoryEntityStore<E> {
    pub fn new(factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Drop every entity that has become inactive, returning how many went
    pub fn purge_inactive(&self) -> usize {
        let mut entities = self.entities.write();
        let before = entities.len();
        entities.retain(|_, entity| entity.is_active());
        before - entities.len()
    }
}

#[async_trait::async_trait]
impl<E: Entity> EntityStore<E> for MemoryEntityStore<E> {
    async fn create(&self) -> Result<(String, E), StoreError> {
        let id = Uuid::new_v4().to_string();
        let entity = (self.factory)();
        self.entities.write().insert(id.clone(), entity.clone());
        Ok((id, entity))
    }

    async fn read(&self, id: &str) -> Result<E, StoreError> {
        self.entities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, entity: &mut E) -> Result<(), StoreError> {
        let mut entities = self.entities.write();
        let current = entities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if current.version() != entity.version() {
            return Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected: entity.version(),
                found: current.version(),
            });
        }

        entity.bump_version();
        *current = entity.clone();
        Ok(())
    }
}
