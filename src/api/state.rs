use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use serde_json::{Map, Value};
use std::ops::Deref;
use std::sync::Arc;

use crate::logic::RetryPolicy;
use crate::model::Entity;
use crate::store::{EntityStore, SessionStore};

/// Shapes the body returned to a joining client.
pub type JoinResponse<E> = Arc<dyn Fn(&E) -> Map<String, Value> + Send + Sync>;
/// Shapes the body returned on a version change; receives the caller's user id.
pub type ChangeResponse<E> = Arc<dyn Fn(&str, &E) -> Map<String, Value> + Send + Sync>;

/// Everything the protocol handlers depend on, fixed at construction.
pub struct OakConfig<E: Entity> {
    pub entity_store: Arc<dyn EntityStore<E>>,
    pub session_store: Arc<dyn SessionStore<E>>,
    pub join_response: JoinResponse<E>,
    pub change_response: ChangeResponse<E>,
    pub retry: RetryPolicy,
    pub cookie_key: Key,
}

impl<E: Entity> OakConfig<E> {
    pub fn new(
        entity_store: Arc<dyn EntityStore<E>>,
        session_store: Arc<dyn SessionStore<E>>,
        cookie_key: Key,
    ) -> Self {
        Self {
            entity_store,
            session_store,
            join_response: Arc::new(|_| Map::new()),
            change_response: Arc::new(|_, _| Map::new()),
            retry: RetryPolicy::default(),
            cookie_key,
        }
    }

    pub fn with_join_response(
        mut self,
        shaper: impl Fn(&E) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.join_response = Arc::new(shaper);
        self
    }

    pub fn with_change_response(
        mut self,
        shaper: impl Fn(&str, &E) -> Map<String, Value> + Send + Sync + 'static,
    ) -> Self {
        self.change_response = Arc::new(shaper);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Shared, read-only handler state.
pub struct AppState<E: Entity>(Arc<OakConfig<E>>);

impl<E: Entity> AppState<E> {
    pub fn new(config: OakConfig<E>) -> Self {
        Self(Arc::new(config))
    }
}

impl<E: Entity> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<E: Entity> Deref for AppState<E> {
    type Target = OakConfig<E>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<E: Entity> FromRef<AppState<E>> for Key {
    fn from_ref(state: &AppState<E>) -> Self {
        state.cookie_key.clone()
    }
}
