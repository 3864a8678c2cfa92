use axum_extra::extract::cookie::SignedCookieJar;
use std::sync::Arc;

use crate::model::{Entity, Session};
use crate::store::{SessionError, SessionStore};

/// Request-scoped view of the client's session.
///
/// Loaded once from the cookie jar, changed at most once, and handed back as
/// a jar for the response. A failed save leaves the loaded session in place.
pub struct SessionBinder<E: Entity> {
    store: Arc<dyn SessionStore<E>>,
    jar: SignedCookieJar,
    session: Session<E>,
    saved: bool,
}

impl<E: Entity> SessionBinder<E> {
    pub fn load(
        store: Arc<dyn SessionStore<E>>,
        jar: SignedCookieJar,
    ) -> Result<Self, SessionError> {
        let session = store.get(&jar)?;
        Ok(Self {
            store,
            jar,
            session,
            saved: false,
        })
    }

    pub fn bind(
        &mut self,
        user_id: impl Into<String>,
        entity_id: impl Into<String>,
        entity: E,
    ) -> Result<(), SessionError> {
        self.persist(Session::bound(user_id, entity_id, entity))
    }

    pub fn unbind(&mut self) -> Result<(), SessionError> {
        self.persist(Session::unbound())
    }

    fn persist(&mut self, next: Session<E>) -> Result<(), SessionError> {
        if self.saved {
            return Err(SessionError::AlreadySaved);
        }
        self.jar = self.store.save(self.jar.clone(), &next)?;
        self.session = next;
        self.saved = true;
        Ok(())
    }

    pub fn is_engaged(&self) -> bool {
        self.session.is_engaged()
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn entity_id(&self) -> &str {
        self.session.entity_id()
    }

    pub fn entity(&self) -> Option<&E> {
        self.session.entity()
    }

    pub fn into_jar(self) -> SignedCookieJar {
        self.jar
    }
}
