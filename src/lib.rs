pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

use anyhow::bail;
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use std::sync::Arc;
use uuid::Uuid;

// Export API types
pub use api::{create_router, AppState, OakConfig};

pub use error::OakError;
pub use logic::{commit_entity, fetch_entity, RetryPolicy};

// Export all model types
pub use model::*;

// Export store types
pub use store::{
    CookieSessionStore, EntityStore, MemoryEntityStore, PostgresEntityStore, SessionStore,
};

/// Wire the tally entity into a router using the loaded configuration
pub fn tally_router(
    config: &config::AppConfig,
    entity_store: Arc<dyn EntityStore<Tally>>,
) -> anyhow::Result<axum::Router> {
    let session_store = Arc::new(CookieSessionStore::new(&config.session));
    check_session_capacity(config, &session_store)?;

    let oak = OakConfig::new(entity_store, session_store, config.cookie_key()?)
        .with_join_response(model::tally::join_response)
        .with_change_response(model::tally::change_response)
        .with_retry(config.retry_policy());

    Ok(create_router(oak))
}

/// Refuse a tally size whose bound session could not be stored in a cookie.
///
/// Join commits the registration before saving the session, so an oversized
/// snapshot would leave a registered user with no session.
fn check_session_capacity(
    config: &config::AppConfig,
    sessions: &CookieSessionStore,
) -> anyhow::Result<()> {
    let max_users = config.tally.max_users;
    // Each user costs well over a byte even compressed.
    if max_users > config.session.max_cookie_bytes {
        bail!(
            "tally.max_users {} cannot fit in a {} byte session cookie",
            max_users,
            config.session.max_cookie_bytes
        );
    }

    let tally = Tally::at_capacity(&config.tally);
    let creator = tally.created_by().to_string();
    let session = Session::bound(creator, Uuid::new_v4().to_string(), tally);
    if let Err(e) = sessions.save(SignedCookieJar::new(Key::generate()), &session) {
        bail!("tally.max_users {} is too large: {}", max_users, e);
    }
    Ok(())
}
