use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::api::request::{parse_action, EntityRef, VersionedRef, ID, VERSION};
use crate::api::session::SessionBinder;
use crate::api::state::AppState;
use crate::error::OakError;
use crate::logic::{commit_entity, fetch_entity};
use crate::model::{Entity, EntityError};

const NO_CHANGE: &str = "noChange";
const JOIN_ERROR: &str = "joinError";
const LEFT: &str = "left";

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

fn with_version<E: Entity>(mut body: Map<String, Value>, entity: &E) -> Map<String, Value> {
    body.insert(VERSION.to_string(), json!(entity.version()));
    body
}

/// Allocate a new entity for a client that isn't engaged with one yet.
///
/// Repeated calls from an engaged session return the same id.
pub async fn create<E: Entity>(
    State(state): State<AppState<E>>,
    jar: SignedCookieJar,
) -> Result<Response, OakError> {
    let mut session = SessionBinder::load(state.session_store.clone(), jar)?;

    if !session.is_engaged() {
        let (id, entity) = state
            .entity_store
            .create()
            .await
            .map_err(OakError::Store)?;
        let creator = entity.created_by().to_string();
        session.bind(creator, id.clone(), entity)?;
        info!("Created entity {}", id);
    }

    let body = json!({ ID: session.entity_id() });
    Ok((session.into_jar(), Json(body)).into_response())
}

/// Register the caller as a new user of an existing entity.
///
/// Registration only happens for unengaged sessions and active entities. If it
/// fails, the entity is still described in the response, with the reason
/// under `joinError`, and the session stays as it was.
///
/// Registration is a committed write, so `v` reports the version after it.
pub async fn join<E: Entity>(
    State(state): State<AppState<E>>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<Response, OakError> {
    let EntityRef { id } = EntityRef::parse(&body)?;

    let store = state.entity_store.as_ref();
    let mut entity = fetch_entity(store, &state.retry, &id).await?;
    let mut session = SessionBinder::load(state.session_store.clone(), jar)?;
    let mut join_error = None;

    if !session.is_engaged() && entity.is_active() {
        let registered = commit_entity(store, &state.retry, &id, entity.clone(), |e| {
            if !e.is_active() {
                return Err(OakError::Registration(EntityError::Inactive));
            }
            e.register_new_user().map_err(OakError::Registration)
        })
        .await;

        match registered {
            Ok((updated, user_id)) => {
                session.bind(user_id.clone(), id.clone(), updated.clone())?;
                entity = updated;
                info!("User {} joined entity {}", user_id, id);
            }
            Err(e) => {
                warn!("Join of entity {} failed: {}", id, e);
                join_error = Some(e.to_string());
            }
        }
    }

    let mut body = with_version((state.join_response)(&entity), &entity);
    if let Some(message) = join_error {
        body.insert(JOIN_ERROR.to_string(), json!(message));
    }
    Ok((session.into_jar(), Json(body)).into_response())
}

/// Report whether an entity moved past the version the client last saw.
///
/// A matching version short-circuits with `noChange` and touches nothing. On
/// a change, a session bound to this entity is refreshed, or cleared if the
/// entity has become inactive.
pub async fn poll<E: Entity>(
    State(state): State<AppState<E>>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<Response, OakError> {
    let VersionedRef { id, version } = VersionedRef::parse(&body)?;

    let entity = fetch_entity(state.entity_store.as_ref(), &state.retry, &id).await?;
    if version == entity.version() {
        return Ok(Json(json!({ NO_CHANGE: true })).into_response());
    }

    let mut session = SessionBinder::load(state.session_store.clone(), jar)?;
    let mut user_id = String::new();
    if session.entity_id() == id {
        user_id = session.user_id().to_string();
        if entity.is_active() {
            session.bind(user_id.clone(), id.clone(), entity.clone())?;
        } else {
            session.unbind()?;
        }
    }

    let body = with_version((state.change_response)(&user_id, &entity), &entity);
    Ok((session.into_jar(), Json(body)).into_response())
}

/// Apply an action on behalf of the session's user.
///
/// The action is first tried against the session's cached snapshot so
/// obviously invalid actions never reach the store, then applied to the
/// authoritative entity and committed.
pub async fn act<E: Entity>(
    State(state): State<AppState<E>>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<Response, OakError> {
    let action: E::Action = parse_action(&body)?;

    let mut session = SessionBinder::load(state.session_store.clone(), jar)?;
    if !session.is_engaged() {
        return Err(OakError::NoBoundEntity);
    }
    let user_id = session.user_id().to_string();
    let id = session.entity_id().to_string();

    let mut snapshot = session.entity().cloned().ok_or(OakError::NoBoundEntity)?;
    snapshot
        .act(&user_id, &action)
        .map_err(OakError::ActionRejected)?;

    let store = state.entity_store.as_ref();
    let mut entity = fetch_entity(store, &state.retry, &id).await?;

    if entity.is_active() {
        let committed = commit_entity(store, &state.retry, &id, entity, |e| {
            if !e.is_active() {
                return Err(OakError::ActionRejected(EntityError::Inactive));
            }
            e.act(&user_id, &action).map_err(OakError::ActionRejected)
        })
        .await;

        entity = match committed {
            Ok((committed, ())) => committed,
            // Deactivated between our read and the write; the session is released below.
            Err(OakError::ActionRejected(EntityError::Inactive)) => {
                fetch_entity(store, &state.retry, &id).await?
            }
            Err(e) => return Err(e),
        };
    }

    if entity.is_active() {
        session.bind(user_id.clone(), id, entity.clone())?;
    } else {
        info!("Entity {} is no longer active, releasing session", id);
        session.unbind()?;
    }

    let body = with_version((state.change_response)(&user_id, &entity), &entity);
    Ok((session.into_jar(), Json(body)).into_response())
}

/// Drop the session's user from its entity and clear the session.
///
/// The session always ends up unbound; failures to unregister are logged and
/// reported as `left: false`.
pub async fn leave<E: Entity>(
    State(state): State<AppState<E>>,
    jar: SignedCookieJar,
) -> Result<Response, OakError> {
    let mut session = SessionBinder::load(state.session_store.clone(), jar)?;

    if !session.is_engaged() {
        session.unbind()?;
        return Ok((session.into_jar(), Json(json!({ LEFT: false }))).into_response());
    }

    let user_id = session.user_id().to_string();
    let id = session.entity_id().to_string();
    let mut body = Map::new();
    let mut left = false;

    let mut snapshot = session.entity().cloned().ok_or(OakError::NoBoundEntity)?;
    match snapshot.unregister_user(&user_id) {
        Err(e) => warn!("User {} cannot leave entity {}: {}", user_id, id, e),
        Ok(()) => {
            let store = state.entity_store.as_ref();
            let unregistered = match fetch_entity(store, &state.retry, &id).await {
                Ok(entity) => {
                    commit_entity(store, &state.retry, &id, entity, |e| {
                        e.unregister_user(&user_id).map_err(OakError::Registration)
                    })
                    .await
                }
                Err(e) => Err(e),
            };

            match unregistered {
                Ok((entity, ())) => {
                    left = true;
                    body = with_version(body, &entity);
                    info!("User {} left entity {}", user_id, id);
                }
                Err(e) => warn!(
                    "Failed to unregister user {} from entity {}: {}",
                    user_id, id, e
                ),
            }
        }
    }

    session.unbind()?;
    body.insert(LEFT.to_string(), json!(left));
    Ok((session.into_jar(), Json(body)).into_response())
}
