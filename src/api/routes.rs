use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers;
use crate::api::state::{AppState, OakConfig};
use crate::model::Entity;

pub fn create_router<E: Entity>(config: OakConfig<E>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Entity protocol
        .route("/create", post(handlers::create::<E>))
        .route("/join", post(handlers::join::<E>))
        .route("/poll", post(handlers::poll::<E>))
        .route("/act", post(handlers::act::<E>))
        .route("/leave", post(handlers::leave::<E>))
        .with_state(AppState::new(config))
}
