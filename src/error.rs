use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use log::{debug, error};
use serde::Serialize;
use thiserror::Error;

use crate::model::EntityError;
use crate::store::{SessionError, StoreError};

#[derive(Debug, Error)]
pub enum OakError {
    #[error("{0}")]
    MalformedRequest(String),
    #[error("no entity in session")]
    NoBoundEntity,
    #[error("entity {0} not found")]
    NotFound(String),
    #[error("entity {id} is busy, gave up after {attempts} conflicting writes")]
    VersionConflict { id: String, attempts: u32 },
    #[error("could not register user: {0}")]
    Registration(#[source] EntityError),
    #[error("action rejected: {0}")]
    ActionRejected(#[source] EntityError),
    #[error("storage failure: {0}")]
    Store(#[source] StoreError),
    #[error("session failure: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl OakError {
    /// Map a store failure on `id` onto the request taxonomy
    pub fn from_store(id: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => OakError::NotFound(id.to_string()),
            StoreError::VersionConflict { .. } => OakError::VersionConflict {
                id: id.to_string(),
                attempts: 1,
            },
            other => OakError::Store(other),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OakError::MalformedRequest(_) => "malformed_request",
            OakError::NoBoundEntity => "no_bound_entity",
            OakError::NotFound(_) => "not_found",
            OakError::VersionConflict { .. } => "version_conflict",
            OakError::Registration(_) => "registration_failed",
            OakError::ActionRejected(_) => "action_rejected",
            OakError::Store(_) => "store_failure",
            OakError::Session(_) => "session_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OakError::MalformedRequest(_) | OakError::NoBoundEntity => StatusCode::BAD_REQUEST,
            OakError::NotFound(_) => StatusCode::NOT_FOUND,
            OakError::VersionConflict { .. } => StatusCode::CONFLICT,
            OakError::Registration(_) | OakError::ActionRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            OakError::Store(_) | OakError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OakError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }

        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}
