use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::OakError;

pub const ID: &str = "id";
pub const VERSION: &str = "v";

/// `{"id": string}` body used by join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub id: String,
}

/// `{"id": string, "v": integer}` body used by poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRef {
    pub id: String,
    pub version: u64,
}

impl EntityRef {
    pub fn parse(body: &[u8]) -> Result<Self, OakError> {
        let object = read_object(body)?;
        Ok(Self {
            id: required_id(&object)?,
        })
    }
}

impl VersionedRef {
    pub fn parse(body: &[u8]) -> Result<Self, OakError> {
        let object = read_object(body)?;
        let id = required_id(&object)?;
        let version = match object.get(VERSION) {
            None => {
                return Err(OakError::MalformedRequest(format!(
                    "{VERSION} value must be included in request"
                )))
            }
            Some(value) => value.as_u64().ok_or_else(|| {
                OakError::MalformedRequest(format!(
                    "{VERSION} must be a non-negative integer value"
                ))
            })?,
        };
        Ok(Self { id, version })
    }
}

/// Decode an entity action from the raw request body
pub fn parse_action<A: DeserializeOwned>(body: &[u8]) -> Result<A, OakError> {
    serde_json::from_slice(body)
        .map_err(|e| OakError::MalformedRequest(format!("invalid action: {e}")))
}

fn read_object(body: &[u8]) -> Result<Map<String, Value>, OakError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Ok(object),
        _ => Err(OakError::MalformedRequest(
            "request body must be a JSON object".to_string(),
        )),
    }
}

fn required_id(object: &Map<String, Value>) -> Result<String, OakError> {
    match object.get(ID) {
        None => Err(OakError::MalformedRequest(format!(
            "{ID} value must be included in request"
        ))),
        Some(Value::String(id)) => Ok(id.clone()),
        Some(_) => Err(OakError::MalformedRequest(format!("{ID} must be a string value"))),
    }
}
