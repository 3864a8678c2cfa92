use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::config::SessionConfig;
use crate::model::{Entity, Session};
use crate::store::traits::{SessionError, SessionStore};

/// Current layout of the session envelope. Cookies carrying any other
/// format are treated as unbound.
pub const SESSION_FORMAT: u32 = 1;

/// Bytes added by the signature when the jar signs a value.
const SIGNATURE_LEN: usize = 44;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    format: u32,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    entity_id: String,
    #[serde(default)]
    entity: Option<TaggedSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaggedSnapshot {
    kind: String,
    payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid gzip payload: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported session format {0}")]
    Format(u32),
    #[error("snapshot kind {found} does not match {expected}")]
    Kind { found: String, expected: &'static str },
}

/// Keeps the whole session in one signed cookie.
///
/// The envelope is JSON, gzip-compressed and base64url-encoded. The entity
/// snapshot is tagged with `Entity::KIND` so switching the served entity type
/// invalidates old cookies instead of misreading them.
#[derive(Debug, Clone)]
pub struct CookieSessionStore {
    cookie_name: String,
    path: String,
    secure: bool,
    max_cookie_bytes: usize,
}

impl CookieSessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            path: config.path.clone(),
            secure: config.secure,
            max_cookie_bytes: config.max_cookie_bytes,
        }
    }

    fn encode<E: Entity>(&self, session: &Session<E>) -> Result<String, SessionError> {
        let entity = session
            .entity()
            .map(|entity| {
                Ok::<_, SessionError>(TaggedSnapshot {
                    kind: E::KIND.to_string(),
                    payload: serde_json::to_value(entity)?,
                })
            })
            .transpose()?;

        let envelope = SessionEnvelope {
            format: SESSION_FORMAT,
            user_id: session.user_id().to_string(),
            entity_id: session.entity_id().to_string(),
            entity,
        };

        let json = serde_json::to_vec(&envelope)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(URL_SAFE_NO_PAD.encode(encoder.finish()?))
    }

    fn decode<E: Entity>(&self, value: &str) -> Result<Session<E>, DecodeError> {
        let compressed = URL_SAFE_NO_PAD.decode(value)?;
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice()).read_to_end(&mut json)?;
        let envelope: SessionEnvelope = serde_json::from_slice(&json)?;

        if envelope.format != SESSION_FORMAT {
            return Err(DecodeError::Format(envelope.format));
        }

        let entity = match envelope.entity {
            Some(snapshot) if snapshot.kind == E::KIND => {
                Some(serde_json::from_value(snapshot.payload)?)
            }
            Some(snapshot) => {
                return Err(DecodeError::Kind {
                    found: snapshot.kind,
                    expected: E::KIND,
                })
            }
            None => None,
        };

        Ok(Session::from_parts(
            envelope.user_id,
            envelope.entity_id,
            entity,
        ))
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), value))
            .path(self.path.clone())
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}

impl<E: Entity> SessionStore<E> for CookieSessionStore {
    fn get(&self, jar: &SignedCookieJar) -> Result<Session<E>, SessionError> {
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return Ok(Session::unbound());
        };

        match self.decode(cookie.value()) {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!("Discarding unreadable session cookie: {}", e);
                Ok(Session::unbound())
            }
        }
    }

    fn save(
        &self,
        jar: SignedCookieJar,
        session: &Session<E>,
    ) -> Result<SignedCookieJar, SessionError> {
        if !session.is_bound() {
            return Ok(jar.remove(self.cookie(String::new())));
        }

        let value = self.encode(session)?;
        let size = self.cookie_name.len() + value.len() + SIGNATURE_LEN;
        if size > self.max_cookie_bytes {
            return Err(SessionError::TooLarge {
                size,
                limit: self.max_cookie_bytes,
            });
        }

        Ok(jar.add(self.cookie(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tally, TallyConfig};
    use axum::http::header::{COOKIE, SET_COOKIE};
    use axum::http::{HeaderMap, HeaderValue};
    use axum::response::IntoResponse;
    use axum_extra::extract::cookie::Key;

    fn store() -> CookieSessionStore {
        CookieSessionStore::new(&SessionConfig::default())
    }

    fn bound_session() -> Session<Tally> {
        let tally = Tally::new(&TallyConfig::default());
        Session::bound(tally.created_by().to_string(), "e1", tally)
    }

    #[test]
    fn test_saved_session_reads_back() {
        let store = store();
        let jar = SignedCookieJar::new(Key::generate());
        let session = bound_session();

        let jar = store.save(jar, &session).unwrap();
        let loaded: Session<Tally> = store.get(&jar).unwrap();
        assert_eq!(loaded, session);
        assert!(loaded.is_engaged());
    }

    #[test]
    fn test_unbound_save_removes_cookie() {
        let store = store();
        let jar = SignedCookieJar::new(Key::generate());
        let jar = store.save(jar, &bound_session()).unwrap();

        let jar = store.save(jar, &Session::<Tally>::unbound()).unwrap();
        let loaded: Session<Tally> = store.get(&jar).unwrap();
        assert!(!loaded.is_bound());
    }

    #[test]
    fn test_missing_fields_decode_as_unbound() {
        let store = store();
        let envelope = serde_json::json!({ "format": SESSION_FORMAT, "entity_id": "e1" });
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(envelope.to_string().as_bytes()).unwrap();
        let value = URL_SAFE_NO_PAD.encode(encoder.finish().unwrap());

        let session: Session<Tally> = store.decode(&value).unwrap();
        assert!(!session.is_bound());
        assert_eq!(session.entity_id(), "");
    }

    #[test]
    fn test_foreign_kind_and_format_are_rejected() {
        let store = store();
        let session = bound_session();

        let mut envelope: SessionEnvelope = {
            let value = store.encode(&session).unwrap();
            let compressed = URL_SAFE_NO_PAD.decode(value).unwrap();
            let mut json = Vec::new();
            GzDecoder::new(compressed.as_slice()).read_to_end(&mut json).unwrap();
            serde_json::from_slice(&json).unwrap()
        };

        let reencode = |envelope: &SessionEnvelope| {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&serde_json::to_vec(envelope).unwrap())
                .unwrap();
            URL_SAFE_NO_PAD.encode(encoder.finish().unwrap())
        };

        if let Some(snapshot) = envelope.entity.as_mut() {
            snapshot.kind = "chess".to_string();
        }
        assert!(matches!(
            store.decode::<Tally>(&reencode(&envelope)),
            Err(DecodeError::Kind { .. })
        ));

        envelope.format = SESSION_FORMAT + 1;
        assert!(matches!(
            store.decode::<Tally>(&reencode(&envelope)),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn test_cookie_signed_with_other_key_is_ignored() {
        let store = store();
        let key = Key::generate();
        let jar = store
            .save(SignedCookieJar::new(key.clone()), &bound_session())
            .unwrap();

        let response = jar.into_response();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        let pair = set_cookie.split(';').next().unwrap().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&pair).unwrap());

        let same_key = SignedCookieJar::from_headers(&headers, key);
        let loaded: Session<Tally> = store.get(&same_key).unwrap();
        assert!(loaded.is_bound());

        let other_key = SignedCookieJar::from_headers(&headers, Key::generate());
        let loaded: Session<Tally> = store.get(&other_key).unwrap();
        assert!(!loaded.is_bound());
    }

    #[test]
    fn test_oversized_session_is_refused() {
        let store = CookieSessionStore::new(&SessionConfig {
            max_cookie_bytes: 64,
            ..SessionConfig::default()
        });
        let jar = SignedCookieJar::new(Key::generate());

        let err = store.save(jar, &bound_session()).unwrap_err();
        assert!(matches!(err, SessionError::TooLarge { limit: 64, .. }));
    }
}
