use crate::model::Entity;

/// The per-client binding carried in the session cookie.
///
/// Fields are private so the triple can only be set or cleared as a whole:
/// a session is either unbound (all empty) or bound (all present).
#[derive(Debug, Clone, PartialEq)]
pub struct Session<E> {
    user_id: String,
    entity_id: String,
    entity: Option<E>,
}

impl<E: Entity> Session<E> {
    pub fn unbound() -> Self {
        Self {
            user_id: String::new(),
            entity_id: String::new(),
            entity: None,
        }
    }

    pub fn bound(user_id: impl Into<String>, entity_id: impl Into<String>, entity: E) -> Self {
        Self::from_parts(user_id.into(), entity_id.into(), Some(entity))
    }

    /// Build a session from individually decoded fields. Anything short of a
    /// complete triple collapses to unbound.
    pub fn from_parts(user_id: String, entity_id: String, entity: Option<E>) -> Self {
        match entity {
            Some(entity) if !user_id.is_empty() && !entity_id.is_empty() => Self {
                user_id,
                entity_id,
                entity: Some(entity),
            },
            _ => Self::unbound(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn entity(&self) -> Option<&E> {
        self.entity.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.entity.is_some()
    }

    /// True while the cached snapshot is present and still active.
    pub fn is_engaged(&self) -> bool {
        self.entity.as_ref().is_some_and(|entity| entity.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tally, TallyConfig};

    #[test]
    fn test_partial_fields_collapse_to_unbound() {
        let tally = Tally::new(&TallyConfig::default());

        let missing_user: Session<Tally> =
            Session::from_parts(String::new(), "e1".to_string(), Some(tally.clone()));
        assert!(!missing_user.is_bound());
        assert_eq!(missing_user.entity_id(), "");

        let missing_entity: Session<Tally> =
            Session::from_parts("u1".to_string(), "e1".to_string(), None);
        assert!(!missing_entity.is_bound());
        assert_eq!(missing_entity.user_id(), "");
    }

    #[test]
    fn test_engaged_follows_snapshot_activity() {
        let mut tally = Tally::new(&TallyConfig::default());
        let creator = tally.created_by().to_string();

        let session = Session::bound(creator.clone(), "e1", tally.clone());
        assert!(session.is_engaged());

        tally.unregister_user(&creator).unwrap();
        let session = Session::bound(creator, "e1", tally);
        assert!(session.is_bound());
        assert!(!session.is_engaged());
    }
}
