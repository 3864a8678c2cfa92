use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::model::{Entity, EntityError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    pub max_users: usize,
    pub idle_timeout_secs: i64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            max_users: 8,
            idle_timeout_secs: 300,
        }
    }
}

/// A shared counter that a handful of users bump together.
///
/// The creator is registered on construction. The tally shuts down when the
/// creator leaves, when the creator closes it, or when every user has gone
/// idle and been kicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    version: u64,
    active: bool,
    created_by: String,
    users: BTreeMap<String, DateTime<Utc>>,
    count: i64,
    max_users: usize,
    idle_timeout_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TallyAction {
    Add { amount: i64 },
    Close,
}

impl Tally {
    pub fn new(config: &TallyConfig) -> Self {
        let creator = Uuid::new_v4().to_string();
        let mut users = BTreeMap::new();
        users.insert(creator.clone(), Utc::now());

        Self {
            version: 0,
            active: true,
            created_by: creator,
            users,
            count: 0,
            max_users: config.max_users.max(1),
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// The largest snapshot `config` allows: every seat taken and the widest
    /// count and version.
    pub fn at_capacity(config: &TallyConfig) -> Self {
        let mut tally = Self::new(config);
        while tally.users.len() < tally.max_users {
            tally.users.insert(Uuid::new_v4().to_string(), Utc::now());
        }
        tally.count = i64::MIN;
        tally.version = u64::MAX;
        tally
    }

    fn touch(&mut self, user_id: &str) -> Result<(), EntityError> {
        match self.users.get_mut(user_id) {
            Some(last_seen) => {
                *last_seen = Utc::now();
                Ok(())
            }
            None => Err(EntityError::UnknownUser(user_id.to_string())),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, user_id: &str, secs: i64) {
        if let Some(last_seen) = self.users.get_mut(user_id) {
            *last_seen = *last_seen - Duration::seconds(secs);
        }
    }
}

impl Entity for Tally {
    type Action = TallyAction;

    const KIND: &'static str = "tally";

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn created_by(&self) -> &str {
        &self.created_by
    }

    fn register_new_user(&mut self) -> Result<String, EntityError> {
        if !self.active {
            return Err(EntityError::Inactive);
        }
        if self.users.len() >= self.max_users {
            return Err(EntityError::Full {
                max: self.max_users,
            });
        }

        let user_id = Uuid::new_v4().to_string();
        self.users.insert(user_id.clone(), Utc::now());
        Ok(user_id)
    }

    fn unregister_user(&mut self, user_id: &str) -> Result<(), EntityError> {
        if self.users.remove(user_id).is_none() {
            return Err(EntityError::UnknownUser(user_id.to_string()));
        }
        if user_id == self.created_by || self.users.is_empty() {
            self.active = false;
        }
        Ok(())
    }

    fn kick(&mut self) -> bool {
        if !self.active {
            return false;
        }

        let cutoff = Utc::now() - Duration::seconds(self.idle_timeout_secs);
        let before = self.users.len();
        self.users.retain(|_, last_seen| *last_seen >= cutoff);
        if self.users.len() == before {
            return false;
        }

        if self.users.is_empty() {
            self.active = false;
        }
        true
    }

    fn act(&mut self, user_id: &str, action: &TallyAction) -> Result<(), EntityError> {
        if !self.active {
            return Err(EntityError::Inactive);
        }
        self.touch(user_id)?;

        match action {
            TallyAction::Add { amount: 0 } => {
                Err(EntityError::Rejected("amount must be non-zero".to_string()))
            }
            TallyAction::Add { amount } => {
                self.count = self
                    .count
                    .checked_add(*amount)
                    .ok_or_else(|| EntityError::Rejected("count overflow".to_string()))?;
                Ok(())
            }
            TallyAction::Close if user_id != self.created_by => Err(EntityError::Rejected(
                "only the creator may close the tally".to_string(),
            )),
            TallyAction::Close => {
                self.active = false;
                Ok(())
            }
        }
    }
}

/// Payload returned to a client joining a tally.
pub fn join_response(tally: &Tally) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("count".to_string(), json!(tally.count));
    body.insert("users".to_string(), json!(tally.user_count()));
    body.insert("active".to_string(), json!(tally.active));
    body
}

/// Payload returned when a polling or acting client sees a new version.
pub fn change_response(user_id: &str, tally: &Tally) -> Map<String, Value> {
    let mut body = join_response(tally);
    body.insert(
        "member".to_string(),
        json!(!user_id.is_empty() && tally.is_member(user_id)),
    );
    body.insert(
        "creator".to_string(),
        json!(!user_id.is_empty() && user_id == tally.created_by),
    );
    body
}
