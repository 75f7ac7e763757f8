//! Session registry: local session handles to remote identifiers.
//!
//! Entries live for the life of the process unless closed explicitly with
//! [`SessionRegistry::remove`]. Each session is keyed independently, so
//! concurrent runs never contend on the same entry.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::WorkflowError;
use crate::utils::{generate_session_id, Timestamp};

/// A locally issued session handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_session_id())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Everything known about one session.
///
/// `job_id` is bound when the session is created and never changes. The
/// application key and publication id are filled in once, as the
/// corresponding stages succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The session handle.
    pub session_id: SessionId,
    /// The remote job id.
    pub job_id: String,
    /// The generated application's key.
    pub application_key: Option<String>,
    /// The publication id.
    pub publication_id: Option<String>,
    /// When the session was created.
    pub created_at: Timestamp,
}

/// Concurrent map from session id to [`SessionRecord`].
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `session_id` to `job_id`.
    ///
    /// An existing binding is kept; sessions are never re-pointed.
    pub fn put(&self, session_id: SessionId, job_id: impl Into<String>) {
        let job_id = job_id.into();
        match self.sessions.entry(session_id) {
            Entry::Occupied(existing) => {
                warn!(
                    session_id = %existing.key(),
                    job_id = %existing.get().job_id,
                    "Ignoring attempt to rebind an existing session"
                );
            }
            Entry::Vacant(slot) => {
                debug!(session_id = %slot.key(), job_id = %job_id, "Session registered");
                let record = SessionRecord {
                    session_id: slot.key().clone(),
                    job_id,
                    application_key: None,
                    publication_id: None,
                    created_at: Utc::now(),
                };
                slot.insert(record);
            }
        }
    }

    /// Creates a new session for `job_id` and returns its id.
    pub fn register(&self, job_id: impl Into<String>) -> SessionId {
        let session_id = SessionId::generate();
        self.put(session_id.clone(), job_id);
        session_id
    }

    /// Returns the remote job id for `session_id`.
    pub fn get(&self, session_id: &SessionId) -> Result<String, WorkflowError> {
        self.lookup(session_id).map(|record| record.job_id)
    }

    /// Returns the full record for `session_id`.
    pub fn lookup(&self, session_id: &SessionId) -> Result<SessionRecord, WorkflowError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))
    }

    /// Records the application key produced by generation.
    ///
    /// Returns the key the session holds afterwards, which is the first
    /// one ever recorded.
    pub fn record_application_key(
        &self,
        session_id: &SessionId,
        application_key: impl Into<String>,
    ) -> Result<String, WorkflowError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
        Ok(set_once(
            &mut entry.application_key,
            application_key.into(),
            "application_key",
            session_id,
        ))
    }

    /// Records the publication id, returning the one the session keeps.
    pub fn record_publication(
        &self,
        session_id: &SessionId,
        publication_id: impl Into<String>,
    ) -> Result<String, WorkflowError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| WorkflowError::UnknownSession(session_id.to_string()))?;
        Ok(set_once(
            &mut entry.publication_id,
            publication_id.into(),
            "publication_id",
            session_id,
        ))
    }

    /// Closes a session, returning its last record.
    pub fn remove(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.sessions.remove(session_id).map(|(_, record)| record)
    }

    /// Returns true if `session_id` is registered.
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Returns the number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no sessions are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn set_once(
    slot: &mut Option<String>,
    value: String,
    field: &str,
    session_id: &SessionId,
) -> String {
    match slot {
        Some(existing) => {
            if *existing != value {
                warn!(
                    session_id = %session_id,
                    field,
                    existing = %existing,
                    rejected = %value,
                    "Keeping first recorded identifier"
                );
            }
            existing.clone()
        }
        None => slot.insert(value).clone(),
    }
}
