//! Session lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::identity::Identity;

/// Ephemeral proof of authentication for one identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub authenticated: bool,
    pub identity: Identity,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    pub fn open(identity: &Identity) -> Self {
        Self {
            authenticated: true,
            identity: identity.clone(),
            authenticated_at: Utc::now(),
        }
    }
}

/// Issues, persists and tears down the session record in scoped storage.
///
/// The session lives under its own cache key and is cleared independently
/// of the identity data. No expiry is enforced.
#[derive(Clone, Debug)]
pub struct SessionManager {
    cache: CacheStore,
}

impl SessionManager {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    /// Persists a new session for `identity` and returns it.
    pub async fn open(&self, identity: &Identity) -> Result<Session> {
        let session = Session::open(identity);
        self.cache.put_session(&session).await?;
        Ok(session)
    }

    /// Clears the stored session. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.cache.clear_session().await
    }

    /// Reads back a previously persisted session, if any.
    pub async fn restore(&self) -> Result<Option<Session>> {
        self.cache.session().await
    }
}
