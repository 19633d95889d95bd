//! Scoped local cache.
//!
//! A single JSON file holding the identity array and the current session
//! under fixed keys. It is the store of record in local mode and a
//! best-effort mirror in remote mode; the session always lives here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::Identity;
use crate::session::Session;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    identities: Vec<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
}

/// Handle on the cache file. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn identities(&self) -> Result<Vec<Identity>> {
        Ok(self.load().await?.identities)
    }

    pub async fn put_identities(&self, identities: &[Identity]) -> Result<()> {
        let mut file = self.load().await?;
        file.identities = identities.to_vec();
        self.save(&file).await
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        Ok(self.load().await?.session)
    }

    pub async fn put_session(&self, session: &Session) -> Result<()> {
        let mut file = self.load().await?;
        file.session = Some(session.clone());
        self.save(&file).await
    }

    /// Clears the session key without touching the identity data.
    pub async fn clear_session(&self) -> Result<()> {
        let mut file = self.load().await?;
        file.session = None;
        self.save(&file).await
    }

    /// A missing file reads as an empty cache; a malformed one is an error.
    async fn load(&self) -> Result<CacheFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CacheFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, file: &CacheFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}
