//! Dual-mode identity repository.
//!
//! One store contract, two implementations: the durable PostgreSQL backend
//! and the scoped local cache. Which one is of record is decided once per
//! process by [`IdentityRepository::probe`] and never re-evaluated.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::cache::CacheStore;
use crate::config;
use crate::error::Result;
use crate::identity::{Identity, IdentityStatus, Role};

const DEFAULT_CREDENTIALS: &str = "postgres";
const DEFAULT_DATABASE_NAME: &str = "postern";
const DEFAULT_POOL_SIZE: u32 = 10;

/// Which store is authoritative for the current process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepositoryMode {
    Remote,
    Local,
}

impl std::fmt::Display for RepositoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RepositoryMode::Remote => write!(f, "remote"),
            RepositoryMode::Local => write!(f, "local"),
        }
    }
}

/// Store contract shared by the durable backend and the local cache.
///
/// `upsert` has insert-or-update semantics keyed by the lowercase email;
/// `remove` is idempotent.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Identity>>;
    async fn upsert(&self, identity: &Identity) -> Result<()>;
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Durable backend store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to PostgreSQL and apply pending migrations.
    pub async fn connect(cfg: &config::Postgres) -> std::result::Result<Self, sqlx::Error> {
        let username = cfg.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = cfg.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let database = cfg.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);
        let addr = format!(
            "postgres://{username}:{password}@{address}/{database}",
            address = cfg.address
        );

        let pool = PgPoolOptions::new()
            .max_connections(cfg.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        sqlx::migrate!().run(&pool).await?;
        tracing::info!(address = %cfg.address, %database, "postgres connected");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn load_all(&self) -> Result<Vec<Identity>> {
        let rows = sqlx::query(
            r#"SELECT id, email, display_name, role, status, totp_secret, is_primary_admin, last_login_at
                FROM users ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(identity_from_row).collect()
    }

    async fn upsert(&self, identity: &Identity) -> Result<()> {
        // `is_primary_admin` is written on insert only: the flag is never
        // cleared, and never granted after creation.
        sqlx::query(
            r#"INSERT INTO users (id, email, display_name, role, status, totp_secret, is_primary_admin, last_login_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (email) DO UPDATE SET
                    display_name = EXCLUDED.display_name,
                    role = EXCLUDED.role,
                    status = EXCLUDED.status,
                    totp_secret = EXCLUDED.totp_secret,
                    last_login_at = EXCLUDED.last_login_at"#,
        )
        .bind(&identity.id)
        .bind(identity.email.to_lowercase())
        .bind(&identity.display_name)
        .bind(identity.role.to_string())
        .bind(identity.status.to_string())
        .bind(&identity.totp_secret)
        .bind(identity.is_primary_admin)
        .bind(identity.last_login_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn identity_from_row(row: &PgRow) -> Result<Identity> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;

    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role: role.parse::<Role>().map_err(decode_error("role"))?,
        status: status
            .parse::<IdentityStatus>()
            .map_err(decode_error("status"))?,
        totp_secret: row.try_get("totp_secret")?,
        is_primary_admin: row.try_get("is_primary_admin")?,
        last_login_at: row.try_get("last_login_at")?,
    })
}

fn decode_error(
    column: &'static str,
) -> impl Fn(crate::identity::ParseValueError) -> crate::error::ServerError {
    move |err| {
        sqlx::Error::ColumnDecode {
            index: column.to_owned(),
            source: Box::new(err),
        }
        .into()
    }
}

#[async_trait]
impl IdentityStore for CacheStore {
    async fn load_all(&self) -> Result<Vec<Identity>> {
        self.identities().await
    }

    async fn upsert(&self, identity: &Identity) -> Result<()> {
        let mut identities = self.identities().await?;

        match identities
            .iter_mut()
            .find(|existing| existing.email.eq_ignore_ascii_case(&identity.email))
        {
            Some(existing) => *existing = identity.clone(),
            None => identities.push(identity.clone()),
        }

        self.put_identities(&identities).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut identities = self.identities().await?;
        identities.retain(|identity| identity.id != id);
        self.put_identities(&identities).await
    }
}

/// Routes reads and writes to the store of record, mirroring into the local
/// cache in remote mode for offline continuity.
pub struct IdentityRepository {
    mode: RepositoryMode,
    record: Box<dyn IdentityStore>,
    mirror: Option<CacheStore>,
}

impl IdentityRepository {
    /// Probes the durable backend once. Any failure (unreachable, not yet
    /// initialized, missing configuration) resolves to local mode.
    pub async fn probe(postgres: Option<&config::Postgres>, cache: CacheStore) -> Self {
        let Some(cfg) = postgres else {
            tracing::info!("no postgres configured, identity store of record: local cache");
            return Self::local(cache);
        };

        match PgStore::connect(cfg).await {
            Ok(store) => {
                tracing::info!("identity store of record: postgres");
                Self {
                    mode: RepositoryMode::Remote,
                    record: Box::new(store),
                    mirror: Some(cache),
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "postgres unreachable, falling back to local cache");
                Self::local(cache)
            },
        }
    }

    pub fn local(cache: CacheStore) -> Self {
        Self {
            mode: RepositoryMode::Local,
            record: Box::new(cache),
            mirror: None,
        }
    }

    pub fn mode(&self) -> RepositoryMode {
        self.mode
    }

    /// Reads a snapshot from the store of record.
    pub async fn load_all(&self) -> Result<Vec<Identity>> {
        self.record.load_all().await
    }

    /// Writes to the store of record, then mirrors. A mirror failure is
    /// logged and swallowed; the mirror is not a second source of truth.
    pub async fn upsert(&self, identity: &Identity) -> Result<()> {
        self.record.upsert(identity).await?;

        if let Some(mirror) = &self.mirror
            && let Err(err) = mirror.upsert(identity).await
        {
            tracing::warn!(error = %err, email = %identity.email, "cache mirror write failed");
        }

        Ok(())
    }

    /// Removes an identity by id. Idempotent.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.record.remove(id).await?;

        if let Some(mirror) = &self.mirror
            && let Err(err) = mirror.remove(id).await
        {
            tracing::warn!(error = %err, %id, "cache mirror remove failed");
        }

        Ok(())
    }
}
