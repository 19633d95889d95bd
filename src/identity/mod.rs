//! Identity records and their enrollment-state classification.

mod classifier;
mod repository;

pub use classifier::*;
pub use repository::*;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

const ID_LENGTH: usize = 8;

/// Identity as saved on the store of record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Opaque identifier, assigned at creation and never changed.
    pub id: String,
    /// Lowercase unique key across all identities.
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub status: IdentityStatus,
    /// Presence of this field is the sole signal of "MFA enrolled".
    pub totp_secret: Option<String>,
    /// True for the first identity ever enrolled, never cleared.
    pub is_primary_admin: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Auditor,
    Viewer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityStatus {
    Active,
    Inactive,
}

/// A value read from a store did not map to a known enum variant.
#[derive(Debug, thiserror::Error)]
#[error("unrecognized value: {0}")]
pub struct ParseValueError(String);

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "Admin"),
            Role::Auditor => write!(f, "Auditor"),
            Role::Viewer => write!(f, "Viewer"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ParseValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Admin" => Ok(Role::Admin),
            "Auditor" => Ok(Role::Auditor),
            "Viewer" => Ok(Role::Viewer),
            other => Err(ParseValueError(other.to_owned())),
        }
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IdentityStatus::Active => write!(f, "Active"),
            IdentityStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

impl std::str::FromStr for IdentityStatus {
    type Err = ParseValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Active" => Ok(IdentityStatus::Active),
            "Inactive" => Ok(IdentityStatus::Inactive),
            other => Err(ParseValueError(other.to_owned())),
        }
    }
}

impl Identity {
    /// First identity of an empty system: sole primary administrator,
    /// enrolled and logged in at once.
    pub fn bootstrap(email: &str, secret: &str, now: DateTime<Utc>) -> Self {
        let email = email.to_lowercase();
        let display_name = email.split('@').next().unwrap_or(&email).to_owned();

        Self {
            id: generate_id(),
            email,
            display_name,
            role: Role::Admin,
            status: IdentityStatus::Active,
            totp_secret: Some(secret.to_owned()),
            is_primary_admin: true,
            last_login_at: Some(now),
        }
    }

    /// Administrator-provisioned identity without a secret; its user must
    /// complete first-time enrollment before authenticating.
    pub fn provisioned(email: &str, display_name: &str, role: Role) -> Self {
        Self {
            id: generate_id(),
            email: email.to_lowercase(),
            display_name: display_name.to_owned(),
            role,
            status: IdentityStatus::Active,
            totp_secret: None,
            is_primary_admin: false,
            last_login_at: None,
        }
    }
}

fn generate_id() -> String {
    let mut bytes = [0u8; ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
