//! HTTP surface of the authentication core.

pub mod login;
pub mod session;
pub mod status;
pub mod users;

use axum::Json;
use axum::extract::{FromRequest, Request};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::ServerError;
use crate::identity::{Identity, IdentityStatus, Role};
use crate::session::Session;

/// Json extractor running `validator` checks before the handler.
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Self(value))
    }
}

pub fn validate_code(code: &str) -> Result<(), ValidationError> {
    if code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("code_digits"))
    }
}

/// Identity as exposed over HTTP. The shared secret never leaves the
/// stores; only its presence is reported.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub status: IdentityStatus,
    pub mfa_enrolled: bool,
    pub is_primary_admin: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            role: identity.role,
            status: identity.status,
            mfa_enrolled: identity.totp_secret.is_some(),
            is_primary_admin: identity.is_primary_admin,
            last_login_at: identity.last_login_at,
        }
    }
}

/// Body of every successful authentication or session read.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticated {
    pub identity: IdentityView,
    pub authenticated_at: DateTime<Utc>,
}

impl From<Session> for Authenticated {
    fn from(session: Session) -> Self {
        Self {
            identity: IdentityView::from(&session.identity),
            authenticated_at: session.authenticated_at,
        }
    }
}
