//! Enrollment/login state machine.
//!
//! Drives the three-step surface: address entry, first-time enrollment with
//! a provisioning QR, and code verification. Every outcome is a typed
//! variant consumed by the HTTP layer; nothing here panics or throws across
//! the boundary.

use std::sync::Arc;

use chrono::Utc;

use crate::config;
use crate::error::{Result, ServerError};
use crate::identity::{EmailStatus, Identity, IdentityRepository, classify};
use crate::session::{Session, SessionManager};
use crate::{qr, totp};

/// Current position in the authentication flow.
///
/// The pending secret of an enrollment lives only here until a valid code
/// proves the authenticator holds it; it is never persisted before that.
#[derive(Clone, Debug, PartialEq)]
pub enum FlowState {
    Address,
    Enroll {
        email: String,
        pending_secret: String,
    },
    Verify {
        email: String,
    },
}

/// Result of an address submission.
#[derive(Debug)]
pub enum AddressOutcome {
    /// Enrollment started: hand the secret, URI and QR to the user.
    Enroll {
        secret: String,
        provisioning_uri: String,
        qr_svg: Option<String>,
    },
    /// Identity is enrolled; ask for a code.
    Verify,
    /// Unknown address. The message must not reveal whether this is a typo
    /// or a policy decision.
    Denied,
}

/// Result of a code submission.
#[derive(Debug)]
pub enum CodeOutcome {
    Authenticated(Session),
    /// Retryable; the flow state (including a pending secret) is kept.
    Rejected,
}

pub struct AuthFlow {
    state: FlowState,
    repository: Arc<IdentityRepository>,
    sessions: SessionManager,
    issuer: String,
    totp: config::Totp,
}

impl AuthFlow {
    pub fn new(
        repository: Arc<IdentityRepository>,
        sessions: SessionManager,
        issuer: String,
        totp: config::Totp,
    ) -> Self {
        Self {
            state: FlowState::Address,
            repository,
            sessions,
            issuer,
            totp,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Classifies the submitted address against a fresh snapshot and moves
    /// the flow to the matching step. Re-evaluated on every submission.
    pub async fn submit_address(&mut self, email: &str) -> Result<AddressOutcome> {
        let email = email.trim().to_lowercase();
        let identities = self.repository.load_all().await?;

        match classify(&email, &identities) {
            EmailStatus::Unknown => {
                self.state = FlowState::Address;
                Ok(AddressOutcome::Denied)
            },
            EmailStatus::SystemInit | EmailStatus::KnownNoMfa => {
                let secret = totp::generate_secret()?;
                let provisioning_uri = totp::provisioning_uri(&self.issuer, &email, &secret);
                let qr_svg = match qr::render_svg(&provisioning_uri) {
                    Ok(svg) => Some(svg),
                    Err(err) => {
                        tracing::warn!(error = ?err, "qr rendering failed, falling back to raw secret");
                        None
                    },
                };

                self.state = FlowState::Enroll {
                    email,
                    pending_secret: secret.clone(),
                };

                Ok(AddressOutcome::Enroll {
                    secret,
                    provisioning_uri,
                    qr_svg,
                })
            },
            EmailStatus::KnownWithMfa => {
                self.state = FlowState::Verify { email };
                Ok(AddressOutcome::Verify)
            },
        }
    }

    /// Validates a submitted code for the step the flow is in.
    ///
    /// On success the identity is persisted through the repository, a
    /// session is opened and the flow returns to the address step.
    pub async fn submit_code(&mut self, code: &str) -> Result<CodeOutcome> {
        match self.state.clone() {
            FlowState::Address => Err(ServerError::NoAttempt),
            FlowState::Enroll {
                email,
                pending_secret,
            } => self.complete_enrollment(&email, &pending_secret, code).await,
            FlowState::Verify { email } => self.complete_verification(&email, code).await,
        }
    }

    /// Explicit back-navigation to the address step. A pending enrollment
    /// secret is discarded; re-entering issues a fresh QR.
    pub fn back(&mut self) {
        self.state = FlowState::Address;
    }

    async fn complete_enrollment(
        &mut self,
        email: &str,
        pending_secret: &str,
        code: &str,
    ) -> Result<CodeOutcome> {
        if !self.validate(pending_secret, code) {
            return Ok(CodeOutcome::Rejected);
        }

        let identities = self.repository.load_all().await?;
        let now = Utc::now();

        let identity = match identities
            .iter()
            .find(|identity| identity.email.eq_ignore_ascii_case(email))
        {
            Some(existing) => {
                // Known identity completing first-time enrollment: update in
                // place, same id, never the primary-admin flag.
                let mut identity = existing.clone();
                identity.totp_secret = Some(pending_secret.to_owned());
                identity.last_login_at = Some(now);
                identity
            },
            None if identities.is_empty() => Identity::bootstrap(email, pending_secret, now),
            // The identity vanished between address and code submission.
            None => return Ok(CodeOutcome::Rejected),
        };

        self.authenticate(identity).await
    }

    async fn complete_verification(&mut self, email: &str, code: &str) -> Result<CodeOutcome> {
        let identities = self.repository.load_all().await?;

        let Some(existing) = identities
            .iter()
            .find(|identity| identity.email.eq_ignore_ascii_case(email))
        else {
            return Ok(CodeOutcome::Rejected);
        };
        let Some(secret) = existing.totp_secret.as_deref() else {
            return Ok(CodeOutcome::Rejected);
        };

        if !self.validate(secret, code) {
            return Ok(CodeOutcome::Rejected);
        }

        let mut identity = existing.clone();
        identity.last_login_at = Some(Utc::now());

        self.authenticate(identity).await
    }

    async fn authenticate(&mut self, identity: Identity) -> Result<CodeOutcome> {
        self.repository.upsert(&identity).await?;
        let session = self.sessions.open(&identity).await?;
        self.state = FlowState::Address;

        tracing::info!(email = %identity.email, role = %identity.role, "authenticated");
        Ok(CodeOutcome::Authenticated(session))
    }

    fn validate(&self, secret: &str, code: &str) -> bool {
        totp::validate(
            secret,
            code,
            self.totp.window,
            self.totp.digits,
            self.totp.period,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::identity::Role;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn flow(dir: &tempfile::TempDir) -> (AuthFlow, Arc<IdentityRepository>) {
        let cache = CacheStore::new(dir.path().join("cache.json"));
        let repository = Arc::new(IdentityRepository::local(cache.clone()));
        let sessions = SessionManager::new(cache);
        let flow = AuthFlow::new(
            Arc::clone(&repository),
            sessions,
            "Postern".to_owned(),
            config::Totp::default(),
        );

        (flow, repository)
    }

    fn current_code(secret: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        totp::generate(secret, now, 6, 30).unwrap()
    }

    fn wrong_code(secret: &str) -> String {
        let mut code = current_code(secret).into_bytes();
        // Last digit flipped: never equal to the current-step code.
        code[5] = b'0' + ((code[5] - b'0' + 1) % 10);
        String::from_utf8(code).unwrap()
    }

    #[tokio::test]
    async fn bootstrap_creates_the_primary_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let AddressOutcome::Enroll { secret, provisioning_uri, .. } =
            flow.submit_address("Admin@co.test").await.unwrap()
        else {
            panic!("expected enrollment to start on an empty system");
        };
        assert!(provisioning_uri.starts_with("otpauth://totp/Postern:admin@co.test?"));

        let outcome = flow.submit_code(&current_code(&secret)).await.unwrap();
        assert!(matches!(outcome, CodeOutcome::Authenticated(_)));

        let identities = repository.load_all().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert!(identities[0].is_primary_admin);
        assert_eq!(identities[0].role, Role::Admin);
        assert_eq!(identities[0].email, "admin@co.test");
        assert_eq!(identities[0].display_name, "admin");
        assert!(identities[0].last_login_at.is_some());
    }

    #[tokio::test]
    async fn enrollment_updates_provisioned_identity_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let provisioned = Identity::provisioned("user@co.test", "User", Role::Auditor);
        repository.upsert(&provisioned).await.unwrap();

        let AddressOutcome::Enroll { secret, .. } =
            flow.submit_address("user@co.test").await.unwrap()
        else {
            panic!("expected enrollment for an identity without a secret");
        };

        // A wrong code keeps the pending secret; the same QR stays valid.
        let rejected = flow.submit_code(&wrong_code(&secret)).await.unwrap();
        assert!(matches!(rejected, CodeOutcome::Rejected));
        assert!(matches!(flow.state(), FlowState::Enroll { .. }));

        let outcome = flow.submit_code(&current_code(&secret)).await.unwrap();
        assert!(matches!(outcome, CodeOutcome::Authenticated(_)));

        let identities = repository.load_all().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].id, provisioned.id);
        assert_eq!(identities[0].role, Role::Auditor);
        assert!(!identities[0].is_primary_admin);
        assert_eq!(identities[0].totp_secret.as_deref(), Some(secret.as_str()));
    }

    #[tokio::test]
    async fn verification_accepts_the_stored_secret_after_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let secret = totp::generate_secret().unwrap();
        let enrolled = Identity::bootstrap("admin@co.test", &secret, Utc::now());
        let first_login = enrolled.last_login_at;
        repository.upsert(&enrolled).await.unwrap();

        let outcome = flow.submit_address("admin@co.test").await.unwrap();
        assert!(matches!(outcome, AddressOutcome::Verify));

        let rejected = flow.submit_code(&wrong_code(&secret)).await.unwrap();
        assert!(matches!(rejected, CodeOutcome::Rejected));
        assert!(matches!(flow.state(), FlowState::Verify { .. }));

        let outcome = flow.submit_code(&current_code(&secret)).await.unwrap();
        let CodeOutcome::Authenticated(session) = outcome else {
            panic!("expected authentication with the correct code");
        };
        assert!(session.authenticated);

        let identities = repository.load_all().await.unwrap();
        assert!(identities[0].last_login_at > first_login);
    }

    #[tokio::test]
    async fn unknown_address_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        repository
            .upsert(&Identity::provisioned("user@co.test", "User", Role::Viewer))
            .await
            .unwrap();

        let outcome = flow.submit_address("stranger@co.test").await.unwrap();
        assert!(matches!(outcome, AddressOutcome::Denied));
        assert_eq!(*flow.state(), FlowState::Address);
    }

    #[tokio::test]
    async fn second_enrollment_never_grants_primary_admin() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let first = Identity::bootstrap("admin@co.test", "GEZDGNBVGY3TQOJQ", Utc::now());
        repository.upsert(&first).await.unwrap();
        repository
            .upsert(&Identity::provisioned("user@co.test", "User", Role::Viewer))
            .await
            .unwrap();

        let AddressOutcome::Enroll { secret, .. } =
            flow.submit_address("user@co.test").await.unwrap()
        else {
            panic!("expected enrollment");
        };
        flow.submit_code(&current_code(&secret)).await.unwrap();

        let identities = repository.load_all().await.unwrap();
        let admins: Vec<_> = identities
            .iter()
            .filter(|identity| identity.is_primary_admin)
            .collect();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].email, "admin@co.test");
    }

    #[tokio::test]
    async fn enrollment_rejected_when_identity_vanishes_mid_flight() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let provisioned = Identity::provisioned("user@co.test", "User", Role::Viewer);
        repository.upsert(&provisioned).await.unwrap();
        repository
            .upsert(&Identity::bootstrap("admin@co.test", "GEZDGNBVGY3TQOJQ", Utc::now()))
            .await
            .unwrap();

        let AddressOutcome::Enroll { secret, .. } =
            flow.submit_address("user@co.test").await.unwrap()
        else {
            panic!("expected enrollment");
        };

        repository.remove(&provisioned.id).await.unwrap();

        let outcome = flow.submit_code(&current_code(&secret)).await.unwrap();
        assert!(matches!(outcome, CodeOutcome::Rejected));
    }

    #[tokio::test]
    async fn code_without_an_attempt_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, _) = flow(&dir);

        let result = flow.submit_code("123456").await;
        assert!(matches!(result, Err(ServerError::NoAttempt)));
    }

    #[tokio::test]
    async fn back_returns_to_the_address_step() {
        let dir = tempfile::tempdir().unwrap();
        let (mut flow, repository) = flow(&dir);

        let secret = totp::generate_secret().unwrap();
        repository
            .upsert(&Identity::bootstrap("admin@co.test", &secret, Utc::now()))
            .await
            .unwrap();

        flow.submit_address("admin@co.test").await.unwrap();
        assert!(matches!(flow.state(), FlowState::Verify { .. }));

        flow.back();
        assert_eq!(*flow.state(), FlowState::Address);
    }
}
