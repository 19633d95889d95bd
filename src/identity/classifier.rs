//! Email status classification.

use crate::identity::Identity;

/// Enrollment state of an email address against the current identity set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailStatus {
    /// No identities exist yet; the next enrollment bootstraps the system.
    SystemInit,
    /// Address is not provisioned. Access denied, no self-service signup.
    Unknown,
    /// Identity exists but has no secret; first-time enrollment required.
    KnownNoMfa,
    /// Identity exists with a secret; a code is all that is needed.
    KnownWithMfa,
}

/// Classifies `email` against a read-only snapshot of the identity set.
///
/// Pure function: no mutation, no caching. Lookup is case-insensitive.
pub fn classify(email: &str, identities: &[Identity]) -> EmailStatus {
    if identities.is_empty() {
        return EmailStatus::SystemInit;
    }

    let email = email.to_lowercase();
    match identities
        .iter()
        .find(|identity| identity.email.eq_ignore_ascii_case(&email))
    {
        None => EmailStatus::Unknown,
        Some(identity) if identity.totp_secret.is_some() => EmailStatus::KnownWithMfa,
        Some(_) => EmailStatus::KnownNoMfa,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrolled(email: &str) -> Identity {
        Identity::bootstrap(email, "GEZDGNBVGY3TQOJQ", chrono::Utc::now())
    }

    #[test]
    fn empty_set_is_system_init() {
        assert_eq!(classify("anyone@co.test", &[]), EmailStatus::SystemInit);
    }

    #[test]
    fn absent_email_is_unknown() {
        let identities = vec![enrolled("admin@co.test")];
        assert_eq!(
            classify("other@co.test", &identities),
            EmailStatus::Unknown
        );
    }

    #[test]
    fn secret_presence_decides_mfa_state() {
        let with_secret = enrolled("admin@co.test");
        let without_secret =
            Identity::provisioned("user@co.test", "User", crate::identity::Role::Viewer);
        let identities = vec![with_secret, without_secret];

        assert_eq!(
            classify("admin@co.test", &identities),
            EmailStatus::KnownWithMfa
        );
        assert_eq!(
            classify("user@co.test", &identities),
            EmailStatus::KnownNoMfa
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let identities = vec![enrolled("Admin@Co.Test")];
        assert_eq!(
            classify("ADMIN@CO.TEST", &identities),
            EmailStatus::KnownWithMfa
        );
    }
}
