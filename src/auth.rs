//! Credential verification for LOGIN

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Decides whether a LOGIN succeeds. Authorization beyond that is out of scope.
pub trait Authenticator: Send + Sync {
    fn verify(&self, user: &str, password: &str) -> bool;
}

/// Accepts any user name and password
pub struct AllowAnonymous;

impl Authenticator for AllowAnonymous {
    fn verify(&self, _user: &str, _password: &str) -> bool {
        true
    }
}

/// Fixed user table holding SHA-256 password digests (hex).
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, user: &str, sha256_hex: &str) -> Self {
        self.users.insert(user.to_string(), sha256_hex.to_ascii_lowercase());
        self
    }

    pub fn with_password(self, user: &str, password: &str) -> Self {
        let digest = password_digest(password);
        self.with_digest(user, &digest)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Authenticator for StaticCredentials {
    fn verify(&self, user: &str, password: &str) -> bool {
        let Some(expected) = self.users.get(user) else {
            return false;
        };
        let given = password_digest(password);
        // Compare every byte regardless of where the first mismatch is
        expected.len() == given.len()
            && expected
                .bytes()
                .zip(given.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new()
            .with_password("alice", "s3cret")
            .with_digest("bob", &password_digest("pw").to_uppercase());
        assert!(creds.verify("alice", "s3cret"));
        assert!(!creds.verify("alice", "wrong"));
        assert!(creds.verify("bob", "pw"));
        assert!(!creds.verify("carol", "pw"));
        assert_eq!(creds.len(), 2);
    }

    #[test]
    fn test_anonymous_accepts_all() {
        assert!(AllowAnonymous.verify("", ""));
    }
}
