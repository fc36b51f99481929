//! Form tokens.
//!
//! A token is the HMAC-SHA256 of `secret.key` over the path the form posts to,
//! so a token only unlocks the form it was issued for.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::error;

/// Name of the hidden form field carrying the token.
pub const CSRF_FIELD: &str = "csrf_token";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CsrfKey {
    key: Vec<u8>,
}

impl std::fmt::Debug for CsrfKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("CsrfKey").field("key", &"<redacted>").finish()
    }
}

impl CsrfKey {
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self, scope: &str) -> Option<HmacSha256> {
        match HmacSha256::new_from_slice(&self.key) {
            Ok(mut mac) => {
                mac.update(scope.as_bytes());
                Some(mac)
            }
            Err(error) => {
                error!(%error, "could not key the form token mac");
                None
            }
        }
    }

    /// Token for forms posting to `scope`.
    pub fn token(&self, scope: &str) -> String {
        self.mac(scope)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    pub fn verify(&self, scope: &str, token: &str) -> bool {
        let Ok(expected) = hex::decode(token.trim()) else {
            return false;
        };
        !expected.is_empty() && self.mac(scope).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_bound_to_their_scope() {
        let key = CsrfKey::new("abc");
        let token = key.token("/register");
        assert_eq!(token.len(), 64);
        assert!(key.verify("/register", &token));
        assert!(!key.verify("/recover", &token));
    }

    #[test]
    fn tokens_depend_on_the_secret() {
        let token = CsrfKey::new("abc").token("/register");
        assert!(!CsrfKey::new("xyz").verify("/register", &token));
    }

    #[test]
    fn garbage_is_rejected() {
        let key = CsrfKey::new("abc");
        assert!(!key.verify("/register", ""));
        assert!(!key.verify("/register", "not hex"));
        assert!(!key.verify("/register", "00ff"));
    }

    #[test]
    fn debug_hides_the_key() {
        assert!(!format!("{:?}", CsrfKey::new("abc")).contains("abc"));
    }
}
