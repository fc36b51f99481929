//! HTTP Basic authentication for the administrator pages.
//!
//! Accounts come from `<app>/.htpasswd` (`user:<argon2 PHC hash>` per line).
//! The `admin` user is also accepted with `secret.admin_password`.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::state::AppState;

pub const REALM: &str = "hymie admin";
pub const HTPASSWD_FILE: &str = ".htpasswd";
const DEFAULT_ADMIN: &str = "admin";

pub struct AdminCredentials {
    htpasswd: HashMap<String, String>,
    admin_password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AdminCredentials")
            .field("users", &self.htpasswd.keys().collect::<Vec<_>>())
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

impl AdminCredentials {
    pub fn new(htpasswd: HashMap<String, String>, admin_password: &str) -> Self {
        Self {
            htpasswd,
            admin_password: admin_password.to_string(),
        }
    }

    /// Reads `.htpasswd` from the app folder; a missing file means no extra accounts.
    pub fn load(app_path: &Path, admin_password: &str) -> Result<Self, ServerError> {
        let path = app_path.join(HTPASSWD_FILE);
        let htpasswd = match fs::read_to_string(&path) {
            Ok(content) => parse_htpasswd(&content),
            Err(source) if source.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no htpasswd file");
                HashMap::new()
            }
            Err(source) => {
                return Err(ServerError::Io {
                    what: path.display().to_string(),
                    source,
                });
            }
        };
        if htpasswd.is_empty() && admin_password.is_empty() {
            warn!("no administrator accounts configured, the admin pages are unreachable");
        }
        Ok(Self::new(htpasswd, admin_password))
    }

    pub async fn verify(&self, user: &str, password: &str) -> bool {
        if let Some(stored_hash) = self.htpasswd.get(user).cloned() {
            let password = password.as_bytes().to_vec();
            let user_for_log = user.to_string();
            let verified = tokio::task::spawn_blocking(move || match PasswordHash::new(&stored_hash) {
                Ok(parsed_hash) => Argon2::default().verify_password(&password, &parsed_hash).is_ok(),
                Err(error) => {
                    error!(user = %user_for_log, %error, "malformed password hash in htpasswd");
                    false
                }
            })
            .await
            .unwrap_or(false);
            if verified {
                return true;
            }
        }

        user == DEFAULT_ADMIN && !self.admin_password.is_empty() && passwords_match(&self.admin_password, password)
    }
}

/// Constant time comparison: both sides go through the same MAC and the tags are checked with `verify_slice`.
fn passwords_match(expected: &str, given: &str) -> bool {
    let keyed = || Hmac::<Sha256>::new_from_slice(REALM.as_bytes());
    let (Ok(mut expected_mac), Ok(mut given_mac)) = (keyed(), keyed()) else {
        error!("could not key the password mac");
        return false;
    };
    expected_mac.update(expected.as_bytes());
    given_mac.update(given.as_bytes());
    given_mac.verify_slice(&expected_mac.finalize().into_bytes()).is_ok()
}

fn parse_htpasswd(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(user, hash)| (user.trim().to_string(), hash.trim().to_string()))
        .collect()
}

fn basic_credentials(parts: &Parts) -> Option<(String, String)> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some((user, password)) = basic_credentials(parts) else {
            return Err(ServerError::Unauthorized);
        };
        if state.admins().verify(&user, &password).await {
            debug!(user = %user, "administrator authenticated");
            Ok(AdminUser(user))
        } else {
            info!(user = %user, "administrator authentication failed");
            Err(ServerError::Unauthorized)
        }
    }
}
