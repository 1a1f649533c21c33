//! Session Credentials
//!
//! The session token and session id handed to the game by the launcher.
//! The server never issues tokens; it forwards them to the settlement
//! service for verification and includes them in bet reports.

use reqwest::Url;
use sha2::{Sha256, Digest};
use thiserror::Error;

/// Credentials for one game session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Game session identifier reported with each settlement.
    pub session_id: Option<String>,
    /// Opaque session token.
    pub token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("session_id", &self.session_id)
            .field("token", &self.fingerprint())
            .finish()
    }
}

/// Credential errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialsError {
    /// No usable session token.
    #[error("missing session token")]
    MissingToken,
    /// Launch URL could not be parsed.
    #[error("invalid launch url: {0}")]
    InvalidUrl(String),
}

impl Credentials {
    /// Create credentials. Empty strings count as absent.
    pub fn new(session_id: Option<String>, token: Option<String>) -> Self {
        Self {
            session_id: non_empty(session_id),
            token: non_empty(token),
        }
    }

    /// Read `SESSION_ID` and `SESSION_TOKEN` from the environment.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("SESSION_ID").ok(),
            std::env::var("SESSION_TOKEN").ok(),
        )
    }

    /// Read the `sessionId` and `token` query parameters of a launch URL.
    pub fn from_query(url: &str) -> Result<Self, CredentialsError> {
        let url = Url::parse(url).map_err(|e| CredentialsError::InvalidUrl(e.to_string()))?;

        let mut session_id = None;
        let mut token = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sessionId" => session_id = Some(value.into_owned()),
                "token" => token = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(Self::new(session_id, token))
    }

    /// The token, or an error if none was provided.
    pub fn require_token(&self) -> Result<&str, CredentialsError> {
        self.token.as_deref().ok_or(CredentialsError::MissingToken)
    }

    /// True if both a token and a session id are present.
    pub fn is_complete(&self) -> bool {
        self.token.is_some() && self.session_id.is_some()
    }

    /// Short digest of the token, safe to log.
    pub fn fingerprint(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            let mut hasher = Sha256::new();
            hasher.update(b"crash-round-token:");
            hasher.update(token.as_bytes());
            hex::encode(&hasher.finalize()[..6])
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query() {
        let creds = Credentials::from_query(
            "https://game.example.com/crash?sessionId=s-42&token=abc%2Bdef&lang=en",
        )
        .unwrap();
        assert_eq!(creds.session_id.as_deref(), Some("s-42"));
        assert_eq!(creds.require_token(), Ok("abc+def"));
        assert!(creds.is_complete());
    }

    #[test]
    fn test_missing_token() {
        let creds = Credentials::from_query("https://game.example.com/crash?sessionId=s-42").unwrap();
        assert_eq!(creds.require_token(), Err(CredentialsError::MissingToken));
        assert!(!creds.is_complete());
    }

    #[test]
    fn test_empty_token_counts_as_missing() {
        let creds = Credentials::new(Some("s".into()), Some("  ".into()));
        assert_eq!(creds.token, None);
        assert_eq!(creds.require_token(), Err(CredentialsError::MissingToken));
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Credentials::from_query("not a url"),
            Err(CredentialsError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_fingerprint_hides_token() {
        let creds = Credentials::new(None, Some("super-secret".into()));
        let fp = creds.fingerprint().unwrap();

        assert_eq!(fp.len(), 12);
        assert_eq!(Some(fp.clone()), creds.fingerprint());
        assert!(!format!("{:?}", creds).contains("super-secret"));

        let other = Credentials::new(None, Some("other-secret".into()));
        assert_ne!(other.fingerprint(), Some(fp));
        assert_eq!(Credentials::default().fingerprint(), None);
    }
}
