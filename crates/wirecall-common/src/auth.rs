//! Shared-secret token authentication.
//!
//! Every request carries an optional token which the server compares against
//! its configured secret. Authentication is optional: a server constructed
//! without a token accepts all requests.
//!
//! Tokens are validated with a constant-time comparison to prevent timing
//! attacks. A failed comparison never reaches a handler; the server answers
//! with an `InvalidToken` structured exception instead.

use std::fmt;

/// Token authentication configuration for a wirecall server.
///
/// # Example
///
/// ```
/// use wirecall_common::auth::TokenAuth;
///
/// let auth = TokenAuth::with_token("superdupersecret");
/// assert!(auth.required());
/// assert!(auth.validate(Some("superdupersecret")));
/// assert!(!auth.validate(Some("guess")));
/// assert!(!auth.validate(None));
///
/// let open = TokenAuth::disabled();
/// assert!(open.validate(None));
/// ```
#[derive(Clone, Debug, Default)]
pub struct TokenAuth {
    token: Option<String>,
}

impl TokenAuth {
    /// Creates a `TokenAuth` requiring the given shared secret.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Creates a `TokenAuth` that accepts all requests.
    pub fn disabled() -> Self {
        Self { token: None }
    }

    /// Builds from an optional secret, `None` meaning disabled.
    pub fn from_option(token: Option<String>) -> Self {
        Self { token }
    }

    /// Returns whether requests must present a token.
    pub fn required(&self) -> bool {
        self.token.is_some()
    }

    /// Validates a request token against the configured secret.
    ///
    /// Always `true` when authentication is disabled. A missing token fails
    /// validation whenever a secret is configured.
    pub fn validate(&self, provided: Option<&str>) -> bool {
        match (&self.token, provided) {
            (None, _) => true,
            (Some(expected), Some(provided)) => constant_time_eq(expected, provided),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(_) => write!(f, "Token(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Constant-time string comparison.
///
/// Iterates through both strings in full regardless of where the first
/// difference occurs, so timing reveals nothing about the secret's content.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_auth_validates_exact_match() {
        let auth = TokenAuth::with_token("test-token");
        assert!(auth.required());
        assert!(auth.validate(Some("test-token")));
        assert!(!auth.validate(Some("wrong-token")));
        assert!(!auth.validate(None));
    }

    #[test]
    fn test_disabled_auth_accepts_anything() {
        let auth = TokenAuth::disabled();
        assert!(!auth.required());
        assert!(auth.validate(Some("anything")));
        assert!(auth.validate(Some("")));
        assert!(auth.validate(None));
    }

    #[test]
    fn test_from_option() {
        assert!(TokenAuth::from_option(Some("t".into())).required());
        assert!(!TokenAuth::from_option(None).required());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("short", "longer"));
        assert!(!constant_time_eq("a", ""));
    }

    #[test]
    fn test_display_masks_secret() {
        assert_eq!(format!("{}", TokenAuth::with_token("secret")), "Token(*****)");
        assert_eq!(format!("{}", TokenAuth::disabled()), "Disabled");
    }
}
