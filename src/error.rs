//! Error types for tower-oidc.
//!
//! Two families live here:
//!
//! - [`ConfigError`] is raised while building a [`ProviderConfig`](crate::ProviderConfig)
//!   and is the only error that stops the provider from starting.
//! - [`AuthError`] describes why a single request failed authentication or
//!   authorization. It never escapes as a fault: the provider turns it into a
//!   redirect, an abstain decision, or an error response with the matching
//!   status code and `WWW-Authenticate` header (RFC 6750 Section 3).

use std::fmt;

use crate::locator::TokenLocation;

/// Boxed error type used by the tower services.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Provider misconfiguration detected at build time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OIDC configuration must define `{0}`")]
    Missing(&'static str),

    #[error("invalid URI for `{field}`: {source}")]
    InvalidUri {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("JWK validation requires at least one signing key")]
    NoSigningKeys,

    #[error("invalid signing key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),

    #[error("token introspection requires the `introspection` feature")]
    IntrospectionUnavailable,

    #[error("at least one token location (header, query param, cookie) must be enabled")]
    NoTokenLocation,

    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),
}

/// Request-time authentication or authorization failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token was found in any enabled location.
    MissingToken {
        /// Every location that was checked and came up empty.
        locations: Vec<TokenLocation>,
    },

    /// A token was found but could not be parsed, or a configured location
    /// could not be read.
    MalformedToken {
        /// Human-readable reason.
        description: String,
    },

    /// Signature, introspection or standard-claim validation failed.
    InvalidToken,

    /// The token is valid but lacks scopes required by the endpoint.
    InsufficientScope {
        /// Required scopes that were not granted, sorted.
        missing: Vec<String>,
    },
}

impl AuthError {
    /// HTTP status code used when this error is answered without a redirect.
    ///
    /// 403 for insufficient scope, 401 for everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InsufficientScope { .. } => 403,
            _ => 401,
        }
    }

    /// RFC 6750 error code, if the failure carries one.
    ///
    /// Requests without usable credentials get no error code.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            AuthError::MissingToken { .. } | AuthError::MalformedToken { .. } => None,
            AuthError::InvalidToken => Some("invalid_token"),
            AuthError::InsufficientScope { .. } => Some("insufficient_scope"),
        }
    }

    /// Builds the `WWW-Authenticate` header value for the given realm.
    pub fn www_authenticate(&self, realm: &str) -> String {
        let realm = quoted(realm);
        match self.error_code() {
            None => format!("Bearer realm=\"{realm}\""),
            Some(code) => format!(
                "Bearer realm=\"{realm}\", error=\"{code}\", error_description=\"{}\"",
                quoted(&self.to_string())
            ),
        }
    }
}

// Header parameters are quoted-strings; keep them well formed.
fn quoted(value: &str) -> String {
    value.replace(['"', '\\'], "'")
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken { locations } => {
                let names: Vec<&str> = locations.iter().map(|l| l.as_str()).collect();
                write!(
                    f,
                    "Missing token, could not find in either of: [{}]",
                    names.join(", ")
                )
            }
            AuthError::MalformedToken { description } => {
                write!(f, "Invalid token: {}", description)
            }
            AuthError::InvalidToken => write!(f, "Token not valid"),
            AuthError::InsufficientScope { missing } => {
                write!(f, "Scopes [{}] are missing", missing.join(", "))
            }
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_has_realm_only() {
        let err = AuthError::MissingToken {
            locations: vec![TokenLocation::Header, TokenLocation::Cookie],
        };
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.www_authenticate("my-realm"), "Bearer realm=\"my-realm\"");
        assert_eq!(
            err.to_string(),
            "Missing token, could not find in either of: [header, cookie]"
        );
    }

    #[test]
    fn test_invalid_token_header() {
        let err = AuthError::InvalidToken;
        assert_eq!(err.status_code(), 401);
        assert_eq!(
            err.www_authenticate("r"),
            "Bearer realm=\"r\", error=\"invalid_token\", error_description=\"Token not valid\""
        );
    }

    #[test]
    fn test_insufficient_scope() {
        let err = AuthError::InsufficientScope {
            missing: vec!["admin".to_string(), "write".to_string()],
        };
        assert_eq!(err.status_code(), 403);
        let header = err.www_authenticate("r");
        assert!(header.contains("error=\"insufficient_scope\""));
        assert!(header.contains("Scopes [admin, write] are missing"));
    }

    #[test]
    fn test_malformed_token_has_no_error_code() {
        let err = AuthError::MalformedToken {
            description: "not a JWT".to_string(),
        };
        assert_eq!(err.error_code(), None);
        assert_eq!(err.www_authenticate("r"), "Bearer realm=\"r\"");
    }

    #[test]
    fn test_quotes_are_escaped() {
        let err = AuthError::InsufficientScope {
            missing: vec!["a\"b".to_string()],
        };
        assert!(err.www_authenticate("re\"alm").starts_with("Bearer realm=\"re'alm\""));
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::Missing("client-id").to_string(),
            "OIDC configuration must define `client-id`"
        );
    }
}
