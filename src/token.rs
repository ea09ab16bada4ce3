//! Parsed bearer tokens and standard-claim checks.
//!
//! [`SignedToken::parse`] splits a compact JWS into its header and payload
//! without verifying anything; verification is the job of a
//! [`TokenValidator`](crate::TokenValidator). Whatever validator ran, the
//! provider then calls [`SignedToken::validate_claims`] to check issuer,
//! audience and validity window from the token's own payload.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Header;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::Diagnostics;
use crate::secret::SecretString;

/// Audience claim value, which can be a single string or array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenAudience {
    Single(String),
    Multiple(Vec<String>),
}

impl TokenAudience {
    /// Check if the audience contains a specific value.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            TokenAudience::Single(s) => s == value,
            TokenAudience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Scope claim, either space-delimited (RFC 8693) or a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeClaim {
    Delimited(String),
    List(Vec<String>),
}

/// Claims the provider understands. Everything else stays in the raw
/// payload of the [`SignedToken`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<TokenAudience>,

    /// Expiration time (Unix timestamp).
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<u64>,

    /// Not-before time (Unix timestamp).
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<u64>,

    /// Issued-at time (Unix timestamp).
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeClaim>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// A NumericDate may carry a fractional part; whole seconds are kept.
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(secs) = number.as_u64() {
        return Ok(Some(secs));
    }
    match number.as_f64() {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(secs as u64)),
        _ => Err(serde::de::Error::custom(format!("invalid NumericDate {number}"))),
    }
}

impl TokenClaims {
    /// The individual scopes carried by the token.
    pub fn scopes(&self) -> BTreeSet<String> {
        match &self.scope {
            Some(ScopeClaim::Delimited(s)) => s.split_whitespace().map(String::from).collect(),
            Some(ScopeClaim::List(list)) => list.iter().filter(|s| !s.is_empty()).cloned().collect(),
            None => BTreeSet::new(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(scope)
    }
}

/// Expected values for the standard claims.
#[derive(Debug, Clone, Default)]
pub struct ClaimExpectations {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp` and `nbf`, in seconds.
    pub leeway: u64,
}

/// Why a token could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum TokenParseError {
    #[error("expected a compact JWS with three segments")]
    Format,
    #[error("invalid token header: {0}")]
    Header(#[from] jsonwebtoken::errors::Error),
    #[error("invalid token payload: {0}")]
    Payload(String),
}

/// A parsed, not yet verified, JSON Web Token.
#[derive(Debug, Clone)]
pub struct SignedToken {
    raw: SecretString,
    header: Header,
    payload: Map<String, Value>,
    claims: TokenClaims,
}

impl SignedToken {
    /// Parse a compact JWS without checking its signature.
    pub fn parse(token: &str) -> Result<Self, TokenParseError> {
        let mut segments = token.split('.');
        let (Some(_), Some(payload), Some(_), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenParseError::Format);
        };

        let header = jsonwebtoken::decode_header(token)?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenParseError::Payload(e.to_string()))?;
        let payload: Map<String, Value> =
            serde_json::from_slice(&bytes).map_err(|e| TokenParseError::Payload(e.to_string()))?;
        let claims: TokenClaims = serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| TokenParseError::Payload(e.to_string()))?;

        Ok(Self {
            raw: SecretString::with_label(token, "TOKEN"),
            header,
            payload,
            claims,
        })
    }

    /// The original token string.
    pub fn token(&self) -> &SecretString {
        &self.raw
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Every payload claim, including the ones not modelled by [`TokenClaims`].
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Check issuer, audience, expiry and not-before against `expected`.
    pub fn validate_claims(&self, expected: &ClaimExpectations) -> Diagnostics {
        self.validate_claims_at(expected, now())
    }

    pub(crate) fn validate_claims_at(&self, expected: &ClaimExpectations, now: u64) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let claims = &self.claims;

        if let Some(issuer) = &expected.issuer {
            match &claims.iss {
                Some(iss) if iss == issuer => {}
                Some(iss) => diagnostics.fatal(
                    "claims",
                    format!("Issuer must be {issuer}, yet it is {iss}"),
                ),
                None => diagnostics.fatal("claims", "Issuer claim is required"),
            }
        }

        if let Some(audience) = &expected.audience {
            match &claims.aud {
                Some(aud) if aud.contains(audience) => {}
                Some(_) => diagnostics.fatal(
                    "claims",
                    format!("Audience must contain {audience}"),
                ),
                None => diagnostics.fatal("claims", "Audience claim is required"),
            }
        }

        if let Some(exp) = claims.exp {
            if now > exp.saturating_add(expected.leeway) {
                diagnostics.fatal("claims", "Token has expired");
            }
        }

        if let Some(nbf) = claims.nbf {
            if now.saturating_add(expected.leeway) < nbf {
                diagnostics.fatal("claims", "Token is not yet valid");
            }
        }

        diagnostics
    }
}

pub(crate) fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
