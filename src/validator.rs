//! Token validation strategies.
//!
//! A provider validates tokens with exactly one strategy, chosen when the
//! [`ProviderConfig`](crate::ProviderConfig) is built:
//!
//! - [`JwkValidator`] checks the signature locally against a fixed key set.
//! - [`IntrospectionValidator`] asks the identity provider's introspection
//!   endpoint whether the token is active (feature `introspection`).
//!
//! Both report through [`Diagnostics`]; [`verify`] then adds the standard
//! claim checks and reduces everything to a [`ValidationVerdict`].

use std::future::Future;
use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::diagnostics::Diagnostics;
use crate::error::ConfigError;
use crate::token::{ClaimExpectations, SignedToken};

/// Outcome of validating one token. Never partially valid.
#[derive(Debug)]
pub enum ValidationVerdict {
    Valid(SignedToken),
    Invalid(Diagnostics),
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationVerdict::Valid(_))
    }
}

/// Trait for token validation strategies.
///
/// Implementations collect problems instead of returning early; a
/// [`Severity::Fatal`](crate::Severity::Fatal) entry rejects the token.
pub trait TokenValidator: Clone + Send + Sync + 'static {
    fn validate(&self, token: &SignedToken) -> impl Future<Output = Diagnostics> + Send;
}

/// Run `validator`, check standard claims, and merge both results.
///
/// The claim check always runs, whatever the validator reported.
pub async fn verify<V: TokenValidator>(
    validator: &V,
    token: SignedToken,
    expected: &ClaimExpectations,
) -> ValidationVerdict {
    let mut diagnostics = validator.validate(&token).await;
    diagnostics.merge(token.validate_claims(expected));
    diagnostics.log();

    if diagnostics.is_valid() {
        ValidationVerdict::Valid(token)
    } else {
        ValidationVerdict::Invalid(diagnostics)
    }
}

struct VerificationKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

/// Local signature verification against a fixed set of keys.
///
/// Key rotation is not handled here: the set is fixed for the lifetime of
/// the validator.
#[derive(Clone)]
pub struct JwkValidator {
    keys: Arc<Vec<VerificationKey>>,
}

impl std::fmt::Debug for JwkValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kids: Vec<_> = self.keys.iter().map(|k| k.kid.as_deref()).collect();
        f.debug_struct("JwkValidator").field("kids", &kids).finish()
    }
}

impl JwkValidator {
    /// Create a validator from a JSON Web Key Set.
    ///
    /// # Errors
    ///
    /// Fails if the set is empty or a key cannot be used for verification.
    pub fn from_jwk_set(set: &JwkSet) -> Result<Self, ConfigError> {
        let keys = set
            .keys
            .iter()
            .map(verification_key)
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(ConfigError::NoSigningKeys);
        }
        Ok(Self {
            keys: Arc::new(keys),
        })
    }

    /// Create a validator from an HMAC secret (HS256).
    pub fn from_secret(kid: Option<&str>, secret: &[u8]) -> Self {
        Self::from_key(kid, Algorithm::HS256, DecodingKey::from_secret(secret))
    }

    /// Create a validator from an RSA PEM-encoded public key (RS256).
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data is invalid.
    pub fn from_rsa_pem(kid: Option<&str>, pem: &[u8]) -> Result<Self, ConfigError> {
        Ok(Self::from_key(
            kid,
            Algorithm::RS256,
            DecodingKey::from_rsa_pem(pem)?,
        ))
    }

    fn from_key(kid: Option<&str>, algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            keys: Arc::new(vec![VerificationKey {
                kid: kid.map(String::from),
                algorithm: Some(algorithm),
                key,
            }]),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn select_key(&self, kid: Option<&str>, diagnostics: &mut Diagnostics) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => {
                let key = self.keys.iter().find(|k| k.kid.as_deref() == Some(kid));
                if key.is_none() {
                    diagnostics.fatal("jwk", format!("No key found for kid {kid}"));
                }
                key
            }
            None if self.keys.len() == 1 => {
                diagnostics.warn("jwk", "Token has no kid, verifying with the only configured key");
                self.keys.first()
            }
            None => {
                diagnostics.fatal("jwk", "Token has no kid and several keys are configured");
                None
            }
        }
    }
}

fn verification_key(jwk: &Jwk) -> Result<VerificationKey, ConfigError> {
    Ok(VerificationKey {
        kid: jwk.common.key_id.clone(),
        algorithm: jwk.common.key_algorithm.as_ref().and_then(signing_algorithm),
        key: DecodingKey::from_jwk(jwk)?,
    })
}

fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

impl TokenValidator for JwkValidator {
    async fn validate(&self, token: &SignedToken) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let header = token.header();

        if let Some(typ) = header.typ.as_deref() {
            if !typ.eq_ignore_ascii_case("JWT") && !typ.eq_ignore_ascii_case("at+jwt") {
                diagnostics.hint("jwk", format!("Unexpected token type {typ}"));
            }
        }

        let Some(key) = self.select_key(header.kid.as_deref(), &mut diagnostics) else {
            return diagnostics;
        };

        if let Some(expected) = key.algorithm {
            if expected != header.alg {
                diagnostics.fatal(
                    "jwk",
                    format!("Key expects {expected:?}, token is signed with {:?}", header.alg),
                );
                return diagnostics;
            }
        }

        // Only the signature here; standard claims are checked by `verify`.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        if let Err(e) =
            jsonwebtoken::decode::<serde_json::Value>(token.token().expose(), &key.key, &validation)
        {
            diagnostics.fatal("jwk", format!("Signature verification failed: {e}"));
        }

        diagnostics
    }
}

#[cfg(feature = "introspection")]
pub use introspection::IntrospectionValidator;

#[cfg(feature = "introspection")]
mod introspection {
    use reqwest::header::{ACCEPT, CACHE_CONTROL};
    use serde::Deserialize;

    use super::TokenValidator;
    use crate::diagnostics::Diagnostics;
    use crate::secret::SecretString;
    use crate::token::SignedToken;

    #[derive(Deserialize)]
    struct IntrospectionResponse {
        active: bool,
    }

    /// Remote validation through an RFC 7662 introspection endpoint.
    ///
    /// Timeouts and cancellation belong to the supplied [`reqwest::Client`];
    /// any transport failure is fatal for the token.
    #[derive(Debug, Clone)]
    pub struct IntrospectionValidator {
        client: reqwest::Client,
        uri: String,
        credentials: Option<(String, SecretString)>,
    }

    impl IntrospectionValidator {
        pub fn new(client: reqwest::Client, uri: impl Into<String>) -> Self {
            Self {
                client,
                uri: uri.into(),
                credentials: None,
            }
        }

        /// Authenticate to the endpoint with HTTP basic client credentials.
        pub fn client_credentials(mut self, client_id: impl Into<String>, secret: SecretString) -> Self {
            self.credentials = Some((client_id.into(), secret));
            self
        }

        pub fn uri(&self) -> &str {
            &self.uri
        }
    }

    impl TokenValidator for IntrospectionValidator {
        async fn validate(&self, token: &SignedToken) -> Diagnostics {
            let mut diagnostics = Diagnostics::new();

            let mut request = self
                .client
                .post(&self.uri)
                .header(ACCEPT, "application/json")
                .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
                .form(&[("token", token.token().expose())]);
            if let Some((id, secret)) = &self.credentials {
                request = request.basic_auth(id, Some(secret.expose()));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    diagnostics.fatal(
                        "introspection",
                        format!("Failed to validate token, request failed: {e}"),
                    );
                    return diagnostics;
                }
            };

            let status = response.status();
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    diagnostics.fatal(
                        "introspection",
                        format!("Failed to validate token, could not read response: {e}"),
                    );
                    return diagnostics;
                }
            };

            if !status.is_success() {
                diagnostics.fatal(
                    "introspection",
                    format!(
                        "Failed to validate token, response status: {status}, entity: {}",
                        String::from_utf8_lossy(&body)
                    ),
                );
                return diagnostics;
            }

            match serde_json::from_slice::<IntrospectionResponse>(&body) {
                Ok(response) if response.active => {}
                Ok(_) => diagnostics.fatal("introspection", "Token is not active"),
                Err(e) => diagnostics.fatal(
                    "introspection",
                    format!("Introspection response is not a valid JSON object: {e}"),
                ),
            }

            diagnostics
        }
    }
}

/// The strategy selected at build time.
#[derive(Debug, Clone)]
pub enum Validator {
    Jwk(JwkValidator),
    #[cfg(feature = "introspection")]
    Introspection(IntrospectionValidator),
}

impl TokenValidator for Validator {
    async fn validate(&self, token: &SignedToken) -> Diagnostics {
        match self {
            Validator::Jwk(v) => v.validate(token).await,
            #[cfg(feature = "introspection")]
            Validator::Introspection(v) => v.validate(token).await,
        }
    }
}

impl From<JwkValidator> for Validator {
    fn from(v: JwkValidator) -> Self {
        Validator::Jwk(v)
    }
}

#[cfg(feature = "introspection")]
impl From<IntrospectionValidator> for Validator {
    fn from(v: IntrospectionValidator) -> Self {
        Validator::Introspection(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    fn sign(claims: serde_json::Value, kid: Option<&str>, secret: &[u8]) -> SignedToken {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(String::from);
        let raw = jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap();
        SignedToken::parse(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_valid_signature() {
        let validator = JwkValidator::from_secret(Some("k1"), b"secret");
        let token = sign(serde_json::json!({"sub": "u1"}), Some("k1"), b"secret");
        let diagnostics = validator.validate(&token).await;
        assert!(diagnostics.is_valid(), "{diagnostics:?}");
        assert!(diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_fatal() {
        let validator = JwkValidator::from_secret(Some("k1"), b"secret");
        let token = sign(serde_json::json!({"sub": "u1"}), Some("k1"), b"other");
        assert!(!validator.validate(&token).await.is_valid());
    }

    #[tokio::test]
    async fn test_missing_kid_with_single_key_warns() {
        let validator = JwkValidator::from_secret(Some("k1"), b"secret");
        let token = sign(serde_json::json!({"sub": "u1"}), None, b"secret");
        let diagnostics = validator.validate(&token).await;
        assert!(diagnostics.is_valid());
        assert_eq!(
            diagnostics.iter().next().map(|d| d.severity),
            Some(crate::Severity::Warning)
        );
    }

    #[tokio::test]
    async fn test_unknown_kid_is_fatal() {
        let validator = JwkValidator::from_secret(Some("k1"), b"secret");
        let token = sign(serde_json::json!({"sub": "u1"}), Some("k2"), b"secret");
        assert!(!validator.validate(&token).await.is_valid());
    }

    #[tokio::test]
    async fn test_expired_token_passes_signature_but_fails_verify() {
        let validator = JwkValidator::from_secret(None, b"secret");
        let token = sign(serde_json::json!({"sub": "u1", "exp": 1}), None, b"secret");
        assert!(validator.validate(&token).await.is_valid());

        let verdict = verify(&validator, token, &ClaimExpectations::default()).await;
        let ValidationVerdict::Invalid(diagnostics) = verdict else {
            panic!("expected invalid verdict");
        };
        assert!(diagnostics.iter().any(|d| d.source == "claims"));
    }

    #[tokio::test]
    async fn test_verify_merges_both_failures() {
        let validator = JwkValidator::from_secret(None, b"secret");
        let token = sign(
            serde_json::json!({"sub": "u1", "iss": "https://evil"}),
            None,
            b"wrong",
        );
        let expected = ClaimExpectations {
            issuer: Some("https://idp".to_string()),
            ..Default::default()
        };
        let ValidationVerdict::Invalid(diagnostics) = verify(&validator, token, &expected).await
        else {
            panic!("expected invalid verdict");
        };
        let sources: Vec<_> = diagnostics.fatal_entries().map(|d| d.source).collect();
        assert_eq!(sources, ["jwk", "claims"]);
    }

    #[test]
    fn test_jwk_set_with_octet_key() {
        // "secret" base64url-encoded
        let set: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": "c2VjcmV0"}]
        }))
        .unwrap();
        let validator = JwkValidator::from_jwk_set(&set).unwrap();
        assert_eq!(validator.key_count(), 1);
    }

    #[test]
    fn test_empty_jwk_set_is_rejected() {
        let set = JwkSet { keys: vec![] };
        assert!(matches!(
            JwkValidator::from_jwk_set(&set),
            Err(ConfigError::NoSigningKeys)
        ));
    }
}
