//! The OIDC provider: inbound authentication and outbound propagation.
//!
//! [`OidcProvider::authenticate`] runs the inbound pipeline:
//!
//! 1. locate a token (header, query parameter, cookie)
//! 2. parse it as a compact JWS
//! 3. validate it with the configured strategy and check standard claims
//! 4. project the claims onto a [`Subject`]
//! 5. check the endpoint's required scopes
//!
//! Every failure along the way becomes an [`AuthError`], which is then
//! turned into a redirect, an abstain decision or an error response. Nothing
//! escapes as a fault.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode, Uri};

use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::redirect::RedirectDecision;
use crate::scope::ScopeRequirement;
use crate::subject::Subject;
use crate::token::SignedToken;
use crate::validator::{ValidationVerdict, verify};

/// The outcome of authenticating one request.
#[derive(Debug, Clone)]
pub enum AuthenticationResponse {
    /// The caller is authenticated and authorized.
    Success(Arc<Subject>),
    /// The provider does not decide; the request proceeds unauthenticated.
    Abstain { reason: AuthError },
    /// Send the caller to the identity provider.
    Redirect { location: String, reason: AuthError },
    /// Reject the request.
    Failure {
        status: StatusCode,
        www_authenticate: String,
        reason: AuthError,
    },
}

impl AuthenticationResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthenticationResponse::Success(_))
    }

    pub fn subject(&self) -> Option<&Arc<Subject>> {
        match self {
            AuthenticationResponse::Success(subject) => Some(subject),
            _ => None,
        }
    }

    /// Why authentication did not succeed.
    pub fn reason(&self) -> Option<&AuthError> {
        match self {
            AuthenticationResponse::Success(_) => None,
            AuthenticationResponse::Abstain { reason }
            | AuthenticationResponse::Redirect { reason, .. }
            | AuthenticationResponse::Failure { reason, .. } => Some(reason),
        }
    }
}

/// OpenID Connect authentication provider.
///
/// Cheap to clone; clones share the configuration and the outbound cache.
#[derive(Debug, Clone)]
pub struct OidcProvider {
    config: Arc<ProviderConfig>,
}

impl OidcProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Authenticate a request to `uri` that requires `required` scopes.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        required: &ScopeRequirement,
    ) -> AuthenticationResponse {
        match self.authenticate_token(headers, uri, required).await {
            Ok(subject) => {
                tracing::debug!(principal = %subject.principal().name, "authenticated");
                AuthenticationResponse::Success(Arc::new(subject))
            }
            Err(error) => self.error_response(error, headers, uri, required),
        }
    }

    async fn authenticate_token(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        required: &ScopeRequirement,
    ) -> Result<Subject, AuthError> {
        let raw = self.config.locator.locate(headers, uri).await?;
        tracing::trace!(location = %raw.location, "token found");

        let token = SignedToken::parse(raw.token.expose()).map_err(|e| {
            tracing::debug!(error = %e, "could not parse inbound token");
            AuthError::MalformedToken {
                description: e.to_string(),
            }
        })?;

        let token = match verify(&self.config.validator, token, &self.config.expectations).await {
            ValidationVerdict::Valid(token) => token,
            ValidationVerdict::Invalid(_) => return Err(AuthError::InvalidToken),
        };

        let subject = Subject::from_token(&token, self.config.use_jwt_groups).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AuthError::InvalidToken
        })?;

        required.check(&subject)?;
        Ok(subject)
    }

    /// Turn a failure into a redirect, abstain or error response.
    pub fn error_response(
        &self,
        error: AuthError,
        headers: &HeaderMap,
        uri: &Uri,
        required: &ScopeRequirement,
    ) -> AuthenticationResponse {
        tracing::debug!(%error, "authentication failed");

        match self.config.redirect.decide(uri, headers, required) {
            RedirectDecision::Abstain => AuthenticationResponse::Abstain { reason: error },
            RedirectDecision::Redirect(location) => {
                AuthenticationResponse::Redirect { location, reason: error }
            }
            RedirectDecision::Exceeded { .. } => AuthenticationResponse::Failure {
                status: StatusCode::UNAUTHORIZED,
                www_authenticate: error.www_authenticate(&self.config.realm),
                reason: error,
            },
            RedirectDecision::NoRedirect => AuthenticationResponse::Failure {
                status: StatusCode::from_u16(error.status_code())
                    .unwrap_or(StatusCode::UNAUTHORIZED),
                www_authenticate: error.www_authenticate(&self.config.realm),
                reason: error,
            },
        }
    }

    /// Whether an outbound request to `uri` would carry the caller's token.
    pub fn is_outbound_supported(&self, uri: &Uri) -> bool {
        self.config.outbound.is_supported(uri)
    }

    /// Headers for an outbound request to `uri` made on behalf of `subject`.
    ///
    /// `None` means the request goes out unchanged.
    pub fn outbound(
        &self,
        subject: Option<&Subject>,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Option<HeaderMap> {
        self.config.outbound.propagate(subject, uri, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::TokenHandler;
    use crate::outbound::OutboundTarget;
    use crate::validator::JwkValidator;
    use axum::http::HeaderValue;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    const SECRET: &[u8] = b"provider-test-secret";

    fn token(claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn provider(configure: impl FnOnce(crate::ProviderConfigBuilder) -> crate::ProviderConfigBuilder) -> OidcProvider {
        let builder = ProviderConfig::builder()
            .client_id("client")
            .authorization_endpoint("https://idp.example.com/authorize")
            .jwk_validator(JwkValidator::from_secret(None, SECRET))
            .realm("test");
        OidcProvider::new(configure(builder).build().unwrap())
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn uri() -> Uri {
        "/orders".parse().unwrap()
    }

    #[tokio::test]
    async fn test_malformed_token_is_401_without_error_code() {
        let provider = provider(|b| b);
        let response = provider
            .authenticate(&bearer("not-a-jwt"), &uri(), &ScopeRequirement::new())
            .await;
        let AuthenticationResponse::Failure { status, www_authenticate, reason } = response else {
            panic!("expected failure");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(www_authenticate, "Bearer realm=\"test\"");
        assert!(matches!(reason, AuthError::MalformedToken { .. }));
    }

    #[tokio::test]
    async fn test_bad_signature_is_invalid_token() {
        let provider = provider(|b| b);
        let forged = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": "u1"}),
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        let response = provider
            .authenticate(&bearer(&forged), &uri(), &ScopeRequirement::new())
            .await;
        let AuthenticationResponse::Failure { status, www_authenticate, .. } = response else {
            panic!("expected failure");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            www_authenticate,
            "Bearer realm=\"test\", error=\"invalid_token\", error_description=\"Token not valid\""
        );
    }

    #[tokio::test]
    async fn test_missing_sub_is_invalid_token() {
        let provider = provider(|b| b);
        let response = provider
            .authenticate(
                &bearer(&token(serde_json::json!({"preferred_username": "x"}))),
                &uri(),
                &ScopeRequirement::new(),
            )
            .await;
        assert_eq!(response.reason(), Some(&AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_issuer_mismatch_is_invalid_token() {
        let provider = provider(|b| b.issuer("https://expected"));
        let response = provider
            .authenticate(
                &bearer(&token(serde_json::json!({"sub": "u1", "iss": "https://other"}))),
                &uri(),
                &ScopeRequirement::new(),
            )
            .await;
        assert_eq!(response.reason(), Some(&AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_optional_abstains_on_invalid_token() {
        let provider = provider(|b| b.optional(true).redirect(true));
        let response = provider
            .authenticate(&bearer("garbage"), &uri(), &ScopeRequirement::new())
            .await;
        assert!(matches!(response, AuthenticationResponse::Abstain { .. }));
    }

    #[tokio::test]
    async fn test_scope_failure_redirect_requests_missing_scope() {
        let provider = provider(|b| b.redirect(true));
        let response = provider
            .authenticate(
                &bearer(&token(serde_json::json!({"sub": "u1", "scope": "read"}))),
                &uri(),
                &ScopeRequirement::one("write"),
            )
            .await;
        let AuthenticationResponse::Redirect { location, reason } = response else {
            panic!("expected redirect");
        };
        assert!(location.contains("scope=openid+write"));
        assert_eq!(
            reason,
            AuthError::InsufficientScope {
                missing: vec!["write".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_exceeded_scope_failure_is_terminal_401() {
        let provider = provider(|b| b.redirect(true).max_redirects(2));
        let response = provider
            .authenticate(
                &bearer(&token(serde_json::json!({"sub": "u1"}))),
                &"/orders?h_ra=2".parse().unwrap(),
                &ScopeRequirement::one("write"),
            )
            .await;
        let AuthenticationResponse::Failure { status, .. } = response else {
            panic!("expected failure");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_outbound_uses_subject_token() {
        let provider = provider(|b| {
            b.outbound_target(
                OutboundTarget::new("backend")
                    .host("backend.internal")
                    .token_handler(TokenHandler::new("x-user-token", None).unwrap()),
            )
        });
        let raw = token(serde_json::json!({"sub": "u1"}));
        let AuthenticationResponse::Success(subject) = provider
            .authenticate(&bearer(&raw), &uri(), &ScopeRequirement::new())
            .await
        else {
            panic!("expected success");
        };

        let target: Uri = "https://backend.internal/api".parse().unwrap();
        assert!(provider.is_outbound_supported(&target));
        let headers = provider
            .outbound(Some(&subject), &target, &HeaderMap::new())
            .unwrap();
        assert_eq!(headers.get("x-user-token").unwrap(), raw.as_str());

        let elsewhere: Uri = "https://other.example.com/".parse().unwrap();
        let headers = provider
            .outbound(Some(&subject), &elsewhere, &HeaderMap::new())
            .unwrap();
        assert_eq!(
            headers.get("authorization").unwrap(),
            format!("Bearer {raw}").as_str()
        );
    }
}
