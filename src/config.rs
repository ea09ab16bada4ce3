//! Provider configuration.
//!
//! A [`ProviderConfig`] is assembled once at startup, either through the
//! fluent [`ProviderConfigBuilder`] or from deserialized
//! [`ProviderSettings`], and is read-only afterwards. [`build`] is the only
//! place the provider can fail hard: mandatory fields are checked there and
//! every URI is parsed up front.
//!
//! [`build`]: ProviderConfigBuilder::build
//!
//! # Example
//!
//! ```rust
//! use tower_oidc::{JwkValidator, ProviderConfig};
//!
//! let config = ProviderConfig::builder()
//!     .client_id("my-service")
//!     .authorization_endpoint("https://idp.example.com/oauth2/authorize")
//!     .jwk_validator(JwkValidator::from_secret(None, b"signing-secret"))
//!     .realm("orders")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.realm(), "orders");
//! ```

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::locator::{CookieHandler, PlainCookie, TokenHandler, TokenLocator};
use crate::outbound::{OutboundPropagator, OutboundTarget};
use crate::redirect::{RedirectFlow, ScopeFormat};
use crate::secret::SecretString;
use crate::token::ClaimExpectations;
use crate::validator::{JwkValidator, Validator};

pub const DEFAULT_REALM: &str = "oidc";
pub const DEFAULT_BASE_SCOPES: &str = "openid";
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_REDIRECT_URI: &str = "/oidc/redirect";
pub const DEFAULT_ATTEMPT_PARAM: &str = "h_ra";
pub const DEFAULT_QUERY_PARAM: &str = "access_token";
pub const DEFAULT_COOKIE_NAME: &str = "JSESSIONID";
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Immutable, validated provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub(crate) client_id: String,
    pub(crate) realm: String,
    pub(crate) optional: bool,
    pub(crate) use_jwt_groups: bool,
    pub(crate) locator: TokenLocator,
    pub(crate) validator: Validator,
    pub(crate) expectations: ClaimExpectations,
    pub(crate) redirect: RedirectFlow,
    pub(crate) outbound: OutboundPropagator,
}

impl ProviderConfig {
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Build from deserialized settings.
    pub fn from_settings(settings: ProviderSettings) -> Result<Self, ConfigError> {
        settings.into_builder()?.build()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    pub fn use_jwt_groups(&self) -> bool {
        self.use_jwt_groups
    }

    /// Effective propagation switch: configured and at least one target.
    pub fn propagate(&self) -> bool {
        self.outbound.is_enabled()
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn locator(&self) -> &TokenLocator {
        &self.locator
    }

    pub fn redirect(&self) -> &RedirectFlow {
        &self.redirect
    }

    pub fn outbound(&self) -> &OutboundPropagator {
        &self.outbound
    }

    pub fn claim_expectations(&self) -> &ClaimExpectations {
        &self.expectations
    }
}

/// Builder for [`ProviderConfig`].
#[derive(Clone)]
pub struct ProviderConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    authorization_endpoint: Option<String>,
    jwk_validator: Option<JwkValidator>,
    jwk_set: Option<JwkSet>,
    validate_with_jwk: bool,
    introspection_endpoint: Option<String>,
    #[cfg(feature = "introspection")]
    http_client: Option<reqwest::Client>,
    issuer: Option<String>,
    audience: Option<String>,
    leeway: Duration,
    header_token: Option<TokenHandler>,
    query_param: Option<String>,
    cookie: Option<Arc<dyn CookieHandler>>,
    base_scopes: String,
    scope_audience: Option<String>,
    redirect: bool,
    max_redirects: u32,
    redirect_uri: String,
    frontend_uri: Option<String>,
    attempt_param: String,
    realm: String,
    optional: bool,
    use_jwt_groups: bool,
    propagate: Option<bool>,
    outbound_handler: TokenHandler,
    outbound_targets: Vec<OutboundTarget>,
}

impl Default for ProviderConfigBuilder {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authorization_endpoint: None,
            jwk_validator: None,
            jwk_set: None,
            validate_with_jwk: true,
            introspection_endpoint: None,
            #[cfg(feature = "introspection")]
            http_client: None,
            issuer: None,
            audience: None,
            leeway: DEFAULT_LEEWAY,
            header_token: Some(TokenHandler::bearer()),
            query_param: None,
            cookie: Some(Arc::new(PlainCookie::new(DEFAULT_COOKIE_NAME))),
            base_scopes: DEFAULT_BASE_SCOPES.to_string(),
            scope_audience: None,
            redirect: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            frontend_uri: None,
            attempt_param: DEFAULT_ATTEMPT_PARAM.to_string(),
            realm: DEFAULT_REALM.to_string(),
            optional: false,
            use_jwt_groups: true,
            propagate: None,
            outbound_handler: TokenHandler::bearer(),
            outbound_targets: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ProviderConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfigBuilder")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("validate_with_jwk", &self.validate_with_jwk)
            .field("introspection_endpoint", &self.introspection_endpoint)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl ProviderConfigBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Client secret used to authenticate introspection calls.
    pub fn client_secret(mut self, secret: impl Into<SecretString>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// The identity provider's authorization endpoint, target of redirects.
    pub fn authorization_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.authorization_endpoint = Some(uri.into());
        self
    }

    /// Validate signatures locally with this key set.
    pub fn jwk_set(mut self, set: JwkSet) -> Self {
        self.jwk_set = Some(set);
        self.validate_with_jwk = true;
        self
    }

    /// Validate signatures locally with prepared keys.
    pub fn jwk_validator(mut self, validator: JwkValidator) -> Self {
        self.jwk_validator = Some(validator);
        self.validate_with_jwk = true;
        self
    }

    /// Validate tokens remotely at this introspection endpoint.
    pub fn introspection_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.introspection_endpoint = Some(uri.into());
        self.validate_with_jwk = false;
        self
    }

    /// Choose between local (`true`) and introspection (`false`) validation.
    pub fn validate_with_jwk(mut self, jwk: bool) -> Self {
        self.validate_with_jwk = jwk;
        self
    }

    /// HTTP client for introspection calls. Owns timeout policy.
    #[cfg(feature = "introspection")]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Expected `iss` claim.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Expected entry in the `aud` claim.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Clock skew tolerated on `exp` and `nbf`.
    pub fn clock_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Header token location, or `None` to disable it.
    pub fn header_token(mut self, handler: Option<TokenHandler>) -> Self {
        self.header_token = handler;
        self
    }

    /// Query parameter token location, or `None` to disable it.
    pub fn query_param(mut self, name: Option<&str>) -> Self {
        self.query_param = name.map(String::from);
        self
    }

    /// Cookie token location, or `None` to disable it.
    pub fn cookie(mut self, handler: Option<Arc<dyn CookieHandler>>) -> Self {
        self.cookie = handler;
        self
    }

    /// Space-separated scopes requested on every redirect.
    pub fn base_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.base_scopes = scopes.into();
        self
    }

    /// Audience prefixed to each required scope in redirects.
    pub fn scope_audience(mut self, audience: impl Into<String>) -> Self {
        self.scope_audience = Some(audience.into());
        self
    }

    /// Redirect failed requests to the authorization endpoint.
    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Path (or absolute URI) the identity provider redirects back to.
    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Public base URI used when the request carries no host.
    pub fn frontend_uri(mut self, uri: impl Into<String>) -> Self {
        self.frontend_uri = Some(uri.into());
        self
    }

    /// Query parameter carrying the redirect attempt counter.
    pub fn redirect_attempt_param(mut self, name: impl Into<String>) -> Self {
        self.attempt_param = name.into();
        self
    }

    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Abstain instead of failing when authentication does not succeed.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// Turn the `groups` claim into role grants.
    pub fn use_jwt_groups(mut self, use_groups: bool) -> Self {
        self.use_jwt_groups = use_groups;
        self
    }

    /// Global propagation switch. Defaults to "any outbound target configured".
    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = Some(propagate);
        self
    }

    /// Header used for targets without their own handler.
    pub fn outbound_token_handler(mut self, handler: TokenHandler) -> Self {
        self.outbound_handler = handler;
        self
    }

    pub fn outbound_target(mut self, target: OutboundTarget) -> Self {
        self.outbound_targets.push(target);
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<ProviderConfig, ConfigError> {
        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing("client-id"))?;
        let authorization_endpoint = self
            .authorization_endpoint
            .ok_or(ConfigError::Missing("authorization-endpoint-uri"))?;
        check_uri("authorization-endpoint-uri", &authorization_endpoint)?;
        if let Some(frontend) = &self.frontend_uri {
            check_uri("frontend-uri", frontend)?;
        }

        let validator = if self.validate_with_jwk {
            let jwk = match (self.jwk_validator, &self.jwk_set) {
                (Some(validator), _) => validator,
                (None, Some(set)) => JwkValidator::from_jwk_set(set)?,
                (None, None) => return Err(ConfigError::NoSigningKeys),
            };
            if jwk.key_count() == 0 {
                return Err(ConfigError::NoSigningKeys);
            }
            Validator::Jwk(jwk)
        } else {
            let uri = self
                .introspection_endpoint
                .ok_or(ConfigError::Missing("introspection-endpoint-uri"))?;
            check_uri("introspection-endpoint-uri", &uri)?;
            #[cfg(feature = "introspection")]
            let validator =
                introspection_validator(uri, &client_id, self.client_secret, self.http_client);
            #[cfg(not(feature = "introspection"))]
            let validator: Result<Validator, ConfigError> = {
                let _ = (uri, self.client_secret);
                Err(ConfigError::IntrospectionUnavailable)
            };
            validator?
        };

        let mut locator = TokenLocator::new();
        if let Some(handler) = self.header_token {
            locator = locator.header(handler);
        }
        if let Some(param) = self.query_param.filter(|p| !p.is_empty()) {
            locator = locator.query_param(param);
        }
        if let Some(cookie) = self.cookie {
            locator = locator.cookie(cookie);
        }
        if locator.is_empty() {
            return Err(ConfigError::NoTokenLocation);
        }

        let propagate = self
            .propagate
            .unwrap_or(!self.outbound_targets.is_empty())
            && !self.outbound_targets.is_empty();

        let redirect = RedirectFlow {
            enabled: self.redirect,
            optional: self.optional,
            max_redirects: self.max_redirects,
            authorization_endpoint,
            client_id: client_id.clone(),
            base_scopes: self.base_scopes.trim().to_string(),
            scope_format: ScopeFormat::new(self.scope_audience.as_deref()),
            redirect_uri: self.redirect_uri,
            frontend_uri: self.frontend_uri,
            attempt_param: self.attempt_param,
        };

        tracing::debug!(
            client_id = %client_id,
            realm = %self.realm,
            redirect = self.redirect,
            optional = self.optional,
            propagate,
            "OIDC provider configured"
        );

        Ok(ProviderConfig {
            client_id,
            realm: self.realm,
            optional: self.optional,
            use_jwt_groups: self.use_jwt_groups,
            locator,
            validator,
            expectations: ClaimExpectations {
                issuer: self.issuer,
                audience: self.audience,
                leeway: self.leeway.as_secs(),
            },
            redirect,
            outbound: OutboundPropagator::new(
                propagate,
                self.outbound_targets,
                self.outbound_handler,
            ),
        })
    }
}

fn check_uri(field: &'static str, uri: &str) -> Result<(), ConfigError> {
    url::Url::parse(uri)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidUri { field, source })
}

#[cfg(feature = "introspection")]
fn introspection_validator(
    uri: String,
    client_id: &str,
    client_secret: Option<SecretString>,
    client: Option<reqwest::Client>,
) -> Result<Validator, ConfigError> {
    let mut validator =
        crate::validator::IntrospectionValidator::new(client.unwrap_or_default(), uri);
    if let Some(secret) = client_secret {
        validator = validator.client_credentials(client_id, secret);
    }
    Ok(Validator::Introspection(validator))
}

/// Serde form of the configuration, with kebab-case keys.
///
/// ```rust
/// use tower_oidc::{ProviderConfig, ProviderSettings};
///
/// let settings: ProviderSettings = serde_json::from_value(serde_json::json!({
///     "client-id": "my-service",
///     "authorization-endpoint-uri": "https://idp.example.com/authorize",
///     "jwk": { "keys": [{ "kty": "oct", "kid": "k1", "alg": "HS256", "k": "c2VjcmV0" }] },
///     "redirect": true,
///     "outbound": [{ "name": "backend", "hosts": ["*.internal"] }]
/// }))
/// .unwrap();
///
/// let config = ProviderConfig::from_settings(settings).unwrap();
/// assert!(config.propagate());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub authorization_endpoint_uri: Option<String>,
    pub introspection_endpoint_uri: Option<String>,
    pub validate_with_jwk: Option<bool>,
    pub jwk: Option<JwkSet>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub clock_leeway_seconds: Option<u64>,
    pub header_use: Option<bool>,
    pub header_token: Option<TokenSettings>,
    pub query_param_use: Option<bool>,
    pub query_param_name: Option<String>,
    pub cookie_use: Option<bool>,
    pub cookie_name: Option<String>,
    pub base_scopes: Option<String>,
    pub scope_audience: Option<String>,
    pub redirect: Option<bool>,
    pub max_redirects: Option<u32>,
    pub redirect_uri: Option<String>,
    pub frontend_uri: Option<String>,
    pub redirect_attempt_param: Option<String>,
    pub realm: Option<String>,
    pub optional: Option<bool>,
    pub use_jwt_groups: Option<bool>,
    pub propagate: Option<bool>,
    pub outbound: Vec<OutboundSettings>,
}

/// Header name and prefix of a token handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenSettings {
    pub header: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl TokenSettings {
    fn handler(&self) -> Result<TokenHandler, ConfigError> {
        TokenHandler::new(&self.header, self.prefix.as_deref())
    }
}

/// One outbound target rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutboundSettings {
    pub name: String,
    #[serde(default)]
    pub transports: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub propagate: Option<bool>,
    #[serde(default)]
    pub token: Option<TokenSettings>,
}

impl OutboundSettings {
    fn target(&self) -> Result<OutboundTarget, ConfigError> {
        let mut target = OutboundTarget::new(&self.name).propagate(self.propagate.unwrap_or(true));
        for transport in &self.transports {
            target = target.transport(transport);
        }
        for host in &self.hosts {
            target = target.host(host);
        }
        for path in &self.paths {
            target = target.path(path);
        }
        if let Some(token) = &self.token {
            target = target.token_handler(token.handler()?);
        }
        Ok(target)
    }
}

impl ProviderSettings {
    /// Apply the settings over the builder defaults.
    pub fn into_builder(self) -> Result<ProviderConfigBuilder, ConfigError> {
        let mut builder = ProviderConfig::builder();

        if let Some(v) = self.client_id {
            builder = builder.client_id(v);
        }
        if let Some(v) = self.client_secret {
            builder = builder.client_secret(v);
        }
        if let Some(v) = self.authorization_endpoint_uri {
            builder = builder.authorization_endpoint(v);
        }
        if let Some(v) = self.jwk {
            builder = builder.jwk_set(v);
        }
        if let Some(v) = self.introspection_endpoint_uri {
            builder = builder.introspection_endpoint(v);
        }
        if let Some(v) = self.validate_with_jwk {
            builder = builder.validate_with_jwk(v);
        }
        if let Some(v) = self.issuer {
            builder = builder.issuer(v);
        }
        if let Some(v) = self.audience {
            builder = builder.audience(v);
        }
        if let Some(v) = self.clock_leeway_seconds {
            builder = builder.clock_leeway(Duration::from_secs(v));
        }

        let header = match (self.header_use.unwrap_or(true), &self.header_token) {
            (false, _) => None,
            (true, Some(token)) => Some(token.handler()?),
            (true, None) => Some(TokenHandler::bearer()),
        };
        builder = builder.header_token(header);

        if self.query_param_use.unwrap_or(false) {
            let name = self.query_param_name.as_deref().unwrap_or(DEFAULT_QUERY_PARAM);
            builder = builder.query_param(Some(name));
        }

        if self.cookie_use.unwrap_or(true) {
            let name = self.cookie_name.as_deref().unwrap_or(DEFAULT_COOKIE_NAME);
            builder = builder.cookie(Some(Arc::new(PlainCookie::new(name))));
        } else {
            builder = builder.cookie(None);
        }

        if let Some(v) = self.base_scopes {
            builder = builder.base_scopes(v);
        }
        if let Some(v) = self.scope_audience {
            builder = builder.scope_audience(v);
        }
        if let Some(v) = self.redirect {
            builder = builder.redirect(v);
        }
        if let Some(v) = self.max_redirects {
            builder = builder.max_redirects(v);
        }
        if let Some(v) = self.redirect_uri {
            builder = builder.redirect_uri(v);
        }
        if let Some(v) = self.frontend_uri {
            builder = builder.frontend_uri(v);
        }
        if let Some(v) = self.redirect_attempt_param {
            builder = builder.redirect_attempt_param(v);
        }
        if let Some(v) = self.realm {
            builder = builder.realm(v);
        }
        if let Some(v) = self.optional {
            builder = builder.optional(v);
        }
        if let Some(v) = self.use_jwt_groups {
            builder = builder.use_jwt_groups(v);
        }
        if let Some(v) = self.propagate {
            builder = builder.propagate(v);
        }
        for target in &self.outbound {
            builder = builder.outbound_target(target.target()?);
        }

        Ok(builder)
    }
}
