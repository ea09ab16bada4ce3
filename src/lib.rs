//! # tower-oidc
//!
//! Tower-native OpenID Connect bearer-token authentication and outbound
//! credential propagation.
//!
//! An [`OidcProvider`] takes an inbound HTTP request and:
//!
//! - locates a token in the `Authorization` header or a cookie, optionally
//!   also in a query parameter
//! - validates it, either locally against a JSON Web Key Set
//!   ([`JwkValidator`]) or remotely at an introspection endpoint
//!   ([`IntrospectionValidator`])
//! - checks issuer, audience, expiry and not-before
//! - builds a [`Subject`] and checks the endpoint's required scopes
//! - on failure, redirects to the identity provider's authorization endpoint
//!   (with a bounded attempt counter), abstains, or answers `401`/`403`
//!
//! Once a caller is authenticated, the same provider re-attaches their token
//! to outbound requests made on their behalf, per configured target.
//!
//! ## Quick Start
//!
//! ```rust
//! use tower_oidc::{JwkValidator, OidcLayer, OidcProvider, ProviderConfig, ScopePolicy};
//!
//! # fn main() -> Result<(), tower_oidc::ConfigError> {
//! let config = ProviderConfig::builder()
//!     .client_id("orders-service")
//!     .authorization_endpoint("https://idp.example.com/oauth2/authorize")
//!     .jwk_validator(JwkValidator::from_secret(Some("k1"), b"signing-secret"))
//!     .issuer("https://idp.example.com")
//!     .redirect(true)
//!     .build()?;
//!
//! let provider = OidcProvider::new(config);
//!
//! // Use with any tower stack, e.g. `axum::Router::layer`.
//! let layer = OidcLayer::new(provider)
//!     .scope_policy(ScopePolicy::new().default_scope("orders:read"))
//!     .public_path("/health");
//! # let _ = layer;
//! # Ok(())
//! # }
//! ```
//!
//! Handlers read the authenticated caller from the request extensions as
//! `Arc<Subject>`.
//!
//! ## Key Types
//!
//! - [`ProviderConfig`] - Validated, immutable provider configuration
//! - [`OidcProvider`] - Inbound authentication and outbound propagation
//! - [`OidcLayer`] - Tower middleware guarding a server
//! - [`PropagateLayer`] - Tower middleware for outbound client stacks
//! - [`Subject`] - The authenticated caller, its grants and token
//! - [`ScopeRequirement`] / [`ScopePolicy`] - Required scopes per endpoint
//!
//! ## Feature Flags
//!
//! - `introspection` (default) - Remote validation via [`IntrospectionValidator`]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod locator;
pub mod middleware;
pub mod outbound;
pub mod provider;
pub mod redirect;
pub mod scope;
pub mod secret;
pub mod subject;
pub mod token;
pub mod validator;

// Re-exports
pub use config::{
    OutboundSettings, ProviderConfig, ProviderConfigBuilder, ProviderSettings, TokenSettings,
};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{AuthError, BoxError, ConfigError};
pub use locator::{
    CookieError, CookieHandler, PlainCookie, RawToken, TokenHandler, TokenLocation, TokenLocator,
};
pub use middleware::{OidcLayer, OidcService, PropagateLayer, PropagateService};
pub use outbound::{OutboundPropagator, OutboundTarget, TargetPolicy};
pub use provider::{AuthenticationResponse, OidcProvider};
pub use redirect::{RedirectDecision, RedirectFlow, RedirectState, ScopeFormat};
pub use scope::{ScopePolicy, ScopeRequirement};
pub use secret::SecretString;
pub use subject::{Grant, MissingSubject, Principal, Subject, TokenCredential};
pub use token::{ClaimExpectations, SignedToken, TokenClaims, TokenParseError};
pub use validator::{JwkValidator, TokenValidator, ValidationVerdict, Validator, verify};

#[cfg(feature = "introspection")]
pub use validator::IntrospectionValidator;
