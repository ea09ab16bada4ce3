//! Tower middleware for inbound authentication and outbound propagation.
//!
//! [`OidcLayer`] guards a server: it authenticates every request through an
//! [`OidcProvider`] and either forwards it with the [`Subject`] in the
//! request extensions, or answers with a redirect or an error.
//!
//! [`PropagateLayer`] sits on an outbound client stack: when a request
//! carries an `Arc<Subject>` extension, the caller's token is attached
//! according to the provider's outbound policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tower::Layer;

use crate::error::AuthError;
use crate::provider::{AuthenticationResponse, OidcProvider};
use crate::scope::{ScopePolicy, ScopeRequirement};
use crate::subject::Subject;

/// Tower layer that authenticates requests with an [`OidcProvider`].
///
/// Required scopes are the union of the layer's [`ScopePolicy`] for the
/// request path and any [`ScopeRequirement`] a route placed in the request
/// extensions.
///
/// # Example
///
/// ```rust
/// use tower_oidc::{JwkValidator, OidcLayer, OidcProvider, ProviderConfig, ScopePolicy};
///
/// let config = ProviderConfig::builder()
///     .client_id("orders")
///     .authorization_endpoint("https://idp.example.com/authorize")
///     .jwk_validator(JwkValidator::from_secret(None, b"secret"))
///     .build()
///     .unwrap();
///
/// let layer = OidcLayer::new(OidcProvider::new(config))
///     .scope_policy(ScopePolicy::new().path_scope("/admin", "admin"))
///     .public_path("/health");
/// ```
#[derive(Debug, Clone)]
pub struct OidcLayer {
    provider: OidcProvider,
    scope_policy: ScopePolicy,
    public_paths: Vec<String>,
}

impl OidcLayer {
    /// The provider's redirect path is public from the start.
    pub fn new(provider: OidcProvider) -> Self {
        let redirect_path = provider.config().redirect().redirect_uri.clone();
        let public_paths = if redirect_path.starts_with('/') {
            vec![redirect_path]
        } else {
            Vec::new()
        };
        Self {
            provider,
            scope_policy: ScopePolicy::new(),
            public_paths,
        }
    }

    /// Set the per-path scope policy.
    pub fn scope_policy(mut self, policy: ScopePolicy) -> Self {
        self.scope_policy = policy;
        self
    }

    /// Add a path that does not require authentication, along with
    /// everything beneath it. `/health` covers `/health/live` but not
    /// `/healthz`.
    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for OidcLayer {
    type Service = OidcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OidcService {
            inner,
            provider: self.provider.clone(),
            scope_policy: self.scope_policy.clone(),
            public_paths: self.public_paths.clone(),
        }
    }
}

/// Tower service created by [`OidcLayer`].
///
/// For each request:
///
/// 1. Public paths are forwarded untouched
/// 2. The provider authenticates the request against the required scopes
/// 3. On success, `Arc<Subject>` is inserted into the request extensions
/// 4. On abstain, the request is forwarded without a subject
/// 5. Otherwise a `307` redirect or a `401`/`403` error is returned
#[derive(Debug, Clone)]
pub struct OidcService<S> {
    inner: S,
    provider: OidcProvider,
    scope_policy: ScopePolicy,
    public_paths: Vec<String>,
}

impl<S> tower_service::Service<Request<Body>> for OidcService<S>
where
    S: tower_service::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<crate::BoxError> + Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let provider = self.provider.clone();
        let public = self
            .public_paths
            .iter()
            .any(|p| path_is_under(req.uri().path(), p));
        let mut required = self.scope_policy.required_for(req.uri().path());
        if let Some(route) = req.extensions().get::<ScopeRequirement>() {
            required = required.merge(route);
        }
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if public {
                return inner.call(req).await;
            }

            let (mut parts, body) = req.into_parts();
            let response = provider
                .authenticate(&parts.headers, &parts.uri, &required)
                .await;

            match response {
                AuthenticationResponse::Success(subject) => {
                    parts.extensions.insert(subject);
                    inner.call(Request::from_parts(parts, body)).await
                }
                AuthenticationResponse::Abstain { reason } => {
                    tracing::trace!(%reason, "provider abstained");
                    inner.call(Request::from_parts(parts, body)).await
                }
                AuthenticationResponse::Redirect { location, .. } => {
                    Ok(redirect_response(&location))
                }
                AuthenticationResponse::Failure {
                    status,
                    www_authenticate,
                    reason,
                } => Ok(error_response(status, &www_authenticate, &reason)),
            }
        })
    }
}

fn redirect_response(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "redirect location is not a valid header value");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Build an HTTP error response with the `WWW-Authenticate` header and a
/// JSON body.
fn error_response(status: StatusCode, www_authenticate: &str, error: &AuthError) -> Response {
    let body = serde_json::json!({
        "error": error.error_code().unwrap_or("unauthorized"),
        "error_description": error.to_string(),
    });

    let mut response = (status, axum::Json(body)).into_response();
    let value = HeaderValue::from_str(www_authenticate)
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer"));
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, value);
    response
}

/// Tower layer that propagates the caller's token on outbound requests.
///
/// The outbound request must carry the caller's `Arc<Subject>` extension;
/// requests without one pass through unchanged.
#[derive(Debug, Clone)]
pub struct PropagateLayer {
    provider: OidcProvider,
}

impl PropagateLayer {
    pub fn new(provider: OidcProvider) -> Self {
        Self { provider }
    }
}

impl<S> Layer<S> for PropagateLayer {
    type Service = PropagateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PropagateService {
            inner,
            provider: self.provider.clone(),
        }
    }
}

/// Tower service created by [`PropagateLayer`].
#[derive(Debug, Clone)]
pub struct PropagateService<S> {
    inner: S,
    provider: OidcProvider,
}

impl<S, B> tower_service::Service<Request<B>> for PropagateService<S>
where
    S: tower_service::Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let subject = req.extensions().get::<Arc<Subject>>().cloned();
        if let Some(headers) =
            self.provider
                .outbound(subject.as_deref(), req.uri(), req.headers())
        {
            *req.headers_mut() = headers;
        }
        self.inner.call(req)
    }
}

/// `path` is `prefix` itself or lies beneath it.
fn path_is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
