//! Authorization-code redirect with loop protection.
//!
//! When authentication fails and redirects are enabled, the caller is sent to
//! the identity provider's authorization endpoint. The original URI travels
//! in `state`, carrying a redirect-attempt counter as a query parameter
//! (`h_ra` by default). When the identity provider sends the caller back to
//! that URI and authentication fails again, the counter tells the provider
//! how many times it already tried; at the configured maximum it stops
//! redirecting and answers with an error instead.

use axum::http::{HeaderMap, Uri};
use url::form_urlencoded;

use crate::scope::ScopeRequirement;

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// How a required scope is rendered in the `scope` request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFormat {
    /// The scope as is.
    Plain,
    /// The scope prefixed with an audience that ends with `/`.
    Audience(String),
}

impl ScopeFormat {
    /// Chosen once from the configured scope audience.
    pub fn new(audience: Option<&str>) -> Self {
        match audience.map(str::trim).filter(|a| !a.is_empty()) {
            None => ScopeFormat::Plain,
            Some(a) if a.ends_with('/') => ScopeFormat::Audience(a.to_string()),
            Some(a) => ScopeFormat::Audience(format!("{a}/")),
        }
    }

    /// Render one scope; a leading `/` is stripped first.
    pub fn format(&self, scope: &str) -> String {
        let scope = scope.strip_prefix('/').unwrap_or(scope);
        match self {
            ScopeFormat::Plain => scope.to_string(),
            ScopeFormat::Audience(audience) => format!("{audience}{scope}"),
        }
    }
}

/// The original URI and how many redirects already happened for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectState {
    pub original_uri: String,
    pub attempt: u32,
}

fn parse_attempt(value: &str) -> Option<u32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(value.parse::<u32>().unwrap_or(u32::MAX))
}

impl RedirectState {
    /// Read the attempt counter from `original_uri`.
    ///
    /// An absent or unparsable counter counts as attempt 1. A counter too
    /// large for `u32` saturates.
    pub fn from_uri(original_uri: &str, attempt_param: &str) -> Self {
        let attempt = original_uri
            .split_once('?')
            .and_then(|(_, query)| {
                form_urlencoded::parse(query.as_bytes())
                    .find(|(k, _)| k == attempt_param)
                    .and_then(|(_, v)| parse_attempt(&v))
            })
            .unwrap_or(1);
        Self {
            original_uri: original_uri.to_string(),
            attempt,
        }
    }

    /// The URI to come back to, with the counter set to `attempt + 1`.
    pub fn next_uri(&self, attempt_param: &str) -> String {
        let (path, query) = self
            .original_uri
            .split_once('?')
            .unwrap_or((&self.original_uri, ""));

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            if k != attempt_param {
                serializer.append_pair(&k, &v);
            }
        }
        serializer.append_pair(attempt_param, &self.attempt.saturating_add(1).to_string());

        format!("{path}?{}", serializer.finish())
    }
}

/// What to do with a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Send the caller to this `Location`.
    Redirect(String),
    /// Redirects are disabled; answer with the error response.
    NoRedirect,
    /// The attempt counter reached the maximum; answer with a terminal 401.
    Exceeded { attempt: u32 },
    /// Let other providers or anonymous access proceed.
    Abstain,
}

/// Builds authorization redirects from provider configuration.
#[derive(Debug, Clone)]
pub struct RedirectFlow {
    pub(crate) enabled: bool,
    pub(crate) optional: bool,
    pub(crate) max_redirects: u32,
    pub(crate) authorization_endpoint: String,
    pub(crate) client_id: String,
    pub(crate) base_scopes: String,
    pub(crate) scope_format: ScopeFormat,
    pub(crate) redirect_uri: String,
    pub(crate) frontend_uri: Option<String>,
    pub(crate) attempt_param: String,
}

impl RedirectFlow {
    /// Decide how to answer a failed request to `uri`.
    pub fn decide(&self, uri: &Uri, headers: &HeaderMap, required: &ScopeRequirement) -> RedirectDecision {
        if self.optional {
            return RedirectDecision::Abstain;
        }
        if !self.enabled {
            return RedirectDecision::NoRedirect;
        }

        let original = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let state = RedirectState::from_uri(original, &self.attempt_param);
        if state.attempt >= self.max_redirects {
            tracing::debug!(
                attempt = state.attempt,
                max = self.max_redirects,
                "redirect limit reached, not redirecting"
            );
            return RedirectDecision::Exceeded {
                attempt: state.attempt,
            };
        }

        RedirectDecision::Redirect(self.location(&state, uri, headers, required))
    }

    /// The `scope` parameter: base scopes, then each required scope.
    pub fn scope_string(&self, required: &ScopeRequirement) -> String {
        let mut scopes = self.base_scopes.clone();
        for scope in required.required_scopes() {
            if !scopes.is_empty() {
                scopes.push(' ');
            }
            scopes.push_str(&self.scope_format.format(scope));
        }
        scopes
    }

    /// Where the identity provider sends the caller back to.
    ///
    /// Absolute configured URIs are used as is. Otherwise the host comes from
    /// `X-Forwarded-Host` or `Host`, falling back to the frontend URI.
    pub fn redirect_uri(&self, uri: &Uri, headers: &HeaderMap) -> String {
        if self.redirect_uri.starts_with("http://") || self.redirect_uri.starts_with("https://") {
            return self.redirect_uri.clone();
        }

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let host = header(X_FORWARDED_HOST)
            .or_else(|| header(axum::http::header::HOST.as_str()))
            .or_else(|| uri.authority().map(|a| a.as_str()));

        match (host, &self.frontend_uri) {
            (Some(host), _) => {
                let scheme = header(X_FORWARDED_PROTO)
                    .or_else(|| uri.scheme_str())
                    .unwrap_or("http");
                format!("{scheme}://{host}{}", self.redirect_uri)
            }
            (None, Some(frontend)) => {
                format!("{}{}", frontend.trim_end_matches('/'), self.redirect_uri)
            }
            (None, None) => self.redirect_uri.clone(),
        }
    }

    fn location(
        &self,
        state: &RedirectState,
        uri: &Uri,
        headers: &HeaderMap,
        required: &ScopeRequirement,
    ) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        let separator = if self.authorization_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };

        format!(
            "{}{separator}client_id={}&response_type=code&redirect_uri={}&scope={}&nonce={nonce}&state={}",
            self.authorization_endpoint,
            encode(&self.client_id),
            encode(&self.redirect_uri(uri, headers)),
            encode(&self.scope_string(required)),
            encode(&state.next_uri(&self.attempt_param)),
        )
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
