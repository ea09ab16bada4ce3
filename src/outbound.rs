//! Outbound token propagation.
//!
//! When a service calls another service on behalf of an authenticated
//! caller, the caller's token can be re-attached to the outbound request.
//! Which outbound calls get the token, and in which header, is decided per
//! [`OutboundTarget`]. The resulting [`TargetPolicy`] is computed once per
//! target and cached for the life of the process.

use std::sync::Arc;

use axum::http::{HeaderMap, Uri};
use dashmap::DashMap;

use crate::locator::TokenHandler;
use crate::subject::Subject;

/// A configured outbound destination.
///
/// Empty `transports`, `hosts` or `paths` match anything.
#[derive(Debug, Clone)]
pub struct OutboundTarget {
    name: String,
    transports: Vec<String>,
    hosts: Vec<String>,
    paths: Vec<String>,
    propagate: bool,
    handler: Option<TokenHandler>,
}

impl OutboundTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transports: Vec::new(),
            hosts: Vec::new(),
            paths: Vec::new(),
            propagate: true,
            handler: None,
        }
    }

    /// Match only this URI scheme, e.g. `https`.
    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transports.push(transport.into().to_ascii_lowercase());
        self
    }

    /// Match this host. `*.example.com` matches any subdomain.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into().to_ascii_lowercase());
        self
    }

    /// Match paths starting with `prefix`.
    pub fn path(mut self, prefix: impl Into<String>) -> Self {
        self.paths.push(prefix.into());
        self
    }

    /// Disable propagation to this target.
    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    /// Header and prefix used for this target instead of the default.
    pub fn token_handler(mut self, handler: TokenHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether an outbound request to `uri` goes to this target.
    pub fn matches(&self, uri: &Uri) -> bool {
        let transport_ok = self.transports.is_empty()
            || uri
                .scheme_str()
                .is_some_and(|s| self.transports.iter().any(|t| t.eq_ignore_ascii_case(s)));

        let host_ok = self.hosts.is_empty()
            || uri.host().is_some_and(|host| {
                let host = host.to_ascii_lowercase();
                self.hosts.iter().any(|pattern| host_matches(pattern, &host))
            });

        let path_ok = self.paths.is_empty()
            || self.paths.iter().any(|prefix| uri.path().starts_with(prefix.as_str()));

        transport_ok && host_ok && path_ok
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(domain) => host
            .strip_suffix(domain)
            .is_some_and(|sub| sub.len() > 1 && sub.ends_with('.')),
        None => pattern == "*" || pattern == host,
    }
}

/// How the token is propagated to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPolicy {
    pub propagate: bool,
    pub handler: TokenHandler,
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self {
            propagate: true,
            handler: TokenHandler::bearer(),
        }
    }
}

/// Attaches the caller's token to outbound requests.
///
/// Cheap to clone; clones share the policy cache.
#[derive(Debug, Clone)]
pub struct OutboundPropagator {
    enabled: bool,
    targets: Arc<Vec<OutboundTarget>>,
    default_policy: Arc<TargetPolicy>,
    /// Keyed by position in `targets`; names need not be unique.
    cache: Arc<DashMap<usize, Arc<TargetPolicy>>>,
}

impl OutboundPropagator {
    /// `enabled` is the global switch; with it off nothing is ever propagated.
    pub fn new(enabled: bool, targets: Vec<OutboundTarget>, default_handler: TokenHandler) -> Self {
        Self {
            enabled,
            targets: Arc::new(targets),
            default_policy: Arc::new(TargetPolicy {
                propagate: true,
                handler: default_handler,
            }),
            cache: Arc::new(DashMap::new()),
        }
    }

    /// A propagator that never attaches anything.
    pub fn disabled() -> Self {
        Self::new(false, Vec::new(), TokenHandler::bearer())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn targets(&self) -> &[OutboundTarget] {
        &self.targets
    }

    /// The policy for an outbound request to `uri`.
    ///
    /// The first matching target wins. Requests matching no target get the
    /// default policy.
    pub fn policy_for(&self, uri: &Uri) -> Arc<TargetPolicy> {
        match self.targets.iter().position(|t| t.matches(uri)) {
            Some(index) => self.target_policy(index),
            None => Arc::clone(&self.default_policy),
        }
    }

    fn target_policy(&self, index: usize) -> Arc<TargetPolicy> {
        let target = &self.targets[index];
        let policy = self
            .cache
            .entry(index)
            .or_insert_with(|| {
                tracing::trace!(target = %target.name, index, "computing outbound policy");
                Arc::new(TargetPolicy {
                    propagate: target.propagate,
                    handler: target
                        .handler
                        .clone()
                        .unwrap_or_else(|| self.default_policy.handler.clone()),
                })
            });
        Arc::clone(policy.value())
    }

    /// Whether a request to `uri` would have the token attached.
    pub fn is_supported(&self, uri: &Uri) -> bool {
        self.enabled && self.policy_for(uri).propagate
    }

    /// The headers to send to `uri`, or `None` to leave the request unchanged.
    ///
    /// Returns a copy of `headers` with the subject's token attached.
    pub fn propagate(
        &self,
        subject: Option<&Subject>,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Option<HeaderMap> {
        if !self.enabled {
            return None;
        }
        let credential = subject?.credential()?;

        let policy = self.policy_for(uri);
        if !policy.propagate {
            tracing::trace!(%uri, "propagation disabled for target");
            return None;
        }

        let mut headers = headers.clone();
        match policy.handler.attach(&mut headers, credential.token.expose()) {
            Ok(()) => {
                tracing::debug!(header = %policy.handler.header(), %uri, "propagating token");
                Some(headers)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token cannot be sent as a header value");
                None
            }
        }
    }
}
