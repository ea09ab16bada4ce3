//! Scope requirements and per-path scope policy.
//!
//! An endpoint's required scopes are gathered outside the provider: either a
//! route inserts a [`ScopeRequirement`] into the request extensions, or the
//! [`OidcLayer`](crate::OidcLayer) derives one from its [`ScopePolicy`].
//! Authorization is plain set containment against the subject's scope
//! grants, with no hierarchical matching.

use std::collections::BTreeSet;

use crate::error::AuthError;
use crate::subject::Subject;

/// A set of required OAuth scopes for an endpoint.
///
/// All scopes must be granted for access (AND semantics).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeRequirement {
    required: BTreeSet<String>,
}

impl ScopeRequirement {
    /// Create an empty scope requirement (no scopes needed).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn one(scope: impl Into<String>) -> Self {
        Self::new().require(scope)
    }

    pub fn all(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            required: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn require(mut self, scope: impl Into<String>) -> Self {
        self.required.insert(scope.into());
        self
    }

    /// Union of both requirements.
    pub fn merge(mut self, other: &ScopeRequirement) -> Self {
        self.required.extend(other.required.iter().cloned());
        self
    }

    /// Required scopes the subject was not granted, sorted.
    pub fn missing(&self, subject: &Subject) -> Vec<String> {
        self.required
            .iter()
            .filter(|scope| !subject.has_scope(scope))
            .cloned()
            .collect()
    }

    /// Check the subject's scope grants against this requirement.
    ///
    /// Returns `Err(AuthError::InsufficientScope)` naming exactly the
    /// missing scopes.
    pub fn check(&self, subject: &Subject) -> Result<(), AuthError> {
        let missing = self.missing(subject);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope { missing })
        }
    }

    pub fn required_scopes(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }
}

/// Maps request paths to required scopes.
///
/// Every matching path prefix contributes its scopes, on top of the default
/// scopes.
///
/// # Example
///
/// ```rust
/// use tower_oidc::ScopePolicy;
///
/// let policy = ScopePolicy::new()
///     .default_scope("read")
///     .path_scope("/admin", "admin");
///
/// assert_eq!(policy.required_for("/admin/users").required_scopes().len(), 2);
/// assert_eq!(policy.required_for("/public").required_scopes().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopePolicy {
    default_scopes: ScopeRequirement,
    path_scopes: Vec<(String, ScopeRequirement)>,
}

impl ScopePolicy {
    /// Create an empty scope policy (no scopes required for anything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scope required on every path.
    pub fn default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scopes = self.default_scopes.require(scope);
        self
    }

    /// Add a scope required on paths starting with `prefix`.
    pub fn path_scope(mut self, prefix: impl Into<String>, scope: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if let Some((_, req)) = self.path_scopes.iter_mut().find(|(p, _)| *p == prefix) {
            req.required.insert(scope.into());
        } else {
            self.path_scopes.push((prefix, ScopeRequirement::one(scope)));
        }
        self
    }

    /// The scopes required for `path`.
    pub fn required_for(&self, path: &str) -> ScopeRequirement {
        self.path_scopes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .fold(self.default_scopes.clone(), |acc, (_, req)| acc.merge(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{Grant, Principal};

    fn subject_with_scopes(scopes: &[&str]) -> Subject {
        scopes.iter().fold(
            Subject::new(Principal {
                name: "user".to_string(),
                id: "user".to_string(),
                attributes: Default::default(),
            }),
            |s, scope| s.with_grant(Grant::scope(*scope)),
        )
    }

    #[test]
    fn test_scope_requirement_empty() {
        let req = ScopeRequirement::new();
        assert!(req.is_empty());
        assert!(req.check(&subject_with_scopes(&[])).is_ok());
    }

    #[test]
    fn test_scope_requirement_all() {
        let req = ScopeRequirement::all(["read", "write"]);
        assert!(req.check(&subject_with_scopes(&["read", "write", "extra"])).is_ok());
        assert!(req.check(&subject_with_scopes(&["read"])).is_err());
    }

    #[test]
    fn test_insufficient_scope_names_exactly_missing() {
        let req = ScopeRequirement::all(["write", "read", "admin"]);
        let result = req.check(&subject_with_scopes(&["read"]));
        assert_eq!(
            result,
            Err(AuthError::InsufficientScope {
                missing: vec!["admin".to_string(), "write".to_string()]
            })
        );
    }

    #[test]
    fn test_no_hierarchical_matching() {
        let req = ScopeRequirement::one("read:all");
        assert!(req.check(&subject_with_scopes(&["read"])).is_err());
    }

    #[test]
    fn test_role_grant_does_not_satisfy_scope() {
        let subject = subject_with_scopes(&[]).with_grant(Grant::role("write"));
        assert!(ScopeRequirement::one("write").check(&subject).is_err());
    }

    #[test]
    fn test_scope_policy_paths() {
        let policy = ScopePolicy::new()
            .default_scope("read")
            .path_scope("/admin", "admin")
            .path_scope("/admin", "audit")
            .path_scope("/admin/users", "users");

        assert_eq!(policy.required_for("/"), ScopeRequirement::one("read"));
        assert_eq!(
            policy.required_for("/admin/users/1"),
            ScopeRequirement::all(["read", "admin", "audit", "users"])
        );
        assert!(ScopePolicy::new().required_for("/anything").is_empty());
    }
}
