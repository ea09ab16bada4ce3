//! Authenticated identity built from validated token claims.
//!
//! [`Subject::from_token`] is the claims projection: it picks the principal
//! name, copies claims into attributes, and turns `groups` and `scope` into
//! [`Grant`]s. The raw token is kept in a [`TokenCredential`] so it can be
//! propagated to outbound calls.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::secret::SecretString;
use crate::token::SignedToken;

/// Grant type of scopes.
pub const SCOPE_GRANT: &str = "scope";
/// Grant type of roles.
pub const ROLE_GRANT: &str = "role";

/// Well-known claims copied under fixed attribute keys.
const PROFILE_CLAIMS: [(&str, &str); 6] = [
    ("email", "email"),
    ("email_verified", "email_verified"),
    ("locale", "locale"),
    ("family_name", "family_name"),
    ("given_name", "given_name"),
    ("name", "full_name"),
];

/// Who the caller is.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// Display name: `preferred_username`, else `sub`.
    pub name: String,
    /// Stable identifier: `sub`.
    pub id: String,
    /// All payload claims plus the well-known profile keys.
    pub attributes: BTreeMap<String, Value>,
}

impl Principal {
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// A typed permission, e.g. `("scope", "read")` or `("role", "admin")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grant {
    pub kind: String,
    pub name: String,
}

impl Grant {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn scope(name: impl Into<String>) -> Self {
        Self::new(SCOPE_GRANT, name)
    }

    pub fn role(name: impl Into<String>) -> Self {
        Self::new(ROLE_GRANT, name)
    }
}

/// The token a subject authenticated with.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenCredential {
    pub token: SecretString,
    pub issuer: Option<String>,
    pub issued_at: Option<SystemTime>,
    pub expires_at: Option<SystemTime>,
}

/// The claims carry no `sub`, so no principal can be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("JWT does not contain subject claim, cannot create principal")]
pub struct MissingSubject;

/// An authenticated caller. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    principal: Principal,
    grants: Vec<Grant>,
    credential: Option<TokenCredential>,
}

impl Subject {
    /// Create a subject without grants or credential.
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            grants: Vec::new(),
            credential: None,
        }
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        if !self.grants.contains(&grant) {
            self.grants.push(grant);
        }
        self
    }

    pub fn with_credential(mut self, credential: TokenCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Project a validated token onto a subject.
    ///
    /// With `use_groups`, each entry of the `groups` claim becomes a role.
    pub fn from_token(token: &SignedToken, use_groups: bool) -> Result<Self, MissingSubject> {
        let claims = token.claims();
        let id = claims.sub.clone().ok_or(MissingSubject)?;
        let name = claims.preferred_username.clone().unwrap_or_else(|| id.clone());

        let mut attributes: BTreeMap<String, Value> = token
            .payload()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (claim, key) in PROFILE_CLAIMS {
            if let Some(value) = token.payload().get(claim) {
                attributes.insert(key.to_string(), value.clone());
            }
        }

        let credential = TokenCredential {
            token: token.token().clone(),
            issuer: claims.iss.clone(),
            issued_at: claims.iat.and_then(from_unix),
            expires_at: claims.exp.and_then(from_unix),
        };

        let mut subject = Subject::new(Principal {
            name,
            id,
            attributes,
        })
        .with_credential(credential);

        if use_groups {
            for group in claims.groups.iter().flatten() {
                subject = subject.with_grant(Grant::role(group));
            }
        }
        for scope in claims.scopes() {
            subject = subject.with_grant(Grant::scope(scope));
        }

        Ok(subject)
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Names of all grants of the given type.
    pub fn grants_by_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.grants
            .iter()
            .filter(move |g| g.kind == kind)
            .map(|g| g.name.as_str())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.grants_by_kind(SCOPE_GRANT).any(|s| s == scope)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.grants_by_kind(ROLE_GRANT).any(|r| r == role)
    }

    pub fn credential(&self) -> Option<&TokenCredential> {
        self.credential.as_ref()
    }
}

/// `None` when the instant is not representable on this platform.
fn from_unix(secs: u64) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_secs(secs))
}
