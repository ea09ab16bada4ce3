//! Redacting wrapper for bearer tokens and client secrets.
//!
//! [`SecretString`] keeps the raw value available through
//! [`expose()`](SecretString::expose) while hiding it from `Debug` and
//! `Display`, so a [`Subject`](crate::Subject) or a
//! [`ProviderConfig`](crate::ProviderConfig) can be logged freely.
//!
//! ```rust
//! use tower_oidc::SecretString;
//!
//! let token = SecretString::with_label("eyJhbGciOi...", "TOKEN");
//! assert_eq!(format!("{:?}", token), "[TOKEN]");
//! assert_eq!(token.expose(), "eyJhbGciOi...");
//! ```

use std::borrow::Cow;
use std::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A string wrapper that redacts its contents in Debug and Display output.
///
/// Serializes and deserializes transparently as a plain string, so it can be
/// used directly in configuration structs.
#[derive(Clone)]
pub struct SecretString {
    value: String,
    label: Cow<'static, str>,
}

const DEFAULT_LABEL: &str = "REDACTED";

impl SecretString {
    /// Create a new `SecretString` with the default `[REDACTED]` label.
    pub fn new(s: impl Into<String>) -> Self {
        Self {
            value: s.into(),
            label: Cow::Borrowed(DEFAULT_LABEL),
        }
    }

    /// Create a new `SecretString` with a custom redaction label.
    pub fn with_label(s: impl Into<String>, label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            value: s.into(),
            label: label.into(),
        }
    }

    /// Expose the underlying secret value.
    ///
    /// Be careful not to log or display the returned value.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Consume the `SecretString` and return the underlying value.
    pub fn into_inner(self) -> String {
        self.value
    }

    /// Returns the redaction label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Debug for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

impl Display for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}
