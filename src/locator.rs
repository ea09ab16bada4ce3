//! Bearer token discovery in inbound requests.
//!
//! [`TokenLocator`] looks in up to three places, always in the same order:
//! the configured header, then a query parameter, then a cookie. The first
//! non-empty candidate wins. Only the cookie lookup may suspend, since the
//! [`CookieHandler`] can decode or decrypt the cookie value.

use std::fmt;
use std::sync::Arc;

use axum::http::header::{COOKIE, InvalidHeaderValue};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use futures::future::{self, BoxFuture};

use crate::error::{AuthError, ConfigError};
use crate::secret::SecretString;

/// Where a token was (or was not) found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenLocation {
    Header,
    QueryParam,
    Cookie,
}

impl TokenLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenLocation::Header => "header",
            TokenLocation::QueryParam => "query-param",
            TokenLocation::Cookie => "cookie",
        }
    }
}

impl fmt::Display for TokenLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token candidate and the location it came from.
#[derive(Debug, Clone)]
pub struct RawToken {
    pub token: SecretString,
    pub location: TokenLocation,
}

/// Reads or writes a token in a header, with an optional prefix.
///
/// Prefix matching on extraction is case-insensitive, so `bearer abc` and
/// `Bearer abc` both yield `abc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHandler {
    header: HeaderName,
    prefix: Option<String>,
}

/// The header was present but not usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("header {0} is not valid UTF-8")]
    NotUtf8(HeaderName),
    #[error("header {header} does not start with expected prefix {prefix}")]
    MissingPrefix { header: HeaderName, prefix: String },
}

impl TokenHandler {
    /// Build a handler for an arbitrary header name.
    pub fn new(header: &str, prefix: Option<&str>) -> Result<Self, ConfigError> {
        let header = HeaderName::try_from(header)
            .map_err(|_| ConfigError::InvalidHeaderName(header.to_string()))?;
        Ok(Self {
            header,
            prefix: prefix.filter(|p| !p.is_empty()).map(String::from),
        })
    }

    /// `Authorization: Bearer <token>`.
    pub fn bearer() -> Self {
        Self {
            header: axum::http::header::AUTHORIZATION,
            prefix: Some("Bearer ".to_string()),
        }
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Find the token in `headers`.
    ///
    /// Returns `Ok(None)` when the header is absent or empty.
    pub fn extract(&self, headers: &HeaderMap) -> Result<Option<String>, ExtractError> {
        let Some(value) = headers.get(&self.header) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| ExtractError::NotUtf8(self.header.clone()))?
            .trim();

        let token = match &self.prefix {
            None => value,
            Some(prefix) => {
                let expected = prefix.trim_end();
                let separated = expected.len() < prefix.len();
                match value.get(..expected.len()) {
                    Some(head)
                        if head.eq_ignore_ascii_case(expected)
                            && (!separated
                                || value[expected.len()..]
                                    .chars()
                                    .next()
                                    .is_none_or(char::is_whitespace)) =>
                    {
                        value[expected.len()..].trim()
                    }
                    _ if value.is_empty() => "",
                    _ => {
                        return Err(ExtractError::MissingPrefix {
                            header: self.header.clone(),
                            prefix: prefix.clone(),
                        });
                    }
                }
            }
        };

        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    /// Set the header to `prefix + token`, replacing any previous value.
    pub fn attach(&self, headers: &mut HeaderMap, token: &str) -> Result<(), InvalidHeaderValue> {
        let value = match &self.prefix {
            Some(prefix) => format!("{prefix}{token}"),
            None => token.to_string(),
        };
        let mut value = HeaderValue::from_str(&value)?;
        value.set_sensitive(true);
        headers.insert(self.header.clone(), value);
        Ok(())
    }
}

/// Cookie value could not be turned into a token.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid token cookie: {0}")]
pub struct CookieError(pub String);

/// Decodes the token cookie.
///
/// The cookie format (signing, encryption) belongs to the implementor; the
/// locator only finds the cookie by name and awaits the decoded token.
pub trait CookieHandler: Send + Sync + 'static {
    fn cookie_name(&self) -> &str;

    fn decode<'a>(&'a self, value: &'a str) -> BoxFuture<'a, Result<String, CookieError>>;
}

/// Cookie whose value is the token itself.
#[derive(Debug, Clone)]
pub struct PlainCookie {
    name: String,
}

impl PlainCookie {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl CookieHandler for PlainCookie {
    fn cookie_name(&self) -> &str {
        &self.name
    }

    fn decode<'a>(&'a self, value: &'a str) -> BoxFuture<'a, Result<String, CookieError>> {
        Box::pin(future::ready(Ok(value.to_string())))
    }
}

/// Value of the named cookie across all `Cookie` headers.
pub fn find_cookie<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}

/// Searches the enabled token locations in priority order.
#[derive(Clone, Default)]
pub struct TokenLocator {
    header: Option<TokenHandler>,
    query_param: Option<String>,
    cookie: Option<Arc<dyn CookieHandler>>,
}

impl fmt::Debug for TokenLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLocator")
            .field("header", &self.header)
            .field("query_param", &self.query_param)
            .field("cookie", &self.cookie.as_ref().map(|c| c.cookie_name()))
            .finish()
    }
}

impl TokenLocator {
    /// A locator with no enabled location.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, handler: TokenHandler) -> Self {
        self.header = Some(handler);
        self
    }

    pub fn query_param(mut self, name: impl Into<String>) -> Self {
        self.query_param = Some(name.into());
        self
    }

    pub fn cookie(mut self, handler: Arc<dyn CookieHandler>) -> Self {
        self.cookie = Some(handler);
        self
    }

    /// `true` if no location is enabled.
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.query_param.is_none() && self.cookie.is_none()
    }

    /// Find the first non-empty token.
    ///
    /// Extraction failures are reported as [`AuthError::MissingToken`];
    /// a cookie that cannot be decoded is reported as
    /// [`AuthError::MalformedToken`].
    pub async fn locate(&self, headers: &HeaderMap, uri: &Uri) -> Result<RawToken, AuthError> {
        let mut missing = Vec::new();

        if let Some(handler) = &self.header {
            match handler.extract(headers) {
                Ok(Some(token)) => return Ok(found(token, TokenLocation::Header)),
                Ok(None) => missing.push(TokenLocation::Header),
                Err(e) => {
                    tracing::trace!(error = %e, "failed to extract token from header");
                    missing.push(TokenLocation::Header);
                    return Err(AuthError::MissingToken { locations: missing });
                }
            }
        }

        if let Some(name) = &self.query_param {
            match query_value(uri, name) {
                Some(token) => return Ok(found(token, TokenLocation::QueryParam)),
                None => missing.push(TokenLocation::QueryParam),
            }
        }

        if let Some(cookies) = &self.cookie {
            match find_cookie(headers, cookies.cookie_name()) {
                Some(value) => {
                    return match cookies.decode(value).await {
                        Ok(token) if !token.is_empty() => Ok(found(token, TokenLocation::Cookie)),
                        Ok(_) => Err(AuthError::MalformedToken {
                            description: "empty token cookie".to_string(),
                        }),
                        Err(e) => {
                            tracing::trace!(error = %e, "invalid token in cookie");
                            Err(AuthError::MalformedToken {
                                description: e.to_string(),
                            })
                        }
                    };
                }
                None => missing.push(TokenLocation::Cookie),
            }
        }

        tracing::trace!(locations = ?missing, "missing token");
        Err(AuthError::MissingToken { locations: missing })
    }
}

fn found(token: String, location: TokenLocation) -> RawToken {
    RawToken {
        token: SecretString::with_label(token, "TOKEN"),
        location,
    }
}

fn query_value(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    fn all_locations() -> TokenLocator {
        TokenLocator::new()
            .header(TokenHandler::bearer())
            .query_param("access_token")
            .cookie(Arc::new(PlainCookie::new("JSESSIONID")))
    }

    #[test]
    fn test_bearer_extract() {
        let handler = TokenHandler::bearer();
        assert_eq!(
            handler.extract(&headers(&[("authorization", "Bearer abc")])),
            Ok(Some("abc".to_string()))
        );
        assert_eq!(
            handler.extract(&headers(&[("authorization", "bearer  abc ")])),
            Ok(Some("abc".to_string()))
        );
        assert_eq!(handler.extract(&HeaderMap::new()), Ok(None));
        assert!(matches!(
            handler.extract(&headers(&[("authorization", "Basic dXNlcjpwYXNz")])),
            Err(ExtractError::MissingPrefix { .. })
        ));
        assert!(matches!(
            handler.extract(&headers(&[("authorization", "Bearerabc")])),
            Err(ExtractError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn test_custom_header_without_prefix() {
        let handler = TokenHandler::new("X-Auth-Token", None).unwrap();
        assert_eq!(
            handler.extract(&headers(&[("x-auth-token", "tok")])),
            Ok(Some("tok".to_string()))
        );
        assert!(TokenHandler::new("bad header", None).is_err());
    }

    #[test]
    fn test_attach() {
        let mut map = headers(&[("authorization", "Basic old")]);
        TokenHandler::bearer().attach(&mut map, "tok").unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer tok");
        assert_eq!(map.get_all("authorization").iter().count(), 1);

        let custom = TokenHandler::new("X-Token", Some("JWT ")).unwrap();
        custom.attach(&mut map, "tok").unwrap();
        assert_eq!(map.get("x-token").unwrap(), "JWT tok");
    }

    #[test]
    fn test_find_cookie() {
        let map = headers(&[("cookie", "a=1; JSESSIONID=tok; b=2")]);
        assert_eq!(find_cookie(&map, "JSESSIONID"), Some("tok"));
        assert_eq!(find_cookie(&map, "missing"), None);

        let split = headers(&[("cookie", "a=1"), ("cookie", "JSESSIONID=\"quoted\"")]);
        assert_eq!(find_cookie(&split, "JSESSIONID"), Some("quoted"));
    }

    #[tokio::test]
    async fn test_header_wins_over_query_and_cookie() {
        let uri: Uri = "/api?access_token=from-query".parse().unwrap();
        let map = headers(&[
            ("authorization", "Bearer from-header"),
            ("cookie", "JSESSIONID=from-cookie"),
        ]);
        let token = all_locations().locate(&map, &uri).await.unwrap();
        assert_eq!(token.location, TokenLocation::Header);
        assert_eq!(token.token.expose(), "from-header");
    }

    #[tokio::test]
    async fn test_query_before_cookie() {
        let uri: Uri = "/api?x=1&access_token=from%20query".parse().unwrap();
        let map = headers(&[("cookie", "JSESSIONID=from-cookie")]);
        let token = all_locations().locate(&map, &uri).await.unwrap();
        assert_eq!(token.location, TokenLocation::QueryParam);
        assert_eq!(token.token.expose(), "from query");
    }

    #[tokio::test]
    async fn test_cookie_fallback() {
        let uri: Uri = "/api".parse().unwrap();
        let map = headers(&[("cookie", "JSESSIONID=from-cookie")]);
        let token = all_locations().locate(&map, &uri).await.unwrap();
        assert_eq!(token.location, TokenLocation::Cookie);
        assert_eq!(token.token.expose(), "from-cookie");
    }

    #[tokio::test]
    async fn test_missing_names_every_location() {
        let uri: Uri = "/api".parse().unwrap();
        let err = all_locations()
            .locate(&HeaderMap::new(), &uri)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingToken {
                locations: vec![
                    TokenLocation::Header,
                    TokenLocation::QueryParam,
                    TokenLocation::Cookie
                ]
            }
        );
    }

    #[tokio::test]
    async fn test_bad_header_is_missing_token() {
        let uri: Uri = "/api?access_token=ignored".parse().unwrap();
        let map = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        let err = all_locations().locate(&map, &uri).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken { .. }));
    }

    #[tokio::test]
    async fn test_cookie_decode_failure() {
        struct Rejecting;

        impl CookieHandler for Rejecting {
            fn cookie_name(&self) -> &str {
                "session"
            }

            fn decode<'a>(&'a self, _value: &'a str) -> BoxFuture<'a, Result<String, CookieError>> {
                Box::pin(async { Err(CookieError("bad signature".to_string())) })
            }
        }

        let locator = TokenLocator::new().cookie(Arc::new(Rejecting));
        let map = headers(&[("cookie", "session=tampered")]);
        let err = locator.locate(&map, &"/".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken { .. }));
    }
}
