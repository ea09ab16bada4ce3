//! Integration tests for remote token validation.
//!
//! These tests spin up a lightweight axum server acting as the identity
//! provider's introspection endpoint.

#![cfg(feature = "introspection")]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::routing::post;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
use tokio::sync::Mutex;
use tower_oidc::{AuthError, AuthenticationResponse, OidcProvider, ProviderConfig, ScopeRequirement};

/// What the endpoint saw on its last call.
#[derive(Debug, Default, Clone)]
struct Seen {
    token: Option<String>,
    accept: Option<String>,
    cache_control: Option<String>,
    authorization: Option<String>,
}

/// Spin up a mock introspection endpoint.
///
/// Tokens listed in `active` are reported active. Tokens whose signature
/// segment is `broken` get a 500, `garbled` gets a non-JSON body.
async fn start_introspection_server(
    active: Vec<String>,
    seen: Arc<Mutex<Seen>>,
) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/introspect",
        post(
            move |headers: HeaderMap, axum::Form(form): axum::Form<HashMap<String, String>>| {
                let active = active.clone();
                let seen = seen.clone();
                async move {
                    let value = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from)
                    };
                    *seen.lock().await = Seen {
                        token: form.get("token").cloned(),
                        accept: value(header::ACCEPT),
                        cache_control: value(header::CACHE_CONTROL),
                        authorization: value(header::AUTHORIZATION),
                    };

                    let token = form.get("token").cloned().unwrap_or_default();
                    if token.ends_with(".broken") {
                        return (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string());
                    }
                    if token.ends_with(".garbled") {
                        return (StatusCode::OK, "<html>".to_string());
                    }
                    let body = json!({ "active": active.contains(&token) });
                    (StatusCode::OK, body.to_string())
                }
            },
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://127.0.0.1:{}/introspect", addr.port());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, handle)
}

/// Introspection does not check signatures; any key will do.
fn token(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"unknown-to-the-provider"),
    )
    .unwrap()
}

fn provider(introspection_uri: &str) -> OidcProvider {
    let config = ProviderConfig::builder()
        .client_id("orders-client")
        .client_secret("orders-secret")
        .authorization_endpoint("https://idp.example.com/authorize")
        .introspection_endpoint(introspection_uri)
        .realm("orders")
        .build()
        .unwrap();
    OidcProvider::new(config)
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    headers
}

fn uri() -> Uri {
    "/orders".parse().unwrap()
}

#[tokio::test]
async fn test_active_token_is_accepted() {
    let good = token(json!({"sub": "u1", "preferred_username": "alice", "scope": "read"}));
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (url, _handle) = start_introspection_server(vec![good.clone()], seen.clone()).await;

    let response = provider(&url)
        .authenticate(&bearer(&good), &uri(), &ScopeRequirement::one("read"))
        .await;
    let AuthenticationResponse::Success(subject) = response else {
        panic!("expected success, got {response:?}");
    };
    assert_eq!(subject.principal().name, "alice");

    let seen = seen.lock().await.clone();
    assert_eq!(seen.token.as_deref(), Some(good.as_str()));
    assert_eq!(seen.accept.as_deref(), Some("application/json"));
    assert_eq!(
        seen.cache_control.as_deref(),
        Some("no-cache, no-store, must-revalidate")
    );
    assert!(seen.authorization.unwrap().starts_with("Basic "));
}

#[tokio::test]
async fn test_inactive_token_is_rejected() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (url, _handle) = start_introspection_server(Vec::new(), seen).await;

    let response = provider(&url)
        .authenticate(
            &bearer(&token(json!({"sub": "u1"}))),
            &uri(),
            &ScopeRequirement::new(),
        )
        .await;
    let AuthenticationResponse::Failure { status, reason, .. } = response else {
        panic!("expected failure");
    };
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reason, AuthError::InvalidToken);
}

#[tokio::test]
async fn test_endpoint_errors_are_fatal() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (url, _handle) = start_introspection_server(Vec::new(), seen).await;
    let provider = provider(&url);

    for suffix in ["broken", "garbled"] {
        let raw = format!("{}.{suffix}", token(json!({"sub": "u1"})).rsplit_once('.').unwrap().0);
        let response = provider
            .authenticate(&bearer(&raw), &uri(), &ScopeRequirement::new())
            .await;
        assert_eq!(response.reason(), Some(&AuthError::InvalidToken), "{suffix}");
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_fatal() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let response = provider(&format!("http://127.0.0.1:{port}/introspect"))
        .authenticate(
            &bearer(&token(json!({"sub": "u1"}))),
            &uri(),
            &ScopeRequirement::new(),
        )
        .await;
    assert_eq!(response.reason(), Some(&AuthError::InvalidToken));
}
