// Integration tests for the public capture flow: login redirect and
// authorization-code callback.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Duration;
use guildvault::api::{create_capture_router, CaptureAppState};
use guildvault::credentials::CredentialStore;
use guildvault::lifecycle::LifecycleManager;
use guildvault::membership::{MembershipGateway, MembershipOutcome, ReplayError};
use guildvault::oauth::{
    ExchangeError, IdentityProfile, LoginStateManager, TokenExchanger, TokenGrant,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// Deterministic exchanger: grants derived from the code, optional failures.
struct StubExchanger {
    fail_codes: HashSet<String>,
    exchange_calls: AtomicU64,
}

#[async_trait]
impl TokenExchanger for StubExchanger {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ExchangeError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_codes.contains(code) {
            // ExchangeError carries reqwest's StatusCode, not axum's
            return Err(ExchangeError::Status(
                reqwest::StatusCode::BAD_REQUEST,
                "invalid_grant".to_string(),
            ));
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", code),
            refresh_token: format!("refresh-{}", code),
            expires_in: 604800,
        })
    }

    async fn exchange_refresh_token(&self, _: &str) -> Result<TokenGrant, ExchangeError> {
        unreachable!("capture flow never refreshes")
    }

    async fn fetch_profile(&self, _: &str) -> Result<IdentityProfile, ExchangeError> {
        Ok(IdentityProfile {
            id: "42".to_string(),
            username: "somebody".to_string(),
            avatar: None,
        })
    }
}

struct UnusedGateway;

#[async_trait]
impl MembershipGateway for UnusedGateway {
    async fn add_member(
        &self,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<MembershipOutcome, ReplayError> {
        unreachable!("capture flow never replays")
    }
}

struct TestApp {
    router: Router,
    store: Arc<CredentialStore>,
    login_states: LoginStateManager,
    exchanger: Arc<StubExchanger>,
}

fn create_test_app(failing_codes: &[&str]) -> TestApp {
    let key = BASE64.encode([0u8; 32]);
    let store = Arc::new(CredentialStore::open(":memory:", &key).unwrap());

    let exchanger = Arc::new(StubExchanger {
        fail_codes: failing_codes.iter().map(|s| s.to_string()).collect(),
        exchange_calls: AtomicU64::new(0),
    });

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&store),
        Arc::clone(&exchanger) as Arc<dyn TokenExchanger>,
        Arc::new(UnusedGateway),
        Duration::days(7),
    ));

    let login_states = LoginStateManager::new(600);

    let router = create_capture_router(CaptureAppState {
        lifecycle,
        login_states: login_states.clone(),
        authorize_endpoint: "https://provider.example/oauth2/authorize".to_string(),
        client_id: "client-1".to_string(),
        redirect_uri: "http://localhost:8000/callback".to_string(),
    });

    TestApp {
        router,
        store,
        login_states,
        exchanger,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_login_redirects_to_provider_with_state() {
    let app = create_test_app(&[]);

    let response = app.router.oneshot(get("/login")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://provider.example/oauth2/authorize?"));
    assert!(location.contains("client_id=client-1"));
    assert!(location.contains("response_type=code"));
    assert!(location.contains("scope=identify%20guilds.join"));
    assert!(location.contains("state="));

    // The state in the URL is a live single-use token
    let state = location.split("state=").nth(1).unwrap();
    assert!(app.login_states.validate_and_consume(state));
}

#[tokio::test]
async fn test_callback_captures_identity() {
    let app = create_test_app(&[]);
    let state = app.login_states.create_state();

    let response = app
        .router
        .oneshot(get(&format!("/callback?code=abc&state={}", state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["identity_id"], "42");
    assert_eq!(json["display_name"], "somebody");

    let record = app.store.get("42").unwrap().unwrap();
    assert_eq!(record.access_token, "access-abc");
    assert_eq!(record.refresh_token, "refresh-abc");
}

#[tokio::test]
async fn test_callback_rejects_unknown_state() {
    let app = create_test_app(&[]);

    let response = app
        .router
        .oneshot(get("/callback?code=abc&state=never-issued"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The exchange was never attempted and nothing was stored
    assert_eq!(app.exchanger.exchange_calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let app = create_test_app(&[]);
    let state = app.login_states.create_state();

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/callback?code=abc&state={}", state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Replaying the same state fails
    let response = app
        .router
        .oneshot(get(&format!("/callback?code=def&state={}", state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_exchange_failure_writes_nothing() {
    let app = create_test_app(&["bad-code"]);
    let state = app.login_states.create_state();

    let response = app
        .router
        .oneshot(get(&format!("/callback?code=bad-code&state={}", state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("Failed to verify"));
    assert_eq!(app.store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_callback_provider_error_is_bad_request() {
    let app = create_test_app(&[]);

    let response = app
        .router
        .oneshot(get("/callback?error=access_denied&error_description=User+cancelled"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.store.count().unwrap(), 0);
}

#[tokio::test]
async fn test_callback_missing_code_is_bad_request() {
    let app = create_test_app(&[]);
    let state = app.login_states.create_state();

    let response = app
        .router
        .oneshot(get(&format!("/callback?state={}", state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recapture_via_callback_keeps_one_record() {
    let app = create_test_app(&[]);

    let state1 = app.login_states.create_state();
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/callback?code=abc&state={}", state1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let state2 = app.login_states.create_state();
    let response = app
        .router
        .oneshot(get(&format!("/callback?code=def&state={}", state2)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(app.store.count().unwrap(), 1);
    let record = app.store.get("42").unwrap().unwrap();
    assert_eq!(record.access_token, "access-def");
}
