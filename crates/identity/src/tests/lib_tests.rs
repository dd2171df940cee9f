use super::*;
use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

fn sample_session() -> Session {
    Session {
        uid: "user-abc-123".to_string(),
        display_name: "Avery Field".to_string(),
        email: "avery@example.com".to_string(),
        photo_url: Some("https://example.com/avery.png".to_string()),
    }
}

struct TestAuthConnector {
    session: Session,
    pending: Option<Session>,
    cancel_sign_in: bool,
    fail_sign_in: Option<String>,
    fail_pending: Option<String>,
    fail_sign_out: Option<String>,
    pending_calls: Arc<Mutex<u32>>,
}

impl TestAuthConnector {
    fn ok() -> Self {
        Self {
            session: sample_session(),
            pending: None,
            cancel_sign_in: false,
            fail_sign_in: None,
            fail_pending: None,
            fail_sign_out: None,
            pending_calls: Arc::new(Mutex::new(0)),
        }
    }

    fn with_pending(session: Session) -> Self {
        let mut connector = Self::ok();
        connector.pending = Some(session);
        connector
    }

    fn canceling() -> Self {
        let mut connector = Self::ok();
        connector.cancel_sign_in = true;
        connector
    }
}

#[async_trait]
impl AuthConnector for TestAuthConnector {
    async fn interactive_sign_in(
        &self,
        _mechanism: SignInMechanism,
    ) -> Result<Session, AuthError> {
        if self.cancel_sign_in {
            return Err(AuthError::Canceled);
        }
        if let Some(err) = &self.fail_sign_in {
            return Err(AuthError::Provider(err.clone()));
        }
        Ok(self.session.clone())
    }

    async fn pending_redirect_session(&self) -> Result<Option<Session>, AuthError> {
        let mut calls = self.pending_calls.lock().await;
        *calls += 1;
        if let Some(err) = &self.fail_pending {
            return Err(AuthError::Transport(err.clone()));
        }
        Ok(self.pending.clone())
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        if let Some(err) = &self.fail_sign_out {
            return Err(AuthError::Provider(err.clone()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn gateway_starts_in_unknown_state() {
    let gateway = IdentityGateway::new(Arc::new(TestAuthConnector::ok()), SignInMechanism::Popup);
    assert_eq!(gateway.current_state().await, AuthState::Unknown);
    assert!(gateway.current_session().await.is_none());
}

#[tokio::test]
async fn resolving_no_pending_redirect_settles_to_signed_out() {
    let connector = Arc::new(TestAuthConnector::ok());
    let calls = Arc::clone(&connector.pending_calls);
    let gateway = IdentityGateway::new(connector, SignInMechanism::Redirect);

    gateway.resolve_pending_redirect().await.expect("resolve");
    assert_eq!(gateway.current_state().await, AuthState::SignedOut);
    assert_eq!(*calls.lock().await, 1);
}

#[tokio::test]
async fn pending_redirect_is_checked_exactly_once() {
    let connector = Arc::new(TestAuthConnector::ok());
    let calls = Arc::clone(&connector.pending_calls);
    let gateway = IdentityGateway::new(connector, SignInMechanism::Redirect);

    gateway.resolve_pending_redirect().await.expect("first");
    gateway.resolve_pending_redirect().await.expect("second");
    gateway.resolve_pending_redirect().await.expect("third");
    assert_eq!(*calls.lock().await, 1);
}

#[tokio::test]
async fn pending_redirect_session_signs_the_user_in() {
    let connector = Arc::new(TestAuthConnector::with_pending(sample_session()));
    let gateway = IdentityGateway::new(connector, SignInMechanism::Redirect);

    gateway.resolve_pending_redirect().await.expect("resolve");
    let session = gateway.current_session().await.expect("session");
    assert_eq!(session.uid, "user-abc-123");
}

#[tokio::test]
async fn failed_redirect_check_still_settles_unknown_state() {
    let mut connector = TestAuthConnector::ok();
    connector.fail_pending = Some("provider offline".to_string());
    let gateway = IdentityGateway::new(Arc::new(connector), SignInMechanism::Redirect);

    let err = gateway
        .resolve_pending_redirect()
        .await
        .expect_err("check should fail");
    assert!(matches!(err, AuthError::Transport(_)));
    assert_eq!(gateway.current_state().await, AuthState::SignedOut);
}

#[tokio::test]
async fn sign_in_updates_state_and_notifies_subscribers() {
    let gateway = IdentityGateway::new(Arc::new(TestAuthConnector::ok()), SignInMechanism::Popup);
    let mut events = gateway.subscribe();

    gateway.sign_in().await.expect("sign in");
    assert!(gateway.current_state().await.is_signed_in());

    let event = events.recv().await.expect("event");
    assert_eq!(event, AuthState::SignedIn(sample_session()));
}

#[tokio::test]
async fn canceled_sign_in_is_nondestructive() {
    let gateway = IdentityGateway::new(
        Arc::new(TestAuthConnector::canceling()),
        SignInMechanism::Popup,
    );

    let err = gateway.sign_in().await.expect_err("canceled");
    assert!(err.is_canceled());
    assert_eq!(gateway.current_state().await, AuthState::SignedOut);
}

#[tokio::test]
async fn sign_out_failure_leaves_session_unchanged() {
    let mut connector = TestAuthConnector::ok();
    connector.fail_sign_out = Some("provider refused".to_string());
    let gateway = IdentityGateway::new(Arc::new(connector), SignInMechanism::Popup);

    gateway.sign_in().await.expect("sign in");
    let err = gateway.sign_out().await.expect_err("sign out should fail");
    assert!(matches!(err, AuthError::Provider(_)));
    assert!(gateway.current_session().await.is_some());
}

#[tokio::test]
async fn sign_out_clears_session_and_notifies() {
    let gateway = IdentityGateway::new(Arc::new(TestAuthConnector::ok()), SignInMechanism::Popup);
    gateway.sign_in().await.expect("sign in");

    let mut events = gateway.subscribe();
    gateway.sign_out().await.expect("sign out");
    assert_eq!(gateway.current_state().await, AuthState::SignedOut);
    assert_eq!(events.recv().await.expect("event"), AuthState::SignedOut);
}

#[tokio::test]
async fn sign_out_without_session_is_a_no_op() {
    let mut connector = TestAuthConnector::ok();
    connector.fail_sign_out = Some("should never be called".to_string());
    let gateway = IdentityGateway::new(Arc::new(connector), SignInMechanism::Popup);

    gateway.sign_out().await.expect("no-op sign out");
    assert_eq!(gateway.current_state().await, AuthState::Unknown);
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_connector_completes_popup_sign_in() {
    let router = Router::new().route(
        "/v1/sessions/start",
        post(|| async {
            Json(json!({
                "uid": "remote-uid-9",
                "displayName": "Remote User",
                "email": "remote@example.com",
                "photoUrl": null,
            }))
        }),
    );
    let base_url = serve(router).await;

    let connector = HttpAuthConnector::new(base_url, "test-key");
    let session = connector
        .interactive_sign_in(SignInMechanism::Popup)
        .await
        .expect("sign in");
    assert_eq!(session.uid, "remote-uid-9");
    assert_eq!(session.display_name, "Remote User");
    assert!(session.photo_url.is_none());
}

#[tokio::test]
async fn http_connector_maps_cancelled_status_to_canceled() {
    let router = Router::new().route(
        "/v1/sessions/start",
        post(|| async {
            (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": { "status": "CANCELLED", "message": "user closed the popup" }
                })),
            )
        }),
    );
    let base_url = serve(router).await;

    let connector = HttpAuthConnector::new(base_url, "test-key");
    let err = connector
        .interactive_sign_in(SignInMechanism::Popup)
        .await
        .expect_err("canceled");
    assert!(err.is_canceled());
}

#[tokio::test]
async fn http_connector_reports_provider_error_message() {
    let router = Router::new().route(
        "/v1/sessions/start",
        post(|| async {
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": { "status": "PERMISSION_DENIED", "message": "key not allowed" }
                })),
            )
        }),
    );
    let base_url = serve(router).await;

    let connector = HttpAuthConnector::new(base_url, "test-key");
    let err = connector
        .interactive_sign_in(SignInMechanism::Popup)
        .await
        .expect_err("provider error");
    match err {
        AuthError::Provider(message) => assert_eq!(message, "key not allowed"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn http_connector_treats_no_content_as_no_pending_session() {
    let router = Router::new().route(
        "/v1/sessions/pending",
        get(|| async { StatusCode::NO_CONTENT }),
    );
    let base_url = serve(router).await;

    let connector = HttpAuthConnector::new(base_url, "test-key");
    let pending = connector
        .pending_redirect_session()
        .await
        .expect("pending check");
    assert!(pending.is_none());
}

#[tokio::test]
async fn http_connector_signs_out_via_delete() {
    let router = Router::new().route(
        "/v1/sessions/:uid",
        delete(|| async { StatusCode::NO_CONTENT }),
    );
    let base_url = serve(router).await;

    let connector = HttpAuthConnector::new(base_url, "test-key");
    connector
        .sign_out(&sample_session())
        .await
        .expect("sign out");
}
