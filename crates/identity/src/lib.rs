//! Identity Gateway: auth-state observation and interactive sign-in/sign-out
//! against an external identity provider.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shared::{domain::Session, error::AuthError};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Latest known authentication state. `Unknown` is the transitional startup
/// state and must be treated distinctly from `SignedOut` so consumers do not
/// flash a login screen while the provider is still being consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unknown,
    SignedOut,
    SignedIn(Session),
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::SignedIn(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn(_))
    }
}

/// Popup is the canonical interactive flow; redirect is kept as a documented
/// variant whose pending result is re-checked exactly once per gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInMechanism {
    Popup,
    Redirect,
}

impl SignInMechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            SignInMechanism::Popup => "popup",
            SignInMechanism::Redirect => "redirect",
        }
    }
}

#[async_trait]
pub trait AuthConnector: Send + Sync {
    async fn interactive_sign_in(&self, mechanism: SignInMechanism)
        -> Result<Session, AuthError>;
    async fn pending_redirect_session(&self) -> Result<Option<Session>, AuthError>;
    async fn sign_out(&self, session: &Session) -> Result<(), AuthError>;
}

pub struct MissingAuthConnector;

#[async_trait]
impl AuthConnector for MissingAuthConnector {
    async fn interactive_sign_in(
        &self,
        _mechanism: SignInMechanism,
    ) -> Result<Session, AuthError> {
        Err(AuthError::Provider(
            "identity provider is unavailable".into(),
        ))
    }

    async fn pending_redirect_session(&self) -> Result<Option<Session>, AuthError> {
        Err(AuthError::Provider(
            "identity provider is unavailable".into(),
        ))
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        Err(AuthError::Provider(
            "identity provider is unavailable".into(),
        ))
    }
}

struct GatewayState {
    auth: AuthState,
    redirect_checked: bool,
}

/// Owns the current session and notifies subscribers on every state change.
/// Injected into consumers explicitly; there is no ambient singleton.
pub struct IdentityGateway {
    connector: Arc<dyn AuthConnector>,
    mechanism: SignInMechanism,
    state: Mutex<GatewayState>,
    events: broadcast::Sender<AuthState>,
}

impl IdentityGateway {
    pub fn new(connector: Arc<dyn AuthConnector>, mechanism: SignInMechanism) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            connector,
            mechanism,
            state: Mutex::new(GatewayState {
                auth: AuthState::Unknown,
                redirect_checked: false,
            }),
            events,
        })
    }

    pub fn mechanism(&self) -> SignInMechanism {
        self.mechanism
    }

    pub async fn current_state(&self) -> AuthState {
        self.state.lock().await.auth.clone()
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.auth.session().cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthState> {
        self.events.subscribe()
    }

    /// Consults the provider for a pending redirect result. The provider is
    /// contacted at most once per gateway; later calls are no-ops. Whatever
    /// the outcome, the transitional `Unknown` state is settled so the shell
    /// can stop showing its startup loading indicator.
    pub async fn resolve_pending_redirect(&self) -> Result<(), AuthError> {
        {
            let mut state = self.state.lock().await;
            if state.redirect_checked {
                return Ok(());
            }
            state.redirect_checked = true;
        }

        match self.connector.pending_redirect_session().await {
            Ok(Some(session)) => {
                info!(uid = %session.uid, "pending redirect resolved to a session");
                self.set_state(AuthState::SignedIn(session)).await;
                Ok(())
            }
            Ok(None) => {
                self.settle_unknown().await;
                Ok(())
            }
            Err(err) => {
                warn!("pending redirect check failed: {err}");
                self.settle_unknown().await;
                Err(err)
            }
        }
    }

    pub async fn sign_in(&self) -> Result<(), AuthError> {
        match self.connector.interactive_sign_in(self.mechanism).await {
            Ok(session) => {
                info!(uid = %session.uid, mechanism = self.mechanism.as_str(), "signed in");
                self.set_state(AuthState::SignedIn(session)).await;
                Ok(())
            }
            Err(err) => {
                if err.is_canceled() {
                    info!("sign-in canceled by the user");
                } else {
                    warn!("sign-in failed: {err}");
                }
                self.settle_unknown().await;
                Err(err)
            }
        }
    }

    /// On failure the current session is left unchanged.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.current_session().await;
        let Some(session) = session else {
            return Ok(());
        };
        self.connector.sign_out(&session).await?;
        info!(uid = %session.uid, "signed out");
        self.set_state(AuthState::SignedOut).await;
        Ok(())
    }

    async fn set_state(&self, next: AuthState) {
        {
            let mut state = self.state.lock().await;
            state.auth = next.clone();
        }
        let _ = self.events.send(next);
    }

    async fn settle_unknown(&self) {
        let settled = {
            let mut state = self.state.lock().await;
            if state.auth == AuthState::Unknown {
                state.auth = AuthState::SignedOut;
                true
            } else {
                false
            }
        };
        if settled {
            let _ = self.events.send(AuthState::SignedOut);
        }
    }
}

/// Reqwest-backed connector against a provider-style REST surface.
pub struct HttpAuthConnector {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest<'a> {
    mechanism: &'a str,
    request_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    uid: String,
    display_name: String,
    email: String,
    photo_url: Option<String>,
}

impl From<SessionBody> for Session {
    fn from(body: SessionBody) -> Self {
        Session {
            uid: body.uid,
            display_name: body.display_name,
            email: body.email,
            photo_url: body.photo_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    status: Option<String>,
    message: Option<String>,
}

impl HttpAuthConnector {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn parse_failure(response: reqwest::Response) -> AuthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if let Ok(parsed) = serde_json::from_str::<ProviderErrorBody>(&body) {
            if parsed.error.status.as_deref() == Some("CANCELLED") {
                return AuthError::Canceled;
            }
            if let Some(message) = parsed.error.message {
                return AuthError::Provider(message);
            }
        }
        AuthError::Provider(format!("unexpected provider status {status}"))
    }
}

#[async_trait]
impl AuthConnector for HttpAuthConnector {
    async fn interactive_sign_in(
        &self,
        mechanism: SignInMechanism,
    ) -> Result<Session, AuthError> {
        let request_id = Uuid::new_v4();
        let response = self
            .http
            .post(self.endpoint("/v1/sessions/start"))
            .query(&[("key", self.api_key.as_str())])
            .json(&StartSessionRequest {
                mechanism: mechanism.as_str(),
                request_id,
            })
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_failure(response).await);
        }

        let body: SessionBody = response
            .json()
            .await
            .map_err(|err| AuthError::Provider(format!("malformed session response: {err}")))?;
        info!(%request_id, uid = %body.uid, "interactive sign-in completed");
        Ok(body.into())
    }

    async fn pending_redirect_session(&self) -> Result<Option<Session>, AuthError> {
        let response = self
            .http
            .get(self.endpoint("/v1/sessions/pending"))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if response.status() == StatusCode::NO_CONTENT
            || response.status() == StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::parse_failure(response).await);
        }

        let body: SessionBody = response
            .json()
            .await
            .map_err(|err| AuthError::Provider(format!("malformed session response: {err}")))?;
        Ok(Some(body.into()))
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/v1/sessions/{}", session.uid)))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_failure(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
