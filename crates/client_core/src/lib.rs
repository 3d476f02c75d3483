use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::protocol::{AuthGrant, LoginRequest, OtpRequest, OtpVerification, RegistrationRequest};
use storage::SessionStore;
use url::Url;

pub mod error;
pub mod http;
pub mod login;
pub mod registration;
pub mod session_manager;

pub use error::{ApiFailure, FlowError, Operation, ValidationError};
pub use http::{AuthEndpoints, HttpAuthApi, DEFAULT_REQUEST_TIMEOUT};
pub use login::LoginFlow;
pub use registration::{
    ProfileSubmission, RegistrationFlow, RegistrationSnapshot, RegistrationStage,
};
pub use session_manager::SessionManager;

/// The four auth endpoints, one request and one verdict per call.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn request_otp(&self, request: &OtpRequest) -> std::result::Result<(), ApiFailure>;
    async fn verify_otp(&self, request: &OtpVerification) -> std::result::Result<(), ApiFailure>;
    async fn complete_registration(
        &self,
        request: &RegistrationRequest,
    ) -> std::result::Result<AuthGrant, ApiFailure>;
    async fn login(&self, request: &LoginRequest) -> std::result::Result<AuthGrant, ApiFailure>;
}

/// Wires the flows to one API and one session manager.
pub struct AuthClient {
    api: Arc<dyn AuthApi>,
    sessions: Arc<SessionManager>,
    google_sign_in_url: Option<Url>,
}

impl AuthClient {
    pub fn new(api: Arc<dyn AuthApi>, sessions: Arc<SessionManager>) -> Self {
        Self {
            api,
            sessions,
            google_sign_in_url: None,
        }
    }

    /// HTTP-backed client with the persisted session already restored.
    pub async fn connect(
        base_url: &str,
        request_timeout: Duration,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let api = HttpAuthApi::with_options(base_url, AuthEndpoints::default(), request_timeout)?;
        let google_sign_in_url = api
            .google_sign_in_url()
            .context("failed to build google sign-in url")?;
        let sessions = SessionManager::initialize(store).await?;

        Ok(Self {
            api: Arc::new(api),
            sessions,
            google_sign_in_url: Some(google_sign_in_url),
        })
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// A fresh registration flow at the mobile-number stage.
    pub fn registration(&self) -> Arc<RegistrationFlow> {
        RegistrationFlow::new(Arc::clone(&self.api), Arc::clone(&self.sessions))
    }

    pub fn login_flow(&self) -> Arc<LoginFlow> {
        LoginFlow::new(Arc::clone(&self.api), Arc::clone(&self.sessions))
    }

    pub async fn logout(&self) -> Result<()> {
        self.sessions.clear().await
    }

    pub fn google_sign_in_url(&self) -> Option<&Url> {
        self.google_sign_in_url.as_ref()
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
