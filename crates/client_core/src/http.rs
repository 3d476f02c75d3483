use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    error::ApiError,
    protocol::{AuthGrant, LoginRequest, OtpRequest, OtpVerification, RegistrationRequest},
};
use tracing::warn;
use url::Url;

use crate::{error::ApiFailure, AuthApi};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Endpoint paths, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub request_otp: String,
    pub verify_otp: String,
    /// The backend finishes registration on the verification endpoint when the
    /// body carries profile fields.
    pub complete_registration: String,
    pub login: String,
    pub google_oauth: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            request_otp: "api/auth/register/otp".into(),
            verify_otp: "api/auth/register/verify".into(),
            complete_registration: "api/auth/register/verify".into(),
            login: "api/auth/login".into(),
            google_oauth: "api/auth/google".into(),
        }
    }
}

pub struct HttpAuthApi {
    http: Client,
    base_url: Url,
    endpoints: AuthEndpoints,
}

impl HttpAuthApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(base_url, AuthEndpoints::default(), DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_options(
        base_url: &str,
        endpoints: AuthEndpoints,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid api base url '{base_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url,
            endpoints,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Where the browser is sent to start Google sign-in. The OAuth exchange
    /// itself happens on the server.
    pub fn google_sign_in_url(&self) -> Result<Url> {
        self.endpoint_url(&self.endpoints.google_oauth)
    }

    fn endpoint_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    async fn post<B>(&self, path: &str, body: &B) -> std::result::Result<Vec<u8>, ApiFailure>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self
            .endpoint_url(path)
            .map_err(|err| ApiFailure::Transport(format!("{err:#}")))?;

        let response = self
            .http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| {
                warn!("auth api: request failed url={url} error={err}");
                ApiFailure::Transport(err.to_string())
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|err| {
            warn!("auth api: response body unreadable url={url} error={err}");
            ApiFailure::Transport(err.to_string())
        })?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        // A rejection body that is not `{message}` still counts as a rejection.
        let body = serde_json::from_slice::<ApiError>(&bytes).unwrap_or_default();
        warn!(
            "auth api: rejected url={url} status={} has_message={}",
            status.as_u16(),
            body.message.is_some()
        );
        Err(ApiFailure::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn post_for<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, ApiFailure>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = self.post(path, body).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            warn!("auth api: undecodable success body path={path} error={err}");
            ApiFailure::MalformedResponse(err.to_string())
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn request_otp(&self, request: &OtpRequest) -> std::result::Result<(), ApiFailure> {
        self.post(&self.endpoints.request_otp, request)
            .await
            .map(|_| ())
    }

    async fn verify_otp(&self, request: &OtpVerification) -> std::result::Result<(), ApiFailure> {
        self.post(&self.endpoints.verify_otp, request)
            .await
            .map(|_| ())
    }

    async fn complete_registration(
        &self,
        request: &RegistrationRequest,
    ) -> std::result::Result<AuthGrant, ApiFailure> {
        self.post_for(&self.endpoints.complete_registration, request)
            .await
    }

    async fn login(&self, request: &LoginRequest) -> std::result::Result<AuthGrant, ApiFailure> {
        self.post_for(&self.endpoints.login, request).await
    }
}
