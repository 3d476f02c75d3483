use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::protocol::{
    AuthGrant, AuthUser, LoginRequest, OtpRequest, OtpVerification, RegistrationRequest,
};
use storage::MemorySessionStore;
use tokio::sync::{Mutex, Semaphore};

use crate::{ApiFailure, AuthApi, SessionManager};

/// `AuthApi` that replays queued verdicts and records every request it sees.
/// With an empty queue each call succeeds.
#[derive(Default)]
pub(crate) struct ScriptedAuthApi {
    otp_requests: Mutex<Vec<OtpRequest>>,
    verifications: Mutex<Vec<OtpVerification>>,
    registrations: Mutex<Vec<RegistrationRequest>>,
    logins: Mutex<Vec<LoginRequest>>,
    otp_replies: Mutex<VecDeque<Result<(), ApiFailure>>>,
    verify_replies: Mutex<VecDeque<Result<(), ApiFailure>>>,
    registration_replies: Mutex<VecDeque<Result<AuthGrant, ApiFailure>>>,
    login_replies: Mutex<VecDeque<Result<AuthGrant, ApiFailure>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedAuthApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every call blocks after recording its request until [`Self::release`].
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) async fn reply_to_otp_request(&self, reply: Result<(), ApiFailure>) {
        self.otp_replies.lock().await.push_back(reply);
    }

    pub(crate) async fn reply_to_verification(&self, reply: Result<(), ApiFailure>) {
        self.verify_replies.lock().await.push_back(reply);
    }

    pub(crate) async fn reply_to_registration(&self, reply: Result<AuthGrant, ApiFailure>) {
        self.registration_replies.lock().await.push_back(reply);
    }

    pub(crate) async fn reply_to_login(&self, reply: Result<AuthGrant, ApiFailure>) {
        self.login_replies.lock().await.push_back(reply);
    }

    pub(crate) async fn otp_requests(&self) -> Vec<OtpRequest> {
        self.otp_requests.lock().await.clone()
    }

    pub(crate) async fn verifications(&self) -> Vec<OtpVerification> {
        self.verifications.lock().await.clone()
    }

    pub(crate) async fn registrations(&self) -> Vec<RegistrationRequest> {
        self.registrations.lock().await.clone()
    }

    pub(crate) async fn logins(&self) -> Vec<LoginRequest> {
        self.logins.lock().await.clone()
    }

    pub(crate) async fn total_calls(&self) -> usize {
        self.otp_requests().await.len()
            + self.verifications().await.len()
            + self.registrations().await.len()
            + self.logins().await.len()
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
    }
}

#[async_trait]
impl AuthApi for ScriptedAuthApi {
    async fn request_otp(&self, request: &OtpRequest) -> Result<(), ApiFailure> {
        self.otp_requests.lock().await.push(request.clone());
        self.wait_for_gate().await;
        self.otp_replies.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn verify_otp(&self, request: &OtpVerification) -> Result<(), ApiFailure> {
        self.verifications.lock().await.push(request.clone());
        self.wait_for_gate().await;
        self.verify_replies.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn complete_registration(
        &self,
        request: &RegistrationRequest,
    ) -> Result<AuthGrant, ApiFailure> {
        self.registrations.lock().await.push(request.clone());
        self.wait_for_gate().await;
        self.registration_replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(grant_for_mobile(&request.mobile, request.user_type.is_host())))
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthGrant, ApiFailure> {
        self.logins.lock().await.push(request.clone());
        self.wait_for_gate().await;
        self.login_replies.lock().await.pop_front().unwrap_or_else(|| {
            Ok(AuthGrant {
                token: "jwt-login".into(),
                user: AuthUser {
                    email: Some(request.identifier.clone()),
                    is_host: request.user_type.is_host(),
                    role: Some(request.user_type.as_str().into()),
                    ..AuthUser::default()
                },
            })
        })
    }
}

pub(crate) fn grant_for_mobile(mobile: &str, is_host: bool) -> AuthGrant {
    AuthGrant {
        token: "jwt-registered".into(),
        user: AuthUser {
            mobile: Some(mobile.into()),
            email: None,
            is_host,
            role: Some(if is_host { "host" } else { "user" }.into()),
        },
    }
}

pub(crate) fn memory_sessions() -> (Arc<MemorySessionStore>, Arc<SessionManager>) {
    let store = Arc::new(MemorySessionStore::new());
    let sessions = SessionManager::new(store.clone());
    (store, sessions)
}

/// Polls `probe` until it holds, giving spawned tasks a chance to run.
pub(crate) async fn wait_until<F, Fut>(mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !probe().await {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
