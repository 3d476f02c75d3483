use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shared::{
    domain::{Session, UserType},
    protocol::LoginRequest,
};
use tracing::{error, info, warn};

use crate::{
    error::{FlowError, Operation, ValidationError},
    session_manager::SessionManager,
    AuthApi,
};

#[derive(Debug, Default)]
struct LoginState {
    busy: bool,
    flight: u64,
    error: Option<String>,
}

/// Clears `busy` if the submission is dropped before the server answers.
struct Submission<'a> {
    inner: &'a Mutex<LoginState>,
    flight: u64,
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.flight == self.flight && state.busy {
            state.busy = false;
            info!("login: submission dropped before it settled");
        }
    }
}

/// Identifier + password login. A success is handed to [`SessionManager::establish`].
pub struct LoginFlow {
    api: Arc<dyn AuthApi>,
    sessions: Arc<SessionManager>,
    inner: Mutex<LoginState>,
}

impl LoginFlow {
    pub fn new(api: Arc<dyn AuthApi>, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            api,
            sessions,
            inner: Mutex::new(LoginState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, LoginState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Editing either field dismisses the previous error.
    pub async fn clear_error(&self) {
        self.state().error = None;
    }

    pub async fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        intended_role: UserType,
    ) -> Result<Session, FlowError> {
        let operation = Operation::Login;
        let identifier = identifier.trim();

        let _submission = {
            let mut state = self.state();
            if state.busy {
                return Err(FlowError::Busy { operation });
            }
            let invalid = if identifier.is_empty() {
                Some(ValidationError::MissingIdentifier)
            } else if password.is_empty() {
                Some(ValidationError::MissingPassword)
            } else {
                None
            };
            if let Some(invalid) = invalid {
                let err = FlowError::from(invalid);
                state.error = Some(err.to_string());
                return Err(err);
            }
            state.busy = true;
            state.flight += 1;
            state.error = None;
            Submission {
                inner: &self.inner,
                flight: state.flight,
            }
        };

        info!("login: submitting role={intended_role}");
        let result = self
            .api
            .login(&LoginRequest {
                identifier: identifier.to_string(),
                password: password.to_string(),
                user_type: intended_role,
            })
            .await;

        let grant = {
            let mut state = self.state();
            state.busy = false;
            match result {
                Ok(grant) => grant,
                Err(failure) => {
                    warn!("login: failed error={failure}");
                    let err = FlowError::from_api(operation, failure);
                    state.error = Some(err.to_string());
                    return Err(err);
                }
            }
        };

        let session = grant.into_session();
        if let Err(err) = self.sessions.establish(session.clone()).await {
            error!("login: session not stored error={err:#}");
            let err = FlowError::Persistence(format!("{err:#}"));
            self.state().error = Some(err.to_string());
            return Err(err);
        }

        info!("login: succeeded role={} host={}", session.role, session.is_host);
        Ok(session)
    }
}

#[cfg(test)]
#[path = "tests/login_tests.rs"]
mod tests;
