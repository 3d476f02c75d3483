use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{
    domain::{Session, UserType},
    protocol::{OtpRequest, OtpVerification, RegistrationRequest},
};
use tracing::{error, info, warn};

use crate::{
    error::{FlowError, Operation, ValidationError},
    session_manager::SessionManager,
    AuthApi,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegistrationStage {
    #[default]
    CollectMobile,
    AwaitOtpVerification,
    CollectProfile,
    /// Terminal: the draft was consumed and a session issued.
    Completed,
}

impl RegistrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectMobile => "collect_mobile",
            Self::AwaitOtpVerification => "await_otp_verification",
            Self::CollectProfile => "collect_profile",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-3 form contents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProfileSubmission {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
    pub terms_accepted: bool,
}

impl ProfileSubmission {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.password != self.password_confirmation {
            return Err(ValidationError::PasswordMismatch);
        }
        if !self.terms_accepted {
            return Err(ValidationError::TermsNotAccepted);
        }
        Ok(())
    }
}

impl fmt::Debug for ProfileSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileSubmission")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("password_confirmation", &"<redacted>")
            .field("terms_accepted", &self.terms_accepted)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSnapshot {
    pub stage: RegistrationStage,
    pub mobile_number: Option<String>,
    pub intended_role: UserType,
    pub busy: Option<Operation>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct RegistrationDraft {
    mobile_number: Option<String>,
    one_time_code: Option<String>,
    intended_role: UserType,
    profile: Option<ProfileSubmission>,
}

impl RegistrationDraft {
    fn registration_request(&self) -> Option<RegistrationRequest> {
        let profile = self.profile.as_ref()?;
        Some(RegistrationRequest {
            mobile: self.mobile_number.clone()?,
            otp: self.one_time_code.clone()?,
            name: profile.name.clone(),
            email: profile.email.clone(),
            password: profile.password.clone(),
            user_type: self.intended_role,
        })
    }
}

#[derive(Debug, Default)]
struct FlowState {
    stage: RegistrationStage,
    draft: RegistrationDraft,
    busy: Option<Operation>,
    // Bumped on back-navigation and abandon; responses from an older epoch are dropped.
    epoch: u64,
    // Bumped by every call that reaches the network.
    flight: u64,
    error: Option<String>,
}

impl FlowState {
    fn ensure_stage(
        &self,
        operation: &'static str,
        expected: RegistrationStage,
    ) -> Result<(), FlowError> {
        if self.stage != expected {
            return Err(FlowError::WrongStage {
                operation,
                stage: self.stage,
            });
        }
        Ok(())
    }

    fn ensure_idle(&self, operation: Operation) -> Result<(), FlowError> {
        if self.busy.is_some() {
            return Err(FlowError::Busy { operation });
        }
        Ok(())
    }

    fn begin(&mut self, operation: Operation) -> u64 {
        self.flight += 1;
        self.busy = Some(operation);
        self.error = None;
        self.epoch
    }

    fn settle(&mut self, epoch: u64, operation: Operation) -> Result<(), FlowError> {
        if self.epoch != epoch {
            info!("registration: ignoring stale {operation} response");
            return Err(FlowError::Superseded);
        }
        self.busy = None;
        Ok(())
    }

    fn reject(&mut self, err: FlowError) -> FlowError {
        self.error = Some(err.to_string());
        err
    }

    fn rewind(&mut self, stage: RegistrationStage) {
        self.draft.one_time_code = None;
        self.draft.profile = None;
        self.stage = stage;
        self.busy = None;
        self.error = None;
        self.epoch += 1;
    }
}

fn lock_state(inner: &Mutex<FlowState>) -> MutexGuard<'_, FlowState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the busy marker when an in-flight call is dropped before it settles.
struct InFlight<'a> {
    inner: &'a Mutex<FlowState>,
    flight: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = lock_state(self.inner);
        if state.flight == self.flight && state.busy.take().is_some() {
            info!("registration: in-flight call dropped before it settled");
        }
    }
}

/// Drives OTP-gated self-registration: request OTP, verify it, then submit the profile.
///
/// The stage only moves forward on a success reported by the server. The flow
/// is meant to be shared behind an `Arc`; a second submission while one is in
/// flight fails with [`FlowError::Busy`] instead of reaching the network.
pub struct RegistrationFlow {
    api: Arc<dyn AuthApi>,
    sessions: Arc<SessionManager>,
    inner: Mutex<FlowState>,
}

impl RegistrationFlow {
    pub fn new(api: Arc<dyn AuthApi>, sessions: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            api,
            sessions,
            inner: Mutex::new(FlowState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, FlowState> {
        lock_state(&self.inner)
    }

    fn in_flight(&self, state: &FlowState) -> InFlight<'_> {
        InFlight {
            inner: &self.inner,
            flight: state.flight,
        }
    }

    pub async fn stage(&self) -> RegistrationStage {
        self.state().stage
    }

    pub async fn snapshot(&self) -> RegistrationSnapshot {
        let state = self.state();
        RegistrationSnapshot {
            stage: state.stage,
            mobile_number: state.draft.mobile_number.clone(),
            intended_role: state.draft.intended_role,
            busy: state.busy,
            error: state.error.clone(),
        }
    }

    /// Last profile submitted at stage 3, kept so a failed attempt can be retried as is.
    pub async fn retained_profile(&self) -> Option<ProfileSubmission> {
        self.state().draft.profile.clone()
    }

    pub async fn request_otp(
        &self,
        mobile_number: &str,
        intended_role: UserType,
    ) -> Result<(), FlowError> {
        let operation = Operation::RequestOtp;
        let mobile = mobile_number.trim().to_string();

        let (epoch, _in_flight) = {
            let mut state = self.state();
            state.ensure_stage(operation.as_str(), RegistrationStage::CollectMobile)?;
            state.ensure_idle(operation)?;
            if mobile.is_empty() {
                return Err(state.reject(ValidationError::MissingMobileNumber.into()));
            }
            let epoch = state.begin(operation);
            (epoch, self.in_flight(&state))
        };

        info!("registration: requesting otp role={intended_role}");
        let result = self
            .api
            .request_otp(&OtpRequest {
                mobile: mobile.clone(),
            })
            .await;

        let mut state = self.state();
        state.settle(epoch, operation)?;
        match result {
            Ok(()) => {
                state.draft.mobile_number = Some(mobile);
                state.draft.intended_role = intended_role;
                state.draft.one_time_code = None;
                state.stage = RegistrationStage::AwaitOtpVerification;
                info!("registration: otp issued stage={}", state.stage);
                Ok(())
            }
            Err(failure) => {
                warn!("registration: otp request failed error={failure}");
                Err(state.reject(FlowError::from_api(operation, failure)))
            }
        }
    }

    pub async fn verify_otp(&self, code: &str) -> Result<(), FlowError> {
        let operation = Operation::VerifyOtp;
        let code = code.trim().to_string();

        let (epoch, request, _in_flight) = {
            let mut state = self.state();
            state.ensure_stage(operation.as_str(), RegistrationStage::AwaitOtpVerification)?;
            state.ensure_idle(operation)?;
            if code.is_empty() {
                return Err(state.reject(ValidationError::MissingOneTimeCode.into()));
            }
            let mobile = state
                .draft
                .mobile_number
                .clone()
                .ok_or(FlowError::WrongStage {
                    operation: operation.as_str(),
                    stage: state.stage,
                })?;
            let request = OtpVerification {
                mobile,
                otp: code.clone(),
                user_type: state.draft.intended_role,
            };
            let epoch = state.begin(operation);
            (epoch, request, self.in_flight(&state))
        };

        let result = self.api.verify_otp(&request).await;

        let mut state = self.state();
        state.settle(epoch, operation)?;
        match result {
            Ok(()) => {
                state.draft.one_time_code = Some(code);
                state.stage = RegistrationStage::CollectProfile;
                info!("registration: otp verified stage={}", state.stage);
                Ok(())
            }
            Err(failure) => {
                warn!("registration: otp verification failed error={failure}");
                Err(state.reject(FlowError::from_api(operation, failure)))
            }
        }
    }

    /// Back to stage 1 without contacting the server. The issued OTP is forgotten.
    pub async fn return_to_mobile_stage(&self) -> Result<(), FlowError> {
        let mut state = self.state();
        state.ensure_stage(
            "return_to_mobile_stage",
            RegistrationStage::AwaitOtpVerification,
        )?;
        state.rewind(RegistrationStage::CollectMobile);
        info!("registration: returned to mobile stage");
        Ok(())
    }

    /// Back from the profile form to OTP entry; the code must be verified again.
    pub async fn return_to_otp_stage(&self) -> Result<(), FlowError> {
        let mut state = self.state();
        state.ensure_stage("return_to_otp_stage", RegistrationStage::CollectProfile)?;
        state.rewind(RegistrationStage::AwaitOtpVerification);
        info!("registration: returned to otp stage");
        Ok(())
    }

    pub async fn complete_registration(
        &self,
        profile: ProfileSubmission,
    ) -> Result<Session, FlowError> {
        let operation = Operation::CompleteRegistration;

        let (epoch, request, _in_flight) = {
            let mut state = self.state();
            state.ensure_stage(operation.as_str(), RegistrationStage::CollectProfile)?;
            state.ensure_idle(operation)?;

            let validation = profile.validate();
            state.draft.profile = Some(profile);
            if let Err(err) = validation {
                return Err(state.reject(err.into()));
            }

            let request = state
                .draft
                .registration_request()
                .ok_or(FlowError::WrongStage {
                    operation: operation.as_str(),
                    stage: state.stage,
                })?;
            let epoch = state.begin(operation);
            (epoch, request, self.in_flight(&state))
        };

        let result = self.api.complete_registration(&request).await;

        let grant = {
            let mut state = self.state();
            state.settle(epoch, operation)?;
            match result {
                Ok(grant) => {
                    state.draft = RegistrationDraft::default();
                    state.stage = RegistrationStage::Completed;
                    grant
                }
                Err(failure) => {
                    warn!("registration: final submission failed error={failure}");
                    return Err(state.reject(FlowError::from_api(operation, failure)));
                }
            }
        };

        let session = grant.into_session();
        self.sessions
            .establish(session.clone())
            .await
            .map_err(|err| {
                error!("registration: account created but session not stored error={err:#}");
                FlowError::Persistence(format!("{err:#}"))
            })?;

        info!("registration: completed role={}", session.role);
        Ok(session)
    }

    /// Drops the draft and starts over. An in-flight response is ignored when it lands.
    pub async fn abandon(&self) {
        let mut state = self.state();
        let epoch = state.epoch + 1;
        let flight = state.flight;
        *state = FlowState {
            epoch,
            flight,
            ..FlowState::default()
        };
        info!("registration: abandoned");
    }
}

#[cfg(test)]
#[path = "tests/registration_tests.rs"]
mod tests;
