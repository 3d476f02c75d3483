use std::fmt;

use shared::error::ApiError;
use thiserror::Error;

use crate::registration::RegistrationStage;

/// Local input problems caught before anything is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter your mobile number.")]
    MissingMobileNumber,
    #[error("Please enter the OTP sent to your mobile.")]
    MissingOneTimeCode,
    #[error("Passwords do not match.")]
    PasswordMismatch,
    #[error("Please agree to the terms and conditions.")]
    TermsNotAccepted,
    #[error("Please enter your mobile number or email.")]
    MissingIdentifier,
    #[error("Please enter your password.")]
    MissingPassword,
}

/// Outcome of an auth endpoint call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiFailure {
    /// The request never got a response.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("server rejected request with status {status}")]
    Rejected { status: u16, body: ApiError },
    /// A success status whose body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ApiFailure {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: ApiError::new(message),
        }
    }
}

/// Network-backed operations of the auth flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RequestOtp,
    VerifyOtp,
    CompleteRegistration,
    Login,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestOtp => "request_otp",
            Self::VerifyOtp => "verify_otp",
            Self::CompleteRegistration => "complete_registration",
            Self::Login => "login",
        }
    }

    pub fn rejection_default(self) -> &'static str {
        match self {
            Self::RequestOtp => "Failed to send OTP.",
            Self::VerifyOtp => "Invalid OTP.",
            Self::CompleteRegistration => "Registration failed.",
            Self::Login => "Invalid credentials.",
        }
    }

    pub fn transport_message(self) -> &'static str {
        match self {
            Self::RequestOtp => "Network error during OTP send.",
            Self::VerifyOtp => "Network error during OTP verification.",
            Self::CompleteRegistration => "Network error during registration.",
            Self::Login => "Network error during login.",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a flow operation can fail with. The `Display` output of the
/// validation, transport and rejection variants is the text shown inline to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Transport { message: String },
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("{operation} is not available at stage {stage}")]
    WrongStage {
        operation: &'static str,
        stage: RegistrationStage,
    },
    #[error("{operation} is already in progress")]
    Busy { operation: Operation },
    #[error("response arrived after the flow moved on")]
    Superseded,
    #[error("failed to persist session: {0}")]
    Persistence(String),
}

impl FlowError {
    pub fn from_api(operation: Operation, failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Rejected { status, body } => Self::Rejected {
                status,
                message: body.message_or(operation.rejection_default()),
            },
            ApiFailure::Transport(_) | ApiFailure::MalformedResponse(_) => Self::Transport {
                message: operation.transport_message().to_string(),
            },
        }
    }

    /// Errors that belong next to the form fields of the current stage.
    pub fn is_stage_local(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Transport { .. } | Self::Rejected { .. }
        )
    }
}
