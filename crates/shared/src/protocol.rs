use serde::{Deserialize, Serialize};

use crate::domain::{Session, UserType, DEFAULT_ROLE};

/// Body of the OTP issuance call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRequest {
    pub mobile: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpVerification {
    pub mobile: String,
    pub otp: String,
    #[serde(rename = "userType")]
    pub user_type: UserType,
}

/// Final registration submission: the whole draft in one body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub mobile: String,
    pub otp: String,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "userType")]
    pub user_type: UserType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    #[serde(rename = "userType")]
    pub user_type: UserType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "isHost", default)]
    pub is_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Success body of registration and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    #[serde(default)]
    pub user: AuthUser,
}

impl AuthGrant {
    pub fn into_session(self) -> Session {
        let AuthGrant { token, user } = self;
        let identity = user
            .mobile
            .filter(|m| !m.is_empty())
            .or(user.email)
            .unwrap_or_default();
        let role = user
            .role
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());
        Session {
            token,
            identity,
            is_host: user.is_host,
            role,
        }
    }
}
