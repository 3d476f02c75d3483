use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ROLE: &str = "user";

/// Account type chosen by the "sign up / log in as host" toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    User,
    Host,
}

impl UserType {
    pub fn from_host_flag(is_host: bool) -> Self {
        if is_host {
            Self::Host
        } else {
            Self::User
        }
    }

    pub fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity as recognised by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    /// Mobile number or email, whichever the server reported.
    pub identity: String,
    pub is_host: bool,
    pub role: String,
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        identity: impl Into<String>,
        is_host: bool,
        role: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            identity: identity.into(),
            is_host,
            role: role.into(),
        }
    }
}

/// Observable session shape. There is no partially populated variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticated(Session),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Anonymous => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.session().map(|s| s.token.as_str())
    }

    pub fn identity(&self) -> Option<&str> {
        self.session().map(|s| s.identity.as_str())
    }

    pub fn is_host(&self) -> bool {
        self.session().is_some_and(|s| s.is_host)
    }

    pub fn role(&self) -> &str {
        self.session().map_or(DEFAULT_ROLE, |s| s.role.as_str())
    }

    /// Label shown next to the account icon in the navigation bar.
    pub fn display_label(&self) -> Option<String> {
        self.session()
            .map(|s| format!("{} ({})", s.identity, s.role))
    }
}

impl From<Option<Session>> for SessionState {
    fn from(value: Option<Session>) -> Self {
        value.map_or(Self::Anonymous, Self::Authenticated)
    }
}
