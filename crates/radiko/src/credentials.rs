use std::fmt;

use crate::RecordError;

pub const MAIL_ENV: &str = "RADIKO_MAIL";
pub const PASSWORD_ENV: &str = "RADIKO_PASSWORD";

/// Member login pair. Read once at session start and never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Reads `RADIKO_MAIL` and `RADIKO_PASSWORD`.
    pub fn from_env() -> Result<Self, RecordError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RecordError> {
        let read = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    RecordError::ConfigError(format!("{name} is not set in the environment"))
                })
        };
        Ok(Self::new(read(MAIL_ENV)?, read(PASSWORD_ENV)?))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"*".repeat(self.secret.chars().count()))
            .finish()
    }
}
