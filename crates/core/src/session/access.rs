//! Session access control (public or password-protected)

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum password length for private sessions
const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Access {
    Public,
    Private { password_hash: String },
}

impl Access {
    /// Hash `password` into a private access policy
    pub fn private(password: &str) -> Result<Self> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Password(e.to_string()))?
            .to_string();

        Ok(Access::Private { password_hash })
    }

    /// Public unless a password is given
    pub fn from_password(password: Option<&str>) -> Result<Self> {
        match password {
            Some(p) => Self::private(p),
            None => Ok(Access::Public),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Access::Private { .. })
    }

    /// Check supplied credentials against this policy
    pub fn permits(&self, credentials: Option<&str>) -> bool {
        match self {
            Access::Public => true,
            Access::Private { password_hash } => {
                let Some(password) = credentials else {
                    return false;
                };
                let Ok(parsed) = PasswordHash::new(password_hash) else {
                    tracing::warn!("Stored session password hash is unparseable");
                    return false;
                };
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            }
        }
    }
}
