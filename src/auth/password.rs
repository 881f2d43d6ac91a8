//! Password-based SSH authentication.

use async_trait::async_trait;

use crate::error::Result;

use super::traits::{AuthStrategy, Credential};

/// Password authentication strategy.
///
/// Wraps a static secret. A rejected password surfaces from the connector
/// as an authentication error; there is no retry here.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    /// Create a new password authentication strategy.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn credential(&self) -> Result<Credential> {
        Ok(Credential::Password(self.password.clone()))
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
