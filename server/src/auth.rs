//! Registration and login against the user repository
//!
//! Passwords are stored as bcrypt hashes with a configurable work factor.
//! Login failures collapse to a single generic error so the wire never
//! reveals whether the username or the password was wrong.

use log::warn;
use rand::RngCore;
use thiserror::Error;

use crate::repository::{Repository, RepositoryError, UserRecord};

const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum RegisterError {
    /// Rejected before touching the repository; the message is safe to echo.
    #[error("{0}")]
    Invalid(String),

    #[error("username already taken")]
    Taken,

    #[error("registration failed")]
    Internal,
}

#[derive(Debug, Error)]
pub enum LoginError {
    /// Unknown user or wrong password; the caller must not distinguish.
    #[error("invalid username or password")]
    BadCredentials,

    #[error("login failed")]
    Internal,
}

/// Cheap to clone; worker tasks carry their own copy so credential checks
/// never run on the coordinator.
#[derive(Clone)]
pub struct AuthService {
    hash_cost: u32,
}

impl AuthService {
    pub fn new(hash_cost: u32) -> Self {
        Self { hash_cost }
    }

    /// Creates a new user with the default rating and zeroed counters.
    pub async fn register(
        &self,
        repo: &dyn Repository,
        username: &str,
        password: &str,
    ) -> Result<UserRecord, RegisterError> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(RegisterError::Invalid(format!(
                "username must be 1-{MAX_USERNAME_LEN} characters"
            )));
        }
        if !username.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(RegisterError::Invalid(
                "username may only contain letters, digits and underscores".into(),
            ));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(RegisterError::Invalid(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let hash = bcrypt::hash(password, self.hash_cost).map_err(|e| {
            warn!("password hashing failed: {e}");
            RegisterError::Internal
        })?;

        match repo.create_user(username, &hash).await {
            Ok(user) => Ok(user),
            Err(RepositoryError::DuplicateUsername) => Err(RegisterError::Taken),
            Err(e) => {
                warn!("user creation failed: {e}");
                Err(RegisterError::Internal)
            }
        }
    }

    /// Verifies credentials and returns the stored user on success.
    pub async fn login(
        &self,
        repo: &dyn Repository,
        username: &str,
        password: &str,
    ) -> Result<UserRecord, LoginError> {
        let user = match repo.find_user_by_username(username.trim()).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(LoginError::BadCredentials),
            Err(e) => {
                warn!("user lookup failed: {e}");
                return Err(LoginError::Internal);
            }
        };

        match bcrypt::verify(password, &user.password_hash) {
            Ok(true) => Ok(user),
            Ok(false) => Err(LoginError::BadCredentials),
            Err(e) => {
                warn!("password verification failed for {username}: {e}");
                Err(LoginError::BadCredentials)
            }
        }
    }

    /// Opaque session token handed back on login. The server identifies the
    /// user by session state, not by this token.
    pub fn mint_token(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
