//! Runtime configuration for the chess server

use std::time::Duration;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 8765;

/// All tunables recognized by the server, with their defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind, `0.0.0.0` by default.
    pub listen_host: String,
    pub listen_port: u16,
    pub db_uri: String,
    pub db_name: String,
    /// bcrypt work factor used when hashing new passwords.
    pub password_hash_cost: u32,
    /// Maximum rating difference for a random pairing. `None` means pure
    /// FIFO matchmaking.
    pub match_rating_window: Option<i32>,
    /// Sessions with no traffic for this long are disconnected.
    pub idle_timeout: Duration,
    /// Pending challenges expire after this long.
    pub challenge_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PORT,
            db_uri: "mongodb://localhost:27017".to_string(),
            db_name: "chess_game".to_string(),
            password_hash_cost: 12,
            match_rating_window: None,
            idle_timeout: Duration::from_secs(300),
            challenge_ttl: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}
