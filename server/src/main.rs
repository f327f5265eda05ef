use std::sync::Arc;

use clap::Parser;
use log::info;

use server::config::ServerConfig;
use server::repository::MongoRepository;
use server::server::Server;

/// Authoritative server for the online chess service.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Interface to bind to
    #[clap(long, env = "CHESS_LISTEN_HOST", default_value = "0.0.0.0")]
    listen_host: String,

    /// TCP port to listen on
    #[clap(long, env = "CHESS_LISTEN_PORT", default_value_t = 8765)]
    listen_port: u16,

    /// MongoDB connection string
    #[clap(long, env = "CHESS_DB_URI", default_value = "mongodb://localhost:27017")]
    db_uri: String,

    /// Database name
    #[clap(long, env = "CHESS_DB_NAME", default_value = "chess_game")]
    db_name: String,

    /// bcrypt work factor for new passwords
    #[clap(long, env = "CHESS_HASH_COST", default_value_t = 12)]
    password_hash_cost: u32,

    /// Maximum rating difference for random pairing (unbounded if omitted)
    #[clap(long, env = "CHESS_RATING_WINDOW")]
    match_rating_window: Option<i32>,

    /// Disconnect sessions idle for this many seconds
    #[clap(long, env = "CHESS_IDLE_TIMEOUT", default_value_t = 300)]
    idle_timeout_seconds: u64,

    /// Expire pending challenges after this many seconds
    #[clap(long, env = "CHESS_CHALLENGE_TTL", default_value_t = 60)]
    challenge_ttl_seconds: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen_host: self.listen_host,
            listen_port: self.listen_port,
            db_uri: self.db_uri,
            db_name: self.db_name,
            password_hash_cost: self.password_hash_cost,
            match_rating_window: self.match_rating_window,
            idle_timeout: std::time::Duration::from_secs(self.idle_timeout_seconds),
            challenge_ttl: std::time::Duration::from_secs(self.challenge_ttl_seconds),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let config = Args::parse().into_config();
    info!(
        "starting chess server on {} (db: {})",
        config.listen_addr(),
        config.db_name
    );

    let repo = MongoRepository::connect(&config.db_uri, &config.db_name).await?;

    let mut server = Server::new(config, Arc::new(repo));
    server.run().await?;
    Ok(())
}
