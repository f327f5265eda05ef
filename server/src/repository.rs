//! User and game persistence
//!
//! Everything durable goes through the [`Repository`] trait: a MongoDB
//! implementation for production and an in-memory one backing the tests.
//! Two collections exist, `users` and `games`; ratings and counters are
//! mutated only through [`Repository::record_result`] so a finalized game
//! and its rating update land together.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::message::{EndCause, GameOutcome, PersonalResult};

use crate::rating::DEFAULT_RATING;

pub type UserId = String;
pub type GameId = String;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("username already taken")]
    DuplicateUsername,

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Backend(#[from] mongodb::error::Error),
}

/// A persistent user.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
    pub rating: i32,
    pub games: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredGameStatus {
    Active,
    Completed,
    Aborted,
}

/// A persistent game. Inserted as `Active` when play starts; the move list
/// and position are appended move by move, and the terminal fields are
/// written once on finalization.
#[derive(Debug, Clone)]
pub struct GameRecord {
    pub id: GameId,
    pub white_player_id: UserId,
    /// `None` for games against the AI opponent.
    pub black_player_id: Option<UserId>,
    pub white_username: String,
    pub black_username: String,
    pub moves: Vec<String>,
    pub pgn: String,
    pub fen: String,
    pub status: StoredGameStatus,
    pub result: Option<GameOutcome>,
    pub cause: Option<EndCause>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, RepositoryError>;

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RepositoryError>;

    async fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>, RepositoryError>;

    /// Applies one game's outcome to a user: new rating plus the matching
    /// counter bump, in a single update.
    async fn record_result(
        &self,
        id: &UserId,
        new_rating: i32,
        personal: PersonalResult,
    ) -> Result<(), RepositoryError>;

    async fn insert_game(&self, game: &GameRecord) -> Result<(), RepositoryError>;

    /// Appends an accepted move and the post-move position.
    async fn append_move(
        &self,
        game_id: &GameId,
        uci: &str,
        fen: &str,
    ) -> Result<(), RepositoryError>;

    #[allow(clippy::too_many_arguments)]
    async fn finalize_game(
        &self,
        game_id: &GameId,
        status: StoredGameStatus,
        result: GameOutcome,
        cause: EndCause,
        fen: &str,
        pgn: &str,
        end_time: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Most recently completed games involving the user, newest first.
    async fn recent_games(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<GameRecord>, RepositoryError>;
}

// ---------------------------------------------------------------------------
// MongoDB
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    #[serde(rename = "_id")]
    id: ObjectId,
    username: String,
    password_hash: String,
    rating: i32,
    games: i64,
    wins: i64,
    losses: i64,
    draws: i64,
    created_at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct GameDoc {
    #[serde(rename = "_id")]
    id: String,
    white_player_id: String,
    black_player_id: Option<String>,
    white_username: String,
    black_username: String,
    moves: Vec<String>,
    pgn: String,
    fen: String,
    status: StoredGameStatus,
    result: Option<GameOutcome>,
    cause: Option<EndCause>,
    start_time: BsonDateTime,
    end_time: Option<BsonDateTime>,
}

impl From<UserDoc> for UserRecord {
    fn from(doc: UserDoc) -> Self {
        Self {
            id: doc.id.to_hex(),
            username: doc.username,
            password_hash: doc.password_hash,
            rating: doc.rating,
            games: doc.games,
            wins: doc.wins,
            losses: doc.losses,
            draws: doc.draws,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

impl From<GameDoc> for GameRecord {
    fn from(doc: GameDoc) -> Self {
        Self {
            id: doc.id,
            white_player_id: doc.white_player_id,
            black_player_id: doc.black_player_id,
            white_username: doc.white_username,
            black_username: doc.black_username,
            moves: doc.moves,
            pgn: doc.pgn,
            fen: doc.fen,
            status: doc.status,
            result: doc.result,
            cause: doc.cause,
            start_time: doc.start_time.to_chrono(),
            end_time: doc.end_time.map(|t| t.to_chrono()),
        }
    }
}

fn game_doc(record: &GameRecord) -> GameDoc {
    GameDoc {
        id: record.id.clone(),
        white_player_id: record.white_player_id.clone(),
        black_player_id: record.black_player_id.clone(),
        white_username: record.white_username.clone(),
        black_username: record.black_username.clone(),
        moves: record.moves.clone(),
        pgn: record.pgn.clone(),
        fen: record.fen.clone(),
        status: record.status,
        result: record.result,
        cause: record.cause,
        start_time: BsonDateTime::from_chrono(record.start_time),
        end_time: record.end_time.map(BsonDateTime::from_chrono),
    }
}

fn personal_counter(personal: PersonalResult) -> &'static str {
    match personal {
        PersonalResult::Win => "wins",
        PersonalResult::Loss => "losses",
        PersonalResult::Draw => "draws",
    }
}

/// Production repository on top of MongoDB.
pub struct MongoRepository {
    users: Collection<UserDoc>,
    games: Collection<GameDoc>,
}

impl MongoRepository {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, RepositoryError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);

        let repo = Self {
            users: db.collection("users"),
            games: db.collection("games"),
        };

        repo.users
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "username": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        info!("connected to database {db_name}");
        Ok(repo)
    }
}

#[async_trait]
impl Repository for MongoRepository {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, RepositoryError> {
        if self
            .users
            .find_one(doc! { "username": username })
            .await?
            .is_some()
        {
            return Err(RepositoryError::DuplicateUsername);
        }

        let doc = UserDoc {
            id: ObjectId::new(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            rating: DEFAULT_RATING,
            games: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            created_at: BsonDateTime::from_chrono(Utc::now()),
        };
        self.users.insert_one(&doc).await?;
        Ok(doc.into())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RepositoryError> {
        Ok(self
            .users
            .find_one(doc! { "username": username })
            .await?
            .map(Into::into))
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>, RepositoryError> {
        let oid = match ObjectId::parse_str(id) {
            Ok(oid) => oid,
            Err(_) => return Ok(None),
        };
        Ok(self
            .users
            .find_one(doc! { "_id": oid })
            .await?
            .map(Into::into))
    }

    async fn record_result(
        &self,
        id: &UserId,
        new_rating: i32,
        personal: PersonalResult,
    ) -> Result<(), RepositoryError> {
        let oid = ObjectId::parse_str(id).map_err(|_| RepositoryError::NotFound)?;

        let mut counters = mongodb::bson::Document::new();
        counters.insert("games", 1i64);
        counters.insert(personal_counter(personal), 1i64);

        let update = self
            .users
            .update_one(
                doc! { "_id": oid },
                doc! { "$set": { "rating": new_rating }, "$inc": counters },
            )
            .await?;
        if update.matched_count == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn insert_game(&self, game: &GameRecord) -> Result<(), RepositoryError> {
        self.games.insert_one(game_doc(game)).await?;
        Ok(())
    }

    async fn append_move(
        &self,
        game_id: &GameId,
        uci: &str,
        fen: &str,
    ) -> Result<(), RepositoryError> {
        let update = self
            .games
            .update_one(
                doc! { "_id": game_id },
                doc! { "$push": { "moves": uci }, "$set": { "fen": fen } },
            )
            .await?;
        if update.matched_count == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn finalize_game(
        &self,
        game_id: &GameId,
        status: StoredGameStatus,
        result: GameOutcome,
        cause: EndCause,
        fen: &str,
        pgn: &str,
        end_time: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let status = mongodb::bson::to_bson(&status).map_err(mongodb::error::Error::from)?;
        let result = mongodb::bson::to_bson(&result).map_err(mongodb::error::Error::from)?;
        let cause = mongodb::bson::to_bson(&cause).map_err(mongodb::error::Error::from)?;

        let update = self
            .games
            .update_one(
                doc! { "_id": game_id },
                doc! {
                    "$set": {
                        "status": status,
                        "result": result,
                        "cause": cause,
                        "fen": fen,
                        "pgn": pgn,
                        "end_time": BsonDateTime::from_chrono(end_time),
                    }
                },
            )
            .await?;
        if update.matched_count == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn recent_games(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<GameRecord>, RepositoryError> {
        let filter = doc! {
            "$or": [
                { "white_player_id": user_id },
                { "black_player_id": user_id },
            ],
            "status": { "$ne": "active" },
        };

        let mut cursor = self
            .games
            .find(filter)
            .sort(doc! { "end_time": -1 })
            .limit(limit)
            .await?;

        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            out.push(doc.into());
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserRecord>,
    games: HashMap<GameId, GameRecord>,
    next_user: u64,
}

/// Hermetic repository used by the test suite.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, RepositoryError> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.username == username) {
            return Err(RepositoryError::DuplicateUsername);
        }

        state.next_user += 1;
        let record = UserRecord {
            id: format!("user-{:04}", state.next_user),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            rating: DEFAULT_RATING,
            games: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            created_at: Utc::now(),
        };
        state.users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<UserRecord>, RepositoryError> {
        Ok(self.lock().users.get(id).cloned())
    }

    async fn record_result(
        &self,
        id: &UserId,
        new_rating: i32,
        personal: PersonalResult,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let user = state.users.get_mut(id).ok_or(RepositoryError::NotFound)?;
        user.rating = new_rating;
        user.games += 1;
        match personal {
            PersonalResult::Win => user.wins += 1,
            PersonalResult::Loss => user.losses += 1,
            PersonalResult::Draw => user.draws += 1,
        }
        Ok(())
    }

    async fn insert_game(&self, game: &GameRecord) -> Result<(), RepositoryError> {
        self.lock().games.insert(game.id.clone(), game.clone());
        Ok(())
    }

    async fn append_move(
        &self,
        game_id: &GameId,
        uci: &str,
        fen: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let game = state.games.get_mut(game_id).ok_or(RepositoryError::NotFound)?;
        game.moves.push(uci.to_string());
        game.fen = fen.to_string();
        Ok(())
    }

    async fn finalize_game(
        &self,
        game_id: &GameId,
        status: StoredGameStatus,
        result: GameOutcome,
        cause: EndCause,
        fen: &str,
        pgn: &str,
        end_time: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let game = state.games.get_mut(game_id).ok_or(RepositoryError::NotFound)?;
        game.status = status;
        game.result = Some(result);
        game.cause = Some(cause);
        game.fen = fen.to_string();
        game.pgn = pgn.to_string();
        game.end_time = Some(end_time);
        Ok(())
    }

    async fn recent_games(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<GameRecord>, RepositoryError> {
        let state = self.lock();
        let mut games: Vec<GameRecord> = state
            .games
            .values()
            .filter(|g| {
                g.status != StoredGameStatus::Active
                    && (&g.white_player_id == user_id
                        || g.black_player_id.as_deref() == Some(user_id.as_str()))
            })
            .cloned()
            .collect();
        games.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        games.truncate(limit.max(0) as usize);
        Ok(games)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::INITIAL_FEN;

    fn active_game(id: &str, white: &str, black: Option<&str>) -> GameRecord {
        GameRecord {
            id: id.to_string(),
            white_player_id: white.to_string(),
            black_player_id: black.map(str::to_string),
            white_username: "w".into(),
            black_username: "b".into(),
            moves: Vec::new(),
            pgn: String::new(),
            fen: INITIAL_FEN.to_string(),
            status: StoredGameStatus::Active,
            result: None,
            cause: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    #[tokio::test]
    async fn test_create_user_rejects_duplicates() {
        let repo = MemoryRepository::new();
        let user = repo.create_user("alice", "hash").await.unwrap();
        assert_eq!(user.rating, DEFAULT_RATING);
        assert_eq!(user.games, 0);

        let err = repo.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateUsername));
    }

    #[tokio::test]
    async fn test_record_result_updates_counters() {
        let repo = MemoryRepository::new();
        let user = repo.create_user("alice", "hash").await.unwrap();

        repo.record_result(&user.id, 1216, PersonalResult::Win)
            .await
            .unwrap();
        repo.record_result(&user.id, 1208, PersonalResult::Loss)
            .await
            .unwrap();

        let user = repo.find_user(&user.id).await.unwrap().unwrap();
        assert_eq!(user.rating, 1208);
        assert_eq!(user.games, 2);
        assert_eq!(user.wins, 1);
        assert_eq!(user.losses, 1);
        assert_eq!(user.draws, 0);
    }

    #[tokio::test]
    async fn test_append_and_finalize() {
        let repo = MemoryRepository::new();
        repo.insert_game(&active_game("g1", "u1", Some("u2")))
            .await
            .unwrap();

        repo.append_move(&"g1".to_string(), "e2e4", "fen after e4")
            .await
            .unwrap();
        repo.finalize_game(
            &"g1".to_string(),
            StoredGameStatus::Completed,
            GameOutcome::WhiteWin,
            EndCause::Resignation,
            "final fen",
            "1. e4 1-0",
            Utc::now(),
        )
        .await
        .unwrap();

        let games = repo.recent_games(&"u2".to_string(), 10).await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].moves, vec!["e2e4"]);
        assert_eq!(games[0].result, Some(GameOutcome::WhiteWin));
        assert_eq!(games[0].status, StoredGameStatus::Completed);
    }

    #[tokio::test]
    async fn test_recent_games_excludes_active_and_sorts() {
        let repo = MemoryRepository::new();
        repo.insert_game(&active_game("g-active", "u1", Some("u2")))
            .await
            .unwrap();

        for (id, secs) in [("g-old", 10), ("g-new", 20)] {
            repo.insert_game(&active_game(id, "u1", Some("u2")))
                .await
                .unwrap();
            repo.finalize_game(
                &id.to_string(),
                StoredGameStatus::Completed,
                GameOutcome::Draw,
                EndCause::Agreement,
                "fen",
                "pgn",
                Utc::now() + chrono::Duration::seconds(secs),
            )
            .await
            .unwrap();
        }

        let games = repo.recent_games(&"u1".to_string(), 10).await.unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].id, "g-new");
        assert_eq!(games[1].id, "g-old");

        let limited = repo.recent_games(&"u1".to_string(), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let repo = MemoryRepository::new();
        assert!(repo.find_user(&"nope".to_string()).await.unwrap().is_none());
        assert!(matches!(
            repo.append_move(&"nope".to_string(), "e2e4", "fen").await,
            Err(RepositoryError::NotFound)
        ));
    }
}
