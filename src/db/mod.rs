use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::db::models::score::InvalidDifficulty;

pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::models::player::{Player, PlayerId, PlayerRef};
    pub use crate::db::models::score::{
        Difficulty, LeaderboardEntry, MergeOutcome, MergeResult, Score, SongKey, SongMetadata,
    };
    pub use crate::db::repositories::Repository;
    pub use crate::db::{DbError, DbResult, Store};
}

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle to the score database.
///
/// Cloning is cheap; all clones share the pool and the writer lock that serializes score merges.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    #[instrument]
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single connection is kept alive for the pool's lifetime,
    /// since every new connection to `:memory:` would see an empty database.
    #[cfg(test)]
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> DbResult<Self> {
        MIGRATOR.run(&pool).await?;
        tracing::debug!("database migrations applied");

        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn players(&self) -> repositories::player::PlayerRepository {
        repositories::player::PlayerRepository::new(self.pool.clone(), self.write_lock.clone())
    }

    pub fn scores(&self) -> repositories::score::ScoreRepository {
        repositories::score::ScoreRepository::new(self.pool.clone(), self.write_lock.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbResult<T> = core::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    #[error(transparent)]
    InvalidDifficulty(#[from] InvalidDifficulty),

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Whether the store itself is unreachable, as opposed to a single statement failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DbError::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::RowNotFound => DbError::NotFound("no matching row".to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DbError::DuplicateKey(db_err.message().to_string())
            }
            sqlx::Error::Database(ref db_err) if is_busy(db_err.code().as_deref()) => {
                DbError::StorageUnavailable(value)
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => DbError::StorageUnavailable(value),
            other => DbError::Query(other),
        }
    }
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes (e.g. 517 BUSY_SNAPSHOT).
fn is_busy(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}
