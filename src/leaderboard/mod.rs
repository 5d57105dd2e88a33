//! Remote leaderboard access.
//!
//! The reconciler only ever sees [`LeaderboardSource`]; [`scoresaber::ScoreSaber`] is the HTTP
//! implementation used in production.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod scoresaber;

/// One score as reported by the leaderboard service, before any validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawScoreEntry {
    pub song_hash: String,
    pub song_name: String,
    pub song_artist: String,
    pub song_mapper: String,
    /// Raw ordinal; validated when the score is merged.
    pub difficulty: i64,
    pub score: i64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScorePage {
    /// A page of entries, most recent first. May be empty.
    Entries(Vec<RawScoreEntry>),
    /// The service has no page at this index.
    EndOfPages,
}

impl ScorePage {
    /// Whether pagination should stop at this page.
    pub fn is_exhausted(&self) -> bool {
        match self {
            ScorePage::Entries(entries) => entries.is_empty(),
            ScorePage::EndOfPages => true,
        }
    }

    pub fn into_entries(self) -> Vec<RawScoreEntry> {
        match self {
            ScorePage::Entries(entries) => entries,
            ScorePage::EndOfPages => Vec::new(),
        }
    }
}

/// Read-only view of a remote leaderboard service.
///
/// Implementations hold no state between calls and never retry on their own.
#[async_trait]
pub trait LeaderboardSource: Send + Sync {
    /// Fetches one page of a player's scores, most recent first. Pages are 1-indexed.
    async fn fetch_recent_scores(
        &self,
        leaderboard_id: &str,
        page: u32,
        page_size: u32,
    ) -> LeaderboardResult<ScorePage>;

    /// Resolves a browsable map page for a song hash; `Ok(None)` if the song has no mapping.
    async fn fetch_map_page_url(&self, song_hash: &str) -> LeaderboardResult<Option<String>>;

    /// Looks up a player by display name.
    async fn find_player(&self, name: &str) -> LeaderboardResult<Option<PlayerProfile>>;
}

pub type LeaderboardResult<T> = core::result::Result<T, LeaderboardError>;

/// Every variant is transient from the caller's point of view: skip and try again next pass.
#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("unexpected response status {status} from {url}")]
    Transient { status: u16, url: String },

    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("reqwest error: {0}")]
    Request(#[from] reqwest::Error),
}
