use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::player::{PlayerId, PlayerRef};

/// Difficulty ordinals as reported by the leaderboard service.
///
/// Only the five odd ordinals are valid; anything else is rejected rather than rounded to a
/// neighbouring level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i32)]
pub enum Difficulty {
    Easy = 1,
    Normal = 3,
    Hard = 5,
    Expert = 7,
    ExpertPlus = 9,
}

impl Difficulty {
    pub const ALL: [Difficulty; 5] = [
        Self::Easy,
        Self::Normal,
        Self::Hard,
        Self::Expert,
        Self::ExpertPlus,
    ];

    pub fn ordinal(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Normal => "Normal",
            Self::Hard => "Hard",
            Self::Expert => "Expert",
            Self::ExpertPlus => "Expert+",
        }
    }
}

impl TryFrom<i64> for Difficulty {
    type Error = InvalidDifficulty;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|d| d.ordinal() == value)
            .ok_or(InvalidDifficulty(value))
    }
}

impl From<Difficulty> for i64 {
    fn from(value: Difficulty) -> Self {
        value.ordinal()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid difficulty ordinal {0}")]
pub struct InvalidDifficulty(pub i64);

/// Base score table model; one row per (player, song, difficulty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Score {
    pub id: i64,
    pub player_id: PlayerId,
    pub song_hash: String,
    pub difficulty: Difficulty,
    pub score: i64,
    pub song_name: String,
    pub song_artist: String,
    pub song_mapper: String,
    pub image_url: Option<String>,
    pub map_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Score {
    pub fn key(&self) -> SongKey {
        SongKey {
            song_hash: self.song_hash.clone(),
            difficulty: self.difficulty,
        }
    }
}

/// A single leaderboard: one song hash at one difficulty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SongKey {
    pub song_hash: String,
    pub difficulty: Difficulty,
}

/// Display metadata supplied alongside a score value.
///
/// URLs are optional: `None` means "not known this time", and never clears a stored URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub song_name: String,
    pub song_artist: String,
    pub song_mapper: String,
    pub image_url: Option<String>,
    pub map_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeResult {
    Created,
    NoImprovement,
    Improved { previous: i64 },
}

impl MergeResult {
    /// Whether this merge produced a new personal record.
    pub fn is_record(&self) -> bool {
        !matches!(self, MergeResult::NoImprovement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub score: Score,
    pub result: MergeResult,
}

/// A score row joined with its owner's identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub score: Score,
    pub leaderboard_id: String,
    pub mention_id: Option<String>,
}

impl LeaderboardEntry {
    pub fn holder(&self) -> PlayerRef {
        PlayerRef {
            account_id: self.score.player_id.clone(),
            leaderboard_id: self.leaderboard_id.clone(),
            mention_id: self.mention_id.clone(),
        }
    }
}
