use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// The external platform account id; primary key of the `player` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct PlayerId(pub String);

/// Base player table model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Player {
    pub account_id: PlayerId,
    pub leaderboard_id: String,
    pub mention_id: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Identity-only view of a player, as carried by joined score rows and change events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerRef {
    pub account_id: PlayerId,
    pub leaderboard_id: String,
    pub mention_id: Option<String>,
}

impl PlayerRef {
    /// Chat mention when one is registered, otherwise the bare account id.
    pub fn display(&self) -> String {
        match &self.mention_id {
            Some(mention) => format!("@{}", mention.trim_start_matches('@')),
            None => self.account_id.to_string(),
        }
    }
}

impl From<Player> for PlayerRef {
    fn from(value: Player) -> Self {
        Self {
            account_id: value.account_id,
            leaderboard_id: value.leaderboard_id,
            mention_id: value.mention_id,
        }
    }
}

impl From<&Player> for PlayerRef {
    fn from(value: &Player) -> Self {
        value.clone().into()
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        PlayerId(value)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        PlayerId(value.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
