use thiserror::Error;
use tracing::instrument;

use super::Reconciler;
use crate::db::prelude::{DbError, Player};
use crate::leaderboard::LeaderboardError;

#[derive(Debug)]
pub enum Registration {
    Registered { player: Player, display_name: String },
    /// No leaderboard profile matched the account name.
    UnknownPlayer,
    /// The account or its leaderboard id is already registered.
    AlreadyRegistered,
}

impl Reconciler {
    /// Registers a player for tracking.
    ///
    /// Without an explicit `leaderboard_id` the account name is resolved against the leaderboard
    /// service first.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        account_id: &str,
        mention_id: Option<&str>,
        leaderboard_id: Option<&str>,
    ) -> RegisterResult<Registration> {
        let (leaderboard_id, display_name) = match leaderboard_id {
            Some(id) => (id.to_string(), account_id.to_string()),
            None => match self.source.find_player(account_id).await? {
                Some(profile) => (profile.id, profile.name),
                None => {
                    tracing::info!(account_id, "no leaderboard profile found");
                    return Ok(Registration::UnknownPlayer);
                }
            },
        };

        let created = self
            .store
            .players()
            .create_player(&account_id.into(), mention_id, &leaderboard_id)
            .await;

        match created {
            Ok(player) => Ok(Registration::Registered {
                player,
                display_name,
            }),
            Err(DbError::DuplicateKey(_)) => Ok(Registration::AlreadyRegistered),
            Err(e) => Err(e.into()),
        }
    }
}

pub type RegisterResult<T> = core::result::Result<T, RegisterError>;

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Storage(#[from] DbError),

    #[error(transparent)]
    Leaderboard(#[from] LeaderboardError),
}
