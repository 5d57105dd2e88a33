use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::db::models::PLAYER_FIELDS;
use crate::db::prelude::{DbError, DbResult, Player, PlayerId, Repository};

#[derive(Debug, Clone)]
pub struct PlayerRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

#[async_trait::async_trait]
impl Repository for PlayerRepository {
    type Ident = PlayerId;
    type Output = Player;

    const BASE_FIELDS: &'static str = PLAYER_FIELDS;
    const TABLE_NAME: &'static str = "player";
    const ID_FIELD: &'static str = "account_id";

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PlayerRepository {
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// All registered players, oldest registration first.
    #[instrument(skip(self))]
    pub async fn list_players(&self) -> DbResult<Vec<Player>> {
        let players = sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_FIELDS} FROM player ORDER BY created_at ASC, account_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = players.len(), "listed players");
        Ok(players)
    }

    /// Registers a player. Both the account id and the leaderboard id must be new.
    #[instrument(skip(self))]
    pub async fn create_player(
        &self,
        account_id: &PlayerId,
        mention_id: Option<&str>,
        leaderboard_id: &str,
    ) -> DbResult<Player> {
        // shares the writer lock with score merges so a registration can't land inside a merge
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query_as::<_, Player>(&format!(
            r#"
            INSERT INTO player (account_id, leaderboard_id, mention_id)
            VALUES (?1, ?2, ?3)
            RETURNING {PLAYER_FIELDS}
            "#
        ))
        .bind(account_id)
        .bind(leaderboard_id)
        .bind(mention_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(player) => {
                tracing::info!(account = %player.account_id, leaderboard = %player.leaderboard_id, "registered player");
                Ok(player)
            }
            Err(e) => {
                let err = DbError::from(e);
                tracing::warn!(error = ?err, "player registration failed");
                Err(err)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_by_mention(&self, mention_id: &str) -> DbResult<Player> {
        sqlx::query_as::<_, Player>(&format!(
            "SELECT {PLAYER_FIELDS} FROM player WHERE mention_id = ?1 COLLATE NOCASE"
        ))
        .bind(mention_id.trim_start_matches('@'))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("player with mention {mention_id}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::Store;

    #[tokio::test]
    async fn test_create_and_list() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.players();

        repo.create_player(&"alice".into(), Some("alice_irc"), "1001")
            .await
            .unwrap();
        repo.create_player(&"bob".into(), None, "1002").await.unwrap();

        let players = repo.list_players().await.unwrap();
        let ids: Vec<&str> = players.iter().map(|p| p.account_id.0.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
        assert_eq!(players[0].mention_id.as_deref(), Some("alice_irc"));
        assert_eq!(players[1].mention_id, None);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_keys() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.players();

        repo.create_player(&"alice".into(), None, "1001").await.unwrap();

        let same_account = repo.create_player(&"alice".into(), None, "2002").await;
        assert!(matches!(same_account, Err(DbError::DuplicateKey(_))));

        let same_leaderboard = repo.create_player(&"carol".into(), None, "1001").await;
        assert!(matches!(same_leaderboard, Err(DbError::DuplicateKey(_))));

        assert_eq!(repo.list_players().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.players();

        repo.create_player(&"alice".into(), Some("Alice_IRC"), "1001")
            .await
            .unwrap();

        let found = repo.get_by_id(&"alice".into()).await.unwrap();
        assert_eq!(found.leaderboard_id, "1001");
        assert!(matches!(
            repo.get_by_id(&"nobody".into()).await,
            Err(DbError::NotFound(_))
        ));

        let found = repo.get_by_mention("@alice_irc").await.unwrap();
        assert_eq!(found.account_id, PlayerId::from("alice"));
        assert!(matches!(
            repo.get_by_mention("someone_else").await,
            Err(DbError::NotFound(_))
        ));
    }
}
