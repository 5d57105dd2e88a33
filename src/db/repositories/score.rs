use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::instrument;

use super::Tx;
use crate::db::models::{ENTRY_FIELDS, SCORE_FIELDS};
use crate::db::prelude::{
    DbResult, Difficulty, LeaderboardEntry, MergeOutcome, MergeResult, PlayerId, Repository,
    Score, SongMetadata,
};

#[derive(Debug, Clone)]
pub struct ScoreRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

#[async_trait::async_trait]
impl Repository for ScoreRepository {
    type Ident = i64;
    type Output = Score;

    const BASE_FIELDS: &'static str = SCORE_FIELDS;
    const TABLE_NAME: &'static str = "score";
    const ID_FIELD: &'static str = "id";

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl ScoreRepository {
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Merges an observed score into the player's best for `(song_hash, difficulty)`.
    ///
    /// Merges are serialized through the store-wide writer lock and each runs in its own
    /// transaction, so concurrent merges on one key can't interleave their read and write.
    #[instrument(skip(self, meta), fields(song = %meta.song_name))]
    pub async fn merge_score(
        &self,
        player_id: &PlayerId,
        song_hash: &str,
        difficulty: i64,
        value: i64,
        meta: &SongMetadata,
    ) -> DbResult<MergeOutcome> {
        let difficulty = Difficulty::try_from(difficulty)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = Tx::begin(&self.pool).await?;

        let outcome = match tx.find_score(player_id, song_hash, difficulty).await? {
            None => MergeOutcome {
                score: tx
                    .insert_score(player_id, song_hash, difficulty, value, meta)
                    .await?,
                result: MergeResult::Created,
            },

            Some(existing) if existing.score >= value => {
                let image_url = changed(&existing.image_url, &meta.image_url);
                let map_url = changed(&existing.map_url, &meta.map_url);

                let score = if image_url.is_some() || map_url.is_some() {
                    tracing::trace!(id = existing.id, "back-filling score metadata");
                    tx.backfill_urls(existing.id, image_url, map_url).await?
                } else {
                    existing
                };

                MergeOutcome {
                    score,
                    result: MergeResult::NoImprovement,
                }
            }

            Some(existing) => {
                tracing::debug!(
                    id = existing.id,
                    previous = existing.score,
                    value,
                    "raising stored score"
                );

                MergeOutcome {
                    score: tx.raise_score(existing.id, value, meta).await?,
                    result: MergeResult::Improved {
                        previous: existing.score,
                    },
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// A player's scores, best first.
    #[instrument(skip(self))]
    pub async fn list_scores_for_player(
        &self,
        player_id: &PlayerId,
        limit: i64,
    ) -> DbResult<Vec<Score>> {
        let scores = sqlx::query_as::<_, Score>(&format!(
            r#"
            SELECT {SCORE_FIELDS} FROM score
            WHERE player_id = ?1
            ORDER BY score DESC, id ASC
            LIMIT ?2
            "#
        ))
        .bind(player_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(scores)
    }

    /// The top row of every `(song_hash, difficulty)` leaderboard in the store.
    ///
    /// Equal values resolve to the earliest-created row, so repeated snapshots of unchanged data
    /// are identical.
    #[instrument(skip(self))]
    pub async fn snapshot_high_scores(&self) -> DbResult<Vec<Score>> {
        let scores = sqlx::query_as::<_, Score>(&format!(
            r#"
            SELECT {SCORE_FIELDS} FROM (
                SELECT
                    *,
                    ROW_NUMBER() OVER (
                        PARTITION BY song_hash, difficulty
                        ORDER BY score DESC, created_at ASC, id ASC
                    ) AS ranking
                FROM score
            )
            WHERE ranking = 1
            ORDER BY song_hash ASC, difficulty ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(count = scores.len(), "took high score snapshot");
        Ok(scores)
    }

    /// Every score recorded on one leaderboard, best first, with the owner's identifiers.
    #[instrument(skip(self))]
    pub async fn list_scores_for_song(
        &self,
        song_hash: &str,
        difficulty: Difficulty,
    ) -> DbResult<Vec<LeaderboardEntry>> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(&format!(
            r#"
            SELECT {ENTRY_FIELDS}
            FROM score s
            JOIN player p ON p.account_id = s.player_id
            WHERE s.song_hash = ?1
            AND s.difficulty = ?2
            ORDER BY s.score DESC, s.created_at ASC, s.id ASC
            "#
        ))
        .bind(song_hash)
        .bind(difficulty)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Current leader of every leaderboard whose song name contains `term`, ignoring case.
    ///
    /// SQLite only folds ASCII case, so leaders are matched on the Rust side.
    #[instrument(skip(self))]
    pub async fn search_songs(&self, term: &str) -> DbResult<Vec<LeaderboardEntry>> {
        let needle = term.to_lowercase();

        let leaders = sqlx::query_as::<_, LeaderboardEntry>(&format!(
            r#"
            SELECT {ENTRY_FIELDS}
            FROM (
                SELECT
                    *,
                    ROW_NUMBER() OVER (
                        PARTITION BY song_hash, difficulty
                        ORDER BY score DESC, created_at ASC, id ASC
                    ) AS ranking
                FROM score
            ) s
            JOIN player p ON p.account_id = s.player_id
            WHERE s.ranking = 1
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<(String, LeaderboardEntry)> = leaders
            .into_iter()
            .filter_map(|e| {
                let name = e.score.song_name.to_lowercase();
                name.contains(&needle).then_some((name, e))
            })
            .collect();
        entries.sort_by(|(a, ea), (b, eb)| {
            a.cmp(b).then(ea.score.difficulty.cmp(&eb.score.difficulty))
        });

        tracing::debug!(term, count = entries.len(), "song search complete");
        Ok(entries.into_iter().map(|(_, e)| e).collect())
    }
}

/// Returns the incoming URL when it is present and differs from what is stored.
fn changed<'a>(stored: &Option<String>, incoming: &'a Option<String>) -> Option<&'a str> {
    match incoming {
        Some(url) if stored.as_deref() != Some(url.as_str()) => Some(url.as_str()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::db::Store;
    use crate::db::prelude::DbError;

    pub(crate) fn meta(name: &str) -> SongMetadata {
        SongMetadata {
            song_name: name.to_string(),
            song_artist: "Artist".to_string(),
            song_mapper: "Mapper".to_string(),
            image_url: None,
            map_url: None,
        }
    }

    pub(crate) async fn seeded_store(players: &[&str]) -> Store {
        let store = Store::in_memory().await.unwrap();
        for (i, p) in players.iter().enumerate() {
            store
                .players()
                .create_player(&(*p).into(), None, &format!("{}", 1000 + i))
                .await
                .unwrap();
        }

        store
    }

    #[tokio::test]
    async fn test_merge_created_then_improved() {
        let store = seeded_store(&["p1"]).await;
        let repo = store.scores();
        let p1: PlayerId = "p1".into();

        let first = repo
            .merge_score(&p1, "abc", 5, 100, &meta("Song A"))
            .await
            .unwrap();
        assert_eq!(first.result, MergeResult::Created);
        assert_eq!(first.score.score, 100);
        assert_eq!(first.score.difficulty, Difficulty::Hard);

        let second = repo
            .merge_score(&p1, "abc", 5, 150, &meta("Song A (remastered)"))
            .await
            .unwrap();
        assert_eq!(second.result, MergeResult::Improved { previous: 100 });
        assert_eq!(second.score.id, first.score.id);
        assert_eq!(second.score.score, 150);
        assert_eq!(second.score.song_name, "Song A (remastered)");
    }

    #[tokio::test]
    async fn test_merge_uniqueness_and_monotonicity() {
        let store = seeded_store(&["p1"]).await;
        let repo = store.scores();
        let p1: PlayerId = "p1".into();

        let mut best = 0;
        for value in [50, 80, 20, 80, 120, 90, 120, 10] {
            let outcome = repo
                .merge_score(&p1, "abc", 9, value, &meta("Song"))
                .await
                .unwrap();

            assert!(outcome.score.score >= best, "stored value regressed");
            best = outcome.score.score;
        }

        let rows = repo.list_scores_for_player(&p1, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 120);
    }

    #[tokio::test]
    async fn test_concurrent_merges_keep_max() {
        let store = seeded_store(&["p1"]).await;
        let p1: PlayerId = "p1".into();

        let handles: Vec<_> = (1..=20)
            .map(|i| {
                let repo = store.scores();
                let p1 = p1.clone();
                tokio::spawn(async move {
                    repo.merge_score(&p1, "abc", 7, i * 10, &meta("Song"))
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let rows = store.scores().list_scores_for_player(&p1, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 200);
    }

    #[tokio::test]
    async fn test_lower_value_backfills_metadata_only() {
        let store = seeded_store(&["p1"]).await;
        let repo = store.scores();
        let p1: PlayerId = "p1".into();

        repo.merge_score(&p1, "abc", 3, 100, &meta("Song"))
            .await
            .unwrap();

        let mut update = meta("Renamed");
        update.image_url = Some("https://cdn/cover.png".to_string());
        update.map_url = Some("https://maps/1a2b".to_string());

        let outcome = repo
            .merge_score(&p1, "abc", 3, 60, &update)
            .await
            .unwrap();
        assert_eq!(outcome.result, MergeResult::NoImprovement);
        assert_eq!(outcome.score.score, 100);
        assert_eq!(outcome.score.song_name, "Song");
        assert_eq!(outcome.score.image_url.as_deref(), Some("https://cdn/cover.png"));

        // an unresolved url on a later merge leaves the stored one alone
        let outcome = repo
            .merge_score(&p1, "abc", 3, 60, &meta("Song"))
            .await
            .unwrap();
        assert_eq!(outcome.score.map_url.as_deref(), Some("https://maps/1a2b"));

        let stored = repo.get_by_id(&outcome.score.id).await.unwrap();
        assert_eq!(stored.map_url.as_deref(), Some("https://maps/1a2b"));
        assert_eq!(stored.score, 100);
    }

    #[tokio::test]
    async fn test_merge_rejects_invalid_difficulty() {
        let store = seeded_store(&["p1"]).await;
        let repo = store.scores();

        let err = repo
            .merge_score(&"p1".into(), "abc", 4, 100, &meta("Song"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidDifficulty(_)));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_picks_max_with_earliest_tiebreak() {
        let store = seeded_store(&["p1", "p2", "p3"]).await;
        let repo = store.scores();

        repo.merge_score(&"p1".into(), "abc", 5, 100, &meta("A")).await.unwrap();
        repo.merge_score(&"p2".into(), "abc", 5, 150, &meta("A")).await.unwrap();
        repo.merge_score(&"p1".into(), "abc", 9, 70, &meta("A")).await.unwrap();
        repo.merge_score(&"p2".into(), "def", 1, 40, &meta("D")).await.unwrap();
        repo.merge_score(&"p3".into(), "def", 1, 40, &meta("D")).await.unwrap();

        let snapshot = repo.snapshot_high_scores().await.unwrap();
        let leaders: HashSet<(String, Difficulty, String, i64)> = snapshot
            .into_iter()
            .map(|s| (s.song_hash, s.difficulty, s.player_id.0, s.score))
            .collect();

        let expected: HashSet<_> = [
            ("abc".to_string(), Difficulty::Hard, "p2".to_string(), 150),
            ("abc".to_string(), Difficulty::ExpertPlus, "p1".to_string(), 70),
            ("def".to_string(), Difficulty::Easy, "p2".to_string(), 40),
        ]
        .into_iter()
        .collect();

        assert_eq!(leaders, expected);
    }

    #[tokio::test]
    async fn test_song_leaderboard_order() {
        let store = seeded_store(&["p1", "p2", "p3"]).await;
        let repo = store.scores();

        repo.merge_score(&"p1".into(), "abc", 5, 100, &meta("A")).await.unwrap();
        repo.merge_score(&"p2".into(), "abc", 5, 300, &meta("A")).await.unwrap();
        repo.merge_score(&"p3".into(), "abc", 5, 200, &meta("A")).await.unwrap();
        repo.merge_score(&"p3".into(), "abc", 7, 999, &meta("A")).await.unwrap();

        let board = repo
            .list_scores_for_song("abc", Difficulty::Hard)
            .await
            .unwrap();
        let order: Vec<(&str, i64)> = board
            .iter()
            .map(|e| (e.score.player_id.0.as_str(), e.score.score))
            .collect();

        assert_eq!(order, vec![("p2", 300), ("p3", 200), ("p1", 100)]);
        assert_eq!(board[0].leaderboard_id, "1001");
        assert_eq!(board[0].holder().account_id, PlayerId::from("p2"));
    }

    #[tokio::test]
    async fn test_search_songs() {
        let store = seeded_store(&["p1", "p2"]).await;
        let repo = store.scores();

        repo.merge_score(&"p1".into(), "h1", 5, 100, &meta("Shelter")).await.unwrap();
        repo.merge_score(&"p2".into(), "h1", 5, 120, &meta("Shelter")).await.unwrap();
        repo.merge_score(&"p1".into(), "h1", 9, 90, &meta("Shelter")).await.unwrap();
        repo.merge_score(&"p1".into(), "h2", 5, 50, &meta("Animal Shell")).await.unwrap();
        repo.merge_score(&"p2".into(), "h3", 5, 50, &meta("Unrelated")).await.unwrap();
        repo.merge_score(&"p2".into(), "h4", 5, 50, &meta("100% Shell_x")).await.unwrap();

        let results = repo.search_songs("SHEL").await.unwrap();
        let found: Vec<(&str, Difficulty, &str)> = results
            .iter()
            .map(|e| {
                (
                    e.score.song_name.as_str(),
                    e.score.difficulty,
                    e.score.player_id.0.as_str(),
                )
            })
            .collect();

        assert_eq!(
            found,
            vec![
                ("100% Shell_x", Difficulty::Hard, "p2"),
                ("Animal Shell", Difficulty::Hard, "p1"),
                ("Shelter", Difficulty::Hard, "p2"),
                ("Shelter", Difficulty::ExpertPlus, "p1"),
            ]
        );

        // wildcard characters in the term are literal
        let literal = repo.search_songs("0% S").await.unwrap();
        assert_eq!(literal.len(), 1);
        assert!(repo.search_songs("_x%").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let store = seeded_store(&["p1"]).await;
        let repo = store.scores();

        repo.merge_score(&"p1".into(), "h1", 7, 300, &meta("Énergie Électrique")).await.unwrap();
        repo.merge_score(&"p1".into(), "h2", 7, 200, &meta("ÜBERMENSCH")).await.unwrap();

        let results = repo.search_songs("électrique").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score.song_hash, "h1");

        let results = repo.search_songs("übermensch").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score.song_hash, "h2");
    }
}
