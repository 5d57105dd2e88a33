//! Score reconciliation: pull recent scores for every registered player, merge them into the
//! store, and work out which merges were personal bests and which took over a leaderboard.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::db::prelude::{
    DbError, MergeResult, Player, PlayerId, PlayerRef, Score, SongKey, SongMetadata, Store,
};
use crate::leaderboard::{LeaderboardSource, RawScoreEntry};
use crate::util::env::Config;

pub mod register;
pub mod scheduler;
pub mod snapshot;

use snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviousLeader {
    pub player: PlayerRef,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// The player improved on their own best without taking over the leaderboard.
    PersonalBest { previous: Option<i64> },
    /// The player now holds the top score for this key. `previous` is absent for a first record.
    NewLeader { previous: Option<PreviousLeader> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreChangeEvent {
    pub player: PlayerRef,
    pub score: Score,
    pub kind: ChangeKind,
}

impl ScoreChangeEvent {
    pub fn is_new_leader(&self) -> bool {
        matches!(self.kind, ChangeKind::NewLeader { .. })
    }
}

/// A record-setting merge seen during a pass.
#[derive(Debug)]
struct Touched {
    player: PlayerRef,
    score: Score,
    previous: Option<i64>,
}

/// Records discovered during one pass, deduplicated by `(player, song, difficulty)` and kept in
/// discovery order.
#[derive(Debug, Default)]
struct TouchedSet {
    order: Vec<Touched>,
    index: HashMap<(PlayerId, SongKey), usize>,
}

impl TouchedSet {
    fn record(&mut self, player: &PlayerRef, score: Score, result: MergeResult) {
        let key = (player.account_id.clone(), score.key());

        match self.index.get(&key) {
            // keep the value from before the pass, take the latest row
            Some(&idx) => self.order[idx].score = score,
            None => {
                let previous = match result {
                    MergeResult::Improved { previous } => Some(previous),
                    _ => None,
                };

                self.index.insert(key, self.order.len());
                self.order.push(Touched {
                    player: player.clone(),
                    score,
                    previous,
                });
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct Reconciler {
    store: Store,
    source: Arc<dyn LeaderboardSource>,
    recent_page_limit: u32,
    full_page_limit: u32,
    /// Leaders as of the last pass that produced events. The lock doubles as the poll monitor.
    last_snapshot: Mutex<Snapshot>,
}

impl Reconciler {
    #[instrument(skip_all)]
    pub async fn new(
        store: Store,
        source: Arc<dyn LeaderboardSource>,
        config: &Config,
    ) -> ReconcileResult<Self> {
        let initial = Snapshot::from_scores(&store.scores().snapshot_high_scores().await?);
        tracing::info!(leaders = initial.len(), "loaded initial leader snapshot");

        Ok(Self {
            store,
            source,
            recent_page_limit: config.recent_page_limit,
            full_page_limit: config.full_page_limit,
            last_snapshot: Mutex::new(initial),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Copy of the current leader snapshot; waits for any running pass to finish.
    #[cfg(test)]
    pub async fn snapshot(&self) -> Snapshot {
        self.last_snapshot.lock().await.clone()
    }

    /// Runs one pass over every registered player and returns the resulting change events in
    /// discovery order.
    ///
    /// Only one pass runs at a time. Per-player fetch failures and per-entry merge failures are
    /// logged and skipped; an unavailable store aborts the pass and leaves the snapshot as it was.
    #[instrument(skip(self, cancel))]
    pub async fn poll(
        &self,
        force_full: bool,
        cancel: &CancellationToken,
    ) -> ReconcileResult<Vec<ScoreChangeEvent>> {
        let mut last_snapshot = self.last_snapshot.lock().await;

        let players = self.store.players().list_players().await?;
        tracing::debug!(count = players.len(), "polling players");

        let mut touched = TouchedSet::default();
        for player in &players {
            if cancel.is_cancelled() {
                tracing::info!(touched = touched.len(), "poll cancelled at player boundary");
                return Err(ReconcileError::Cancelled);
            }

            self.poll_player(player, force_full, &mut touched).await?;
        }

        if touched.is_empty() {
            tracing::debug!("no new records this pass");
            return Ok(Vec::new());
        }

        let newer = match self.store.scores().snapshot_high_scores().await {
            Ok(scores) => Snapshot::from_scores(&scores),
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                tracing::error!(error = ?e, touched = touched.len(), "failed to take leader snapshot, dropping notifications");
                return Ok(Vec::new());
            }
        };

        let changed = newer.changed_since(&last_snapshot);
        let classified: Vec<(Touched, bool)> = touched
            .order
            .into_iter()
            .map(|t| {
                let key = t.score.key();
                let took_over = changed.iter().any(|r| r.score_id == t.score.id)
                    && !last_snapshot.held_by(&key, t.score.id);
                (t, took_over)
            })
            .collect();

        *last_snapshot = newer;

        let mut events = Vec::with_capacity(classified.len());
        for (t, took_over) in classified {
            let kind = if took_over {
                ChangeKind::NewLeader {
                    previous: self.previous_leader(&t.score).await,
                }
            } else {
                ChangeKind::PersonalBest {
                    previous: t.previous,
                }
            };

            events.push(ScoreChangeEvent {
                player: t.player,
                score: t.score,
                kind,
            });
        }

        tracing::info!(
            events = events.len(),
            new_leaders = events.iter().filter(|e| e.is_new_leader()).count(),
            "poll complete"
        );

        Ok(events)
    }

    #[instrument(skip(self, player, touched), fields(player = %player.account_id))]
    async fn poll_player(
        &self,
        player: &Player,
        force_full: bool,
        touched: &mut TouchedSet,
    ) -> ReconcileResult<()> {
        let page_size = match force_full {
            true => self.full_page_limit,
            false => self.recent_page_limit,
        };
        let player_ref = PlayerRef::from(player);

        let mut page = 1;
        loop {
            let entries = match self
                .source
                .fetch_recent_scores(&player.leaderboard_id, page, page_size)
                .await
            {
                Ok(fetched) if fetched.is_exhausted() => {
                    tracing::debug!(page, "no more pages");
                    break;
                }
                Ok(fetched) => fetched.into_entries(),
                Err(e) => {
                    tracing::warn!(error = ?e, page, "score fetch failed, skipping player");
                    break;
                }
            };

            tracing::debug!(page, count = entries.len(), "merging score page");
            for entry in entries {
                self.merge_entry(&player_ref, entry, touched).await?;
            }

            if !force_full {
                break;
            }
            page += 1;
        }

        Ok(())
    }

    /// Merges a single entry. Only an unavailable store is returned as an error.
    #[instrument(skip(self, player, entry, touched), fields(song_hash = %entry.song_hash, difficulty = entry.difficulty))]
    async fn merge_entry(
        &self,
        player: &PlayerRef,
        entry: RawScoreEntry,
        touched: &mut TouchedSet,
    ) -> ReconcileResult<()> {
        let map_url = match self.source.fetch_map_page_url(&entry.song_hash).await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = ?e, "map page lookup failed");
                None
            }
        };

        let meta = SongMetadata {
            song_name: entry.song_name,
            song_artist: entry.song_artist,
            song_mapper: entry.song_mapper,
            image_url: entry.image_url,
            map_url,
        };

        let merged = self
            .store
            .scores()
            .merge_score(
                &player.account_id,
                &entry.song_hash,
                entry.difficulty,
                entry.score,
                &meta,
            )
            .await;

        match merged {
            Ok(outcome) if outcome.result.is_record() => {
                tracing::debug!(result = ?outcome.result, value = outcome.score.score, "new record");
                touched.record(player, outcome.score, outcome.result);
            }
            Ok(_) => {}
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => tracing::warn!(error = ?e, "skipping score entry"),
        }

        Ok(())
    }

    /// Second-ranked row on the score's leaderboard, if any.
    #[instrument(skip(self, score), fields(song_hash = %score.song_hash, difficulty = %score.difficulty))]
    async fn previous_leader(&self, score: &Score) -> Option<PreviousLeader> {
        let board = match self
            .store
            .scores()
            .list_scores_for_song(&score.song_hash, score.difficulty)
            .await
        {
            Ok(board) => board,
            Err(e) => {
                tracing::error!(error = ?e, "failed to resolve previous leader");
                return None;
            }
        };

        board
            .into_iter()
            .find(|entry| entry.score.id != score.id)
            .map(|entry| PreviousLeader {
                player: entry.holder(),
                value: entry.score.score,
            })
    }
}

pub type ReconcileResult<T> = core::result::Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("storage failure: {0}")]
    Storage(#[from] DbError),

    #[error("poll cancelled")]
    Cancelled,
}
