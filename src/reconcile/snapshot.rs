use std::collections::{HashMap, HashSet};

use crate::db::prelude::{Difficulty, PlayerId, Score, SongKey};

/// The identity of a leaderboard's top row at one point in time.
///
/// Two records are equal only if they describe the same row holding the same value, so a leader
/// raising their own score produces a different record at the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaderRecord {
    pub score_id: i64,
    pub player_id: PlayerId,
    pub song_hash: String,
    pub difficulty: Difficulty,
    pub value: i64,
}

impl LeaderRecord {
    #[cfg(test)]
    pub fn key(&self) -> SongKey {
        SongKey {
            song_hash: self.song_hash.clone(),
            difficulty: self.difficulty,
        }
    }
}

impl From<&Score> for LeaderRecord {
    fn from(value: &Score) -> Self {
        Self {
            score_id: value.id,
            player_id: value.player_id.clone(),
            song_hash: value.song_hash.clone(),
            difficulty: value.difficulty,
            value: value.score,
        }
    }
}

/// Top row per key, as returned by `snapshot_high_scores`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    leaders: HashMap<SongKey, LeaderRecord>,
}

impl Snapshot {
    pub fn from_scores(scores: &[Score]) -> Self {
        let leaders = scores
            .iter()
            .map(|s| (s.key(), LeaderRecord::from(s)))
            .collect();

        Self { leaders }
    }

    pub fn len(&self) -> usize {
        self.leaders.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.leaders.is_empty()
    }

    #[cfg(test)]
    pub fn leader(&self, key: &SongKey) -> Option<&LeaderRecord> {
        self.leaders.get(key)
    }

    /// Records in `self` that were not present in `older`.
    pub fn changed_since(&self, older: &Snapshot) -> HashSet<LeaderRecord> {
        self.leaders
            .iter()
            .filter(|(key, record)| older.leaders.get(*key) != Some(*record))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Whether `score_id` was already the top row for `key`, regardless of its value then.
    pub fn held_by(&self, key: &SongKey, score_id: i64) -> bool {
        self.leaders
            .get(key)
            .is_some_and(|record| record.score_id == score_id)
    }
}

#[cfg(test)]
mod test {
    use chrono::NaiveDateTime;

    use super::*;

    fn score(id: i64, player: &str, hash: &str, value: i64) -> Score {
        Score {
            id,
            player_id: player.into(),
            song_hash: hash.to_string(),
            difficulty: Difficulty::Hard,
            score: value,
            song_name: "Song".to_string(),
            song_artist: String::new(),
            song_mapper: String::new(),
            image_url: None,
            map_url: None,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn test_changed_since() {
        let before = Snapshot::from_scores(&[score(1, "p1", "a", 100), score(2, "p1", "b", 50)]);
        let after = Snapshot::from_scores(&[
            score(3, "p2", "a", 150),
            score(2, "p1", "b", 80),
            score(4, "p1", "c", 10),
        ]);

        let changed = after.changed_since(&before);
        let ids: HashSet<i64> = changed.iter().map(|r| r.score_id).collect();

        assert_eq!(ids, HashSet::from([3, 2, 4]));
        assert!(after.changed_since(&after).is_empty());
    }

    #[test]
    fn test_held_by() {
        let snapshot = Snapshot::from_scores(&[score(2, "p1", "b", 50)]);
        let key = SongKey {
            song_hash: "b".to_string(),
            difficulty: Difficulty::Hard,
        };

        assert!(snapshot.held_by(&key, 2));
        assert!(!snapshot.held_by(&key, 3));
        assert_eq!(snapshot.leader(&key).map(|r| r.value), Some(50));
    }
}
