use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use super::{
    LeaderboardError, LeaderboardResult, LeaderboardSource, PlayerProfile, RawScoreEntry,
    ScorePage,
};
use crate::util::env::Config;

/// ScoreSaber for score pages and player lookup, BeatSaver for map pages.
#[derive(Debug, Clone)]
pub struct ScoreSaber {
    client: reqwest::Client,
    api_url: String,
    beatsaver_api_url: String,
    beatsaver_map_url: String,
}

impl ScoreSaber {
    pub fn new(config: &Config) -> LeaderboardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: config.scoresaber_api_url.trim_end_matches('/').to_string(),
            beatsaver_api_url: config.beatsaver_api_url.trim_end_matches('/').to_string(),
            beatsaver_map_url: config.beatsaver_map_url.trim_end_matches('/').to_string(),
        })
    }

    /// Performs a GET and decodes the body as `T`.
    ///
    /// `Ok(None)` is returned for a 404; every other non-2xx status is a transient error.
    #[instrument(skip(self, query))]
    async fn fetch<T>(&self, url: &str, query: &[(&str, String)]) -> LeaderboardResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let res = self.client.get(url).query(query).send().await?;
        let status = res.status();

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(url, "resource not found");
            return Ok(None);
        }

        if !status.is_success() {
            tracing::warn!(code = %status, url, "non-2xx response");
            return Err(LeaderboardError::Transient {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = res.bytes().await?;
        Ok(Some(serde_json::from_slice::<T>(&body)?))
    }
}

#[async_trait]
impl LeaderboardSource for ScoreSaber {
    #[instrument(skip(self))]
    async fn fetch_recent_scores(
        &self,
        leaderboard_id: &str,
        page: u32,
        page_size: u32,
    ) -> LeaderboardResult<ScorePage> {
        let url = format!("{}/player/{}/scores", self.api_url, leaderboard_id);
        let query = [
            ("sort", "recent".to_string()),
            ("limit", page_size.to_string()),
            ("page", page.to_string()),
        ];

        let Some(body) = self.fetch::<PlayerScoresResponse>(&url, &query).await? else {
            return Ok(ScorePage::EndOfPages);
        };

        let entries: Vec<RawScoreEntry> = body
            .player_scores
            .into_iter()
            .map(RawScoreEntry::from)
            .collect();

        tracing::debug!(count = entries.len(), "fetched score page");
        Ok(ScorePage::Entries(entries))
    }

    #[instrument(skip(self))]
    async fn fetch_map_page_url(&self, song_hash: &str) -> LeaderboardResult<Option<String>> {
        let url = format!("{}/maps/hash/{}", self.beatsaver_api_url, song_hash);

        Ok(self
            .fetch::<MapResponse>(&url, &[])
            .await?
            .map(|map| format!("{}/{}", self.beatsaver_map_url, map.id)))
    }

    #[instrument(skip(self))]
    async fn find_player(&self, name: &str) -> LeaderboardResult<Option<PlayerProfile>> {
        let url = format!("{}/players", self.api_url);
        let query = [("search", name.to_string())];

        let Some(body) = self.fetch::<PlayersResponse>(&url, &query).await? else {
            return Ok(None);
        };

        // prefer an exact (case-insensitive) name match over the service's fuzzy ordering
        let mut players = body.players;
        let exact = players
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name));

        Ok(match exact {
            Some(idx) => Some(players.swap_remove(idx)),
            None => players.into_iter().next(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerScoresResponse {
    #[serde(default)]
    player_scores: Vec<PlayerScore>,
}

#[derive(Debug, Deserialize)]
struct PlayerScore {
    score: ScoreInfo,
    leaderboard: LeaderboardInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreInfo {
    modified_score: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderboardInfo {
    song_hash: String,
    song_name: String,
    #[serde(default)]
    song_author_name: String,
    #[serde(default)]
    level_author_name: String,
    difficulty: DifficultyInfo,
    #[serde(default)]
    cover_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DifficultyInfo {
    difficulty: i64,
}

impl From<PlayerScore> for RawScoreEntry {
    fn from(value: PlayerScore) -> Self {
        let board = value.leaderboard;
        Self {
            song_hash: board.song_hash,
            song_name: board.song_name,
            song_artist: board.song_author_name,
            song_mapper: board.level_author_name,
            difficulty: board.difficulty.difficulty,
            score: value.score.modified_score,
            image_url: board.cover_image.filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlayersResponse {
    #[serde(default)]
    players: Vec<PlayerProfile>,
}
