use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::prelude::{Difficulty, LeaderboardEntry, Player, PlayerId, Repository, Score};
use crate::notify::format::render;
use crate::reconcile::register::Registration;

const DEFAULT_SCORE_LIMIT: i64 = 10;
const MAX_SCORE_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateParams {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    quiet: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    account_id: String,
    leaderboard_id: Option<String>,
    mention_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<String>>,
}

#[instrument(skip(state))]
pub async fn list_players(State(state): State<Arc<AppState>>) -> JsonResult<Vec<Player>> {
    let players = state.reconciler.store().players().list_players().await?;
    Ok(Json(players))
}

#[instrument(skip(state))]
pub async fn player_scores(
    State(state): State<Arc<AppState>>,
    Path(account): Path<String>,
    Query(param): Query<LimitParams>,
) -> JsonResult<Vec<Score>> {
    let limit = param
        .limit
        .unwrap_or(DEFAULT_SCORE_LIMIT)
        .clamp(1, MAX_SCORE_LIMIT);

    let store = state.reconciler.store();
    let player = store.players().get_by_id(&PlayerId::from(account)).await?;
    let scores = store
        .scores()
        .list_scores_for_player(&player.account_id, limit)
        .await?;

    Ok(Json(scores))
}

#[instrument(skip(state))]
pub async fn song_leaderboard(
    State(state): State<Arc<AppState>>,
    Path((hash, difficulty)): Path<(String, i64)>,
) -> JsonResult<Vec<LeaderboardEntry>> {
    let difficulty = Difficulty::try_from(difficulty)?;
    let board = state
        .reconciler
        .store()
        .scores()
        .list_scores_for_song(&hash, difficulty)
        .await?;

    Ok(Json(board))
}

#[instrument(skip(state))]
pub async fn search_songs(
    State(state): State<Arc<AppState>>,
    Query(param): Query<SearchParams>,
) -> JsonResult<Vec<LeaderboardEntry>> {
    let term = param.q.trim();
    if term.is_empty() {
        return Err(RouteError::BadRequest(String::from(
            "missing search term `q`",
        )));
    }

    let results = state.reconciler.store().scores().search_songs(term).await?;
    Ok(Json(results))
}

#[instrument(skip(state))]
pub async fn register_player(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Player>), RouteError> {
    let registration = state
        .reconciler
        .register(
            &body.account_id,
            body.mention_id.as_deref(),
            body.leaderboard_id.as_deref(),
        )
        .await?;

    match registration {
        Registration::Registered { player, .. } => Ok((StatusCode::CREATED, Json(player))),
        Registration::UnknownPlayer => Err(RouteError::UnknownPlayer(body.account_id)),
        Registration::AlreadyRegistered => Err(RouteError::AlreadyRegistered(body.account_id)),
    }
}

/// Manual poll trigger; shares the scheduler's poll lock.
#[instrument(skip(state))]
pub async fn trigger_update(
    State(state): State<Arc<AppState>>,
    Query(param): Query<UpdateParams>,
) -> JsonResult<UpdateResponse> {
    let events = state.reconciler.poll(param.force, &state.cancel).await?;

    let rendered = match param.quiet {
        true => None,
        false => Some(events.iter().map(render).collect()),
    };

    Ok(Json(UpdateResponse {
        count: events.len(),
        events: rendered,
    }))
}
