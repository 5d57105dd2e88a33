use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal_ident;
use crate::db::models::score::InvalidDifficulty;
use crate::db::prelude::DbError;
use crate::reconcile::register::RegisterError;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::util::env::Config;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
}

pub fn router(state: Arc<AppState>) -> Router {
    let internal_routes = Router::new()
        .route("/players", post(register_player))
        .route("/update", post(trigger_update))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_internal_ident,
        ));

    Router::new()
        .merge(internal_routes)
        //
        // general
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .route("/search", get(search_songs))
        //
        // players
        .route("/players", get(list_players))
        .route("/players/{account}/scores", get(player_scores))
        //
        // leaderboards
        .route("/songs/{hash}/{difficulty}", get(song_leaderboard))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

/// Serves the API until `cancel` fires.
#[instrument(skip(state))]
pub async fn serve(state: Arc<AppState>, port: u16) -> RouteResult<()> {
    let cancel = state.cancel.clone();
    let app = router(state);

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", socket_addr.port()),
        "server ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Logs errors that route handlers attached to their responses.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

pub type RouteResult<T> = core::result::Result<T, RouteError>;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    InvalidDifficulty(#[from] InvalidDifficulty),

    #[error("{0}")]
    BadRequest(String),

    #[error("no leaderboard profile found for '{0}'")]
    UnknownPlayer(String),

    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn db_status(err: &DbError) -> StatusCode {
    match err {
        DbError::NotFound(_) => StatusCode::NOT_FOUND,
        DbError::DuplicateKey(_) => StatusCode::CONFLICT,
        DbError::InvalidDifficulty(_) => StatusCode::BAD_REQUEST,
        DbError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DbError::Query(_) | DbError::Migrate(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let status = match &self {
            RouteError::Db(err) => db_status(err),
            RouteError::Reconcile(ReconcileError::Storage(err)) => db_status(err),
            RouteError::Reconcile(ReconcileError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            RouteError::Register(RegisterError::Storage(err)) => db_status(err),
            RouteError::Register(RegisterError::Leaderboard(_)) => StatusCode::BAD_GATEWAY,
            RouteError::InvalidDifficulty(_) | RouteError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RouteError::UnknownPlayer(_) => StatusCode::NOT_FOUND,
            RouteError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            RouteError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = self.to_string();
        let mut response = (status, Json(ErrorResponse { message })).into_response();

        // client errors aren't worth an error log
        if status.is_server_error() {
            response.extensions_mut().insert(Arc::new(self));
        }

        response
    }
}
