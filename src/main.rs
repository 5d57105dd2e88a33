use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::server::AppState;
use crate::bot::commands::{BotState, CommandTable};
use crate::bot::connection::IrcConnection;
use crate::db::Store;
use crate::leaderboard::scoresaber::ScoreSaber;
use crate::reconcile::Reconciler;
use crate::reconcile::scheduler::Scheduler;
use crate::util::env::Config;
use crate::util::telemetry;

mod api;
mod bot;
mod db;
mod leaderboard;
mod notify;
mod reconcile;
mod util;

const ANNOUNCE_BUFFER: usize = 64;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] util::env::EnvErr),

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error(transparent)]
    Leaderboard(#[from] leaderboard::LeaderboardError),

    #[error(transparent)]
    Reconcile(#[from] reconcile::ReconcileError),

    #[error(transparent)]
    Irc(#[from] bot::connection::IrcClientErr),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::load()?);
    let telemetry_registry = telemetry::Telemetry::new(&config)?.register();

    tracing::info!(service = %config.service_name, "starting main application");

    let store = Store::connect(&config.database_url).await?;
    let source = Arc::new(ScoreSaber::new(&config)?);
    let reconciler = Arc::new(Reconciler::new(store.clone(), source, &config).await?);

    let cancel = CancellationToken::new();
    let (tx_announce, rx_announce) = mpsc::channel::<String>(ANNOUNCE_BUFFER);

    let mut handles = Vec::new();

    let scheduler = Scheduler::new(reconciler.clone(), config.update_interval(), tx_announce);
    handles.push(tokio::spawn(scheduler.run(cancel.clone())));

    let bot_state = BotState {
        reconciler: reconciler.clone(),
        config: config.clone(),
        cancel: cancel.clone(),
    };
    let irc = IrcConnection::init(bot_state, Arc::new(CommandTable::default()), rx_announce).await?;
    let irc_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = irc.run(irc_cancel).await {
            tracing::error!(error = ?e, "irc connection failed");
        }
    }));

    let app_state = Arc::new(AppState {
        reconciler,
        config: config.clone(),
        cancel: cancel.clone(),
    });
    let api_port = config.api_port;
    handles.push(tokio::spawn(async move {
        if let Err(e) = api::server::serve(app_state, api_port).await {
            tracing::error!(error = ?e, "api server failed");
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "failed to listen for shutdown signal");
    }

    tracing::info!("shutdown requested");
    cancel.cancel();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = ?e, "task panicked during shutdown");
        }
    }

    store.close().await;
    telemetry_registry.shutdown();
    Ok(())
}
