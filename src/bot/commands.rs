use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::db::prelude::{DbError, PlayerId};
use crate::notify::format::{format_score, summarize};
use crate::reconcile::register::{RegisterError, Registration};
use crate::reconcile::{ReconcileError, Reconciler};
use crate::util::env::Config;

pub const COMMAND_PREFIX: char = '!';
const DEFAULT_TOP_LIMIT: i64 = 10;
const MAX_TOP_LIMIT: i64 = 50;

/// Shared handles every command runs against.
#[derive(Clone)]
pub struct BotState {
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<Config>,
    pub cancel: CancellationToken,
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub channel: String,
    pub sender: String,
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Parses `!name arg...`; anything without the prefix is not a command.
    pub fn parse(channel: &str, sender: &str, text: &str) -> Option<Self> {
        let mut parts = text.trim().strip_prefix(COMMAND_PREFIX)?.split_whitespace();
        let name = parts.next()?.to_lowercase();

        Some(Self {
            channel: channel.to_string(),
            sender: sender.to_string(),
            name,
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn brief(&self) -> &'static str;

    /// Privileged commands are restricted to configured power users.
    fn privileged(&self) -> bool {
        false
    }

    /// Runs the command, returning reply lines in order.
    async fn handle(&self, inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>>;
}

/// Maps command names to handlers.
pub struct CommandTable {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(Box::new(Update));
        table.insert(Box::new(Register));
        table.insert(Box::new(List));
        table.insert(Box::new(Top));
        table.insert(Box::new(Scores));

        let mut entries: Vec<HelpEntry> = table
            .handlers
            .values()
            .map(|h| HelpEntry {
                name: h.name(),
                usage: h.usage(),
                brief: h.brief(),
            })
            .collect();
        entries.push(HelpEntry {
            name: "help",
            usage: "[command]",
            brief: "Show available commands",
        });
        entries.sort_by_key(|e| e.name);

        table.insert(Box::new(Help { entries }));
        table
    }
}

impl CommandTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&dyn CommandHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    /// Runs an invocation through permission checks and its handler.
    ///
    /// Returns `None` when nothing should be said: unknown commands and anything sent outside a
    /// monitored channel.
    #[instrument(skip(self, inv, state), fields(command = %inv.name, sender = %inv.sender))]
    pub async fn dispatch(&self, inv: &Invocation, state: &BotState) -> Option<Vec<String>> {
        let handler = self.get(&inv.name)?;

        if !state.config.is_monitored(&inv.channel) {
            tracing::debug!(channel = %inv.channel, "ignoring command outside monitored channels");
            return None;
        }

        if handler.privileged() && !state.config.is_power_user(&inv.sender) {
            tracing::info!("rejected privileged command");
            return Some(vec![format!(
                "Only power users can use the {} command",
                handler.name()
            )]);
        }

        match handler.handle(inv, state).await {
            Ok(replies) => Some(replies),
            Err(CommandError::Usage(usage)) => Some(vec![usage]),
            Err(e) => {
                tracing::error!(error = ?e, "command failed");
                Some(vec![format!("Failed to run {}{}.", COMMAND_PREFIX, handler.name())])
            }
        }
    }
}

fn usage_error(handler: &dyn CommandHandler) -> CommandError {
    CommandError::Usage(format!(
        "Invalid {name} command. Usage: {COMMAND_PREFIX}{name} {usage}",
        name = handler.name(),
        usage = handler.usage()
    ))
}

struct Update;

#[async_trait]
impl CommandHandler for Update {
    fn name(&self) -> &'static str {
        "update"
    }

    fn usage(&self) -> &'static str {
        "[--force] [--quiet]"
    }

    fn brief(&self) -> &'static str {
        "Update the list of scores (--force walks full history, --quiet prints a count)"
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn handle(&self, inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>> {
        let force = inv.args.iter().any(|a| a == "--force");
        let quiet = inv.args.iter().any(|a| a == "--quiet");

        let events = state.reconciler.poll(force, &state.cancel).await?;
        let summary = summarize(&events, quiet, state.config.max_reply_chars);

        let mut replies = vec!["High Scores Updated!".to_string()];
        replies.extend(summary.lines().map(str::to_string));

        Ok(replies)
    }
}

struct Register;

#[async_trait]
impl CommandHandler for Register {
    fn name(&self) -> &'static str {
        "register"
    }

    fn usage(&self) -> &'static str {
        "<account> [mention]"
    }

    fn brief(&self) -> &'static str {
        "Register a player"
    }

    fn privileged(&self) -> bool {
        true
    }

    async fn handle(&self, inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>> {
        let (account, mention) = match inv.args.as_slice() {
            [account] => (account.as_str(), None),
            [account, mention] => (account.as_str(), Some(mention.trim_start_matches('@'))),
            _ => return Err(usage_error(self)),
        };

        let reply = match state.reconciler.register(account, mention, None).await? {
            Registration::Registered { display_name, .. } => format!("{display_name} registered!"),
            Registration::UnknownPlayer => format!("Player \"{account}\" not found"),
            Registration::AlreadyRegistered => format!("{account} is already registered."),
        };

        Ok(vec![reply])
    }
}

struct List;

#[async_trait]
impl CommandHandler for List {
    fn name(&self) -> &'static str {
        "list"
    }

    fn usage(&self) -> &'static str {
        ""
    }

    fn brief(&self) -> &'static str {
        "List players"
    }

    async fn handle(&self, _inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>> {
        let players = state.reconciler.store().players().list_players().await?;
        if players.is_empty() {
            return Ok(vec!["No players registered.".to_string()]);
        }

        let names: Vec<String> = players.iter().map(|p| p.account_id.to_string()).collect();
        Ok(vec![format!("Player list: {}", names.join(", "))])
    }
}

struct Top;

#[async_trait]
impl CommandHandler for Top {
    fn name(&self) -> &'static str {
        "top"
    }

    fn usage(&self) -> &'static str {
        "<account> [limit]"
    }

    fn brief(&self) -> &'static str {
        "Get a player's best scores"
    }

    async fn handle(&self, inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>> {
        let (account, limit) = match inv.args.as_slice() {
            [account] => (account, DEFAULT_TOP_LIMIT),
            [account, limit] => match limit.parse::<i64>() {
                Ok(limit) if limit > 0 => (account, limit.min(MAX_TOP_LIMIT)),
                _ => return Err(usage_error(self)),
            },
            _ => return Err(usage_error(self)),
        };

        // `@nick` names a player by their chat mention
        let player_id = match account.strip_prefix('@') {
            Some(mention) => match state.reconciler.store().players().get_by_mention(mention).await {
                Ok(player) => player.account_id,
                Err(DbError::NotFound(_)) => {
                    return Ok(vec![format!("No player registered as {account}")]);
                }
                Err(e) => return Err(e.into()),
            },
            None => PlayerId::from(account.as_str()),
        };
        let scores = state
            .reconciler
            .store()
            .scores()
            .list_scores_for_player(&player_id, limit)
            .await?;

        if scores.is_empty() {
            return Ok(vec![format!("No scores found for {account}")]);
        }

        let mut replies = vec![format!("Top scores for {account}:")];
        replies.extend(scores.iter().map(format_score));
        Ok(replies)
    }
}

struct Scores;

#[async_trait]
impl CommandHandler for Scores {
    fn name(&self) -> &'static str {
        "scores"
    }

    fn usage(&self) -> &'static str {
        "<search term...>"
    }

    fn brief(&self) -> &'static str {
        "Search for the top score on songs by name"
    }

    async fn handle(&self, inv: &Invocation, state: &BotState) -> CommandResult<Vec<String>> {
        let term = inv.args.join(" ");
        if term.is_empty() {
            return Err(CommandError::Usage("No search string specified".to_string()));
        }

        let results = state.reconciler.store().scores().search_songs(&term).await?;
        if results.is_empty() {
            return Ok(vec![format!("No scores found for songs matching `{term}`")]);
        }

        let mut replies = vec![format!("Top scores for songs matching `{term}`:")];
        replies.extend(
            results
                .iter()
                .map(|e| format!("{}: {}", e.score.player_id, format_score(&e.score))),
        );

        let total: usize = replies.iter().map(|r| r.chars().count() + 1).sum();
        if total > state.config.max_reply_chars {
            return Ok(vec![format!(
                "Too many results to display ({}). Try a narrower search.",
                results.len()
            )]);
        }

        Ok(replies)
    }
}

#[derive(Debug, Clone)]
struct HelpEntry {
    name: &'static str,
    usage: &'static str,
    brief: &'static str,
}

struct Help {
    entries: Vec<HelpEntry>,
}

#[async_trait]
impl CommandHandler for Help {
    fn name(&self) -> &'static str {
        "help"
    }

    fn usage(&self) -> &'static str {
        "[command]"
    }

    fn brief(&self) -> &'static str {
        "Show available commands"
    }

    async fn handle(&self, inv: &Invocation, _state: &BotState) -> CommandResult<Vec<String>> {
        if let Some(name) = inv.args.first() {
            let name = name.trim_start_matches(COMMAND_PREFIX).to_lowercase();
            return Ok(match self.entries.iter().find(|e| e.name == name) {
                Some(entry) => vec![
                    format!("{COMMAND_PREFIX}{} {}", entry.name, entry.usage)
                        .trim_end()
                        .to_string(),
                    entry.brief.to_string(),
                ],
                None => vec![format!("Unknown command: {name}")],
            });
        }

        let names: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{COMMAND_PREFIX}{}", e.name))
            .collect();

        Ok(vec![format!("Commands: {}", names.join(", "))])
    }
}

pub type CommandResult<T> = core::result::Result<T, CommandError>;

#[derive(Debug, Error)]
pub enum CommandError {
    /// Bad arguments; the message is shown to the caller as-is.
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Storage(#[from] DbError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Register(#[from] RegisterError),
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::db::Store;
    use crate::leaderboard::mock::{ScriptedSource, entry};
    use crate::reconcile::test::{reconciler, setup};
    use crate::util::env::test::test_config;

    pub(crate) async fn bot_state(store: &Store, source: &Arc<ScriptedSource>) -> BotState {
        BotState {
            reconciler: Arc::new(reconciler(store, source).await),
            config: Arc::new(test_config()),
            cancel: CancellationToken::new(),
        }
    }

    fn inv(sender: &str, text: &str) -> Invocation {
        Invocation::parse("#scores", sender, text).unwrap()
    }

    #[test]
    fn test_parse_invocation() {
        let parsed = Invocation::parse("#scores", "admin", "  !TOP  p1   5 ").unwrap();
        assert_eq!(parsed.name, "top");
        assert_eq!(parsed.args, vec!["p1", "5"]);

        assert!(Invocation::parse("#scores", "admin", "top p1").is_none());
        assert!(Invocation::parse("#scores", "admin", "!").is_none());
    }

    #[tokio::test]
    async fn test_permissions() {
        let (store, source) = setup(&[]).await;
        let state = bot_state(&store, &source).await;
        let table = CommandTable::default();

        // outside a monitored channel nothing is said, even for power users
        let outside = Invocation::parse("#general", "admin", "!update").unwrap();
        assert_eq!(table.dispatch(&outside, &state).await, None);
        let outside = Invocation::parse("#general", "someone", "!list").unwrap();
        assert_eq!(table.dispatch(&outside, &state).await, None);

        let denied = table.dispatch(&inv("someone", "!update"), &state).await;
        assert_eq!(
            denied,
            Some(vec!["Only power users can use the update command".to_string()])
        );

        let denied = table.dispatch(&inv("someone", "!register p1"), &state).await;
        assert_eq!(
            denied,
            Some(vec!["Only power users can use the register command".to_string()])
        );

        assert_eq!(table.dispatch(&inv("someone", "!unknown"), &state).await, None);
    }

    #[tokio::test]
    async fn test_update_command() {
        let (store, source) = setup(&[("p1", "s1")]).await;
        source.set_page("s1", 1, vec![entry("A", "Song A", 5, 100)]);
        let state = bot_state(&store, &source).await;
        let table = CommandTable::default();

        let replies = table.dispatch(&inv("Admin", "!update"), &state).await.unwrap();
        assert_eq!(
            replies,
            vec![
                "High Scores Updated!".to_string(),
                "p1 set a new high score of 100 on Song A by Artist [map by Mapper] (Hard)"
                    .to_string(),
            ]
        );

        let replies = table
            .dispatch(&inv("admin", "!update --force --quiet"), &state)
            .await
            .unwrap();
        assert_eq!(replies[1], "No new high scores.");
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let (store, source) = setup(&[]).await;
        source.add_player("7656", "Duh");
        let state = bot_state(&store, &source).await;
        let table = CommandTable::default();

        assert_eq!(
            table.dispatch(&inv("admin", "!list"), &state).await.unwrap(),
            vec!["No players registered."]
        );
        assert_eq!(
            table.dispatch(&inv("admin", "!register duh @duh_irc"), &state).await.unwrap(),
            vec!["Duh registered!"]
        );
        assert_eq!(
            table.dispatch(&inv("admin", "!register duh"), &state).await.unwrap(),
            vec!["duh is already registered."]
        );
        assert_eq!(
            table.dispatch(&inv("admin", "!register ghost"), &state).await.unwrap(),
            vec!["Player \"ghost\" not found"]
        );
        assert_eq!(
            table.dispatch(&inv("admin", "!register"), &state).await.unwrap(),
            vec!["Invalid register command. Usage: !register <account> [mention]"]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!list"), &state).await.unwrap(),
            vec!["Player list: duh"]
        );

        let player = store.players().get_by_mention("duh_irc").await.unwrap();
        assert_eq!(player.leaderboard_id, "7656");
        assert_eq!(
            table.dispatch(&inv("someone", "!top @DUH_IRC"), &state).await.unwrap(),
            vec!["No scores found for @DUH_IRC"]
        );
    }

    #[tokio::test]
    async fn test_top_and_scores() {
        let (store, source) = setup(&[("p1", "s1"), ("p2", "s2")]).await;
        source.set_page(
            "s1",
            1,
            vec![entry("A", "Shelter", 5, 100), entry("B", "Other", 9, 300)],
        );
        source.set_page("s2", 1, vec![entry("A", "Shelter", 5, 200)]);
        let state = bot_state(&store, &source).await;
        state
            .reconciler
            .poll(false, &CancellationToken::new())
            .await
            .unwrap();
        let table = CommandTable::default();

        assert_eq!(
            table.dispatch(&inv("someone", "!top p1 1"), &state).await.unwrap(),
            vec![
                "Top scores for p1:",
                "Other by Artist [map by Mapper] (Expert+): 300",
            ]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!top nobody"), &state).await.unwrap(),
            vec!["No scores found for nobody"]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!top @nobody"), &state).await.unwrap(),
            vec!["No player registered as @nobody"]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!top p1 lots"), &state).await.unwrap(),
            vec!["Invalid top command. Usage: !top <account> [limit]"]
        );

        assert_eq!(
            table.dispatch(&inv("someone", "!scores shel"), &state).await.unwrap(),
            vec![
                "Top scores for songs matching `shel`:",
                "p2: Shelter by Artist [map by Mapper] (Hard): 200",
            ]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!scores"), &state).await.unwrap(),
            vec!["No search string specified"]
        );
    }

    #[tokio::test]
    async fn test_scores_reply_cap_counts_chars() {
        let (store, source) = setup(&[("p1", "s1")]).await;
        source.set_page("s1", 1, vec![entry("A", "日本語の歌", 5, 100)]);
        let mut state = bot_state(&store, &source).await;
        state
            .reconciler
            .poll(false, &CancellationToken::new())
            .await
            .unwrap();

        // the reply is 84 chars but 98 bytes
        let mut config = test_config();
        config.max_reply_chars = 90;
        state.config = Arc::new(config);
        let table = CommandTable::default();

        assert_eq!(
            table.dispatch(&inv("someone", "!scores 日本"), &state).await.unwrap(),
            vec![
                "Top scores for songs matching `日本`:",
                "p1: 日本語の歌 by Artist [map by Mapper] (Hard): 100",
            ]
        );

        let mut config = test_config();
        config.max_reply_chars = 80;
        state.config = Arc::new(config);
        assert_eq!(
            table.dispatch(&inv("someone", "!scores 日本"), &state).await.unwrap(),
            vec!["Too many results to display (1). Try a narrower search."]
        );
    }

    #[tokio::test]
    async fn test_help() {
        let (store, source) = setup(&[]).await;
        let state = bot_state(&store, &source).await;
        let table = CommandTable::default();

        assert_eq!(
            table.dispatch(&inv("someone", "!help"), &state).await.unwrap(),
            vec!["Commands: !help, !list, !register, !scores, !top, !update"]
        );
        assert_eq!(
            table.dispatch(&inv("someone", "!help !top"), &state).await.unwrap(),
            vec!["!top <account> [limit]", "Get a player's best scores"]
        );
    }

    #[tokio::test]
    async fn test_failures_reply_generically() {
        let (store, source) = setup(&[]).await;
        let state = bot_state(&store, &source).await;
        let table = CommandTable::default();
        store.close().await;

        assert_eq!(
            table.dispatch(&inv("someone", "!list"), &state).await.unwrap(),
            vec!["Failed to run !list."]
        );
    }
}
