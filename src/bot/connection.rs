use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use irc::client::data::Config as IrcConfig;
use irc::client::{Client, Sender};
use irc::proto::{CapSubCommand, Capability, Command, Message};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use super::commands::{BotState, CommandTable, Invocation};
use crate::util::truncate_on_boundary;

const REJOIN_INTERVAL: Duration = Duration::from_secs(30);
/// Leaves room for the `PRIVMSG #channel :` framing inside the 512-byte line limit.
const MAX_LINE_BYTES: usize = 450;

/// Chat-side identity of a `PRIVMSG`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IrcTags {
    pub user_login: String,
    pub user_id: String,
    pub channel_name: String,
}

pub struct IrcConnection {
    client: Client,
    channels: Vec<String>,
    commands: Arc<CommandTable>,
    state: BotState,
    announce: mpsc::Receiver<String>,
    id: Uuid,
}

impl IrcConnection {
    #[instrument(skip_all)]
    pub async fn init(
        state: BotState,
        commands: Arc<CommandTable>,
        announce: mpsc::Receiver<String>,
    ) -> IrcResult<Self> {
        let channels: Vec<String> = state
            .config
            .monitored_channels
            .iter()
            .map(|chan| format!("#{}", chan.trim_start_matches('#').to_lowercase()))
            .collect();

        tracing::info!(channels = ?channels, "channel list");

        let config = IrcConfig {
            use_tls: Some(true),
            nickname: Some(state.config.irc_nick.clone()),
            password: Some(state.config.irc_token.clone()),
            server: Some(state.config.irc_server.clone()),
            port: Some(state.config.irc_port),
            ping_time: Some(300),
            ..IrcConfig::default()
        };

        let client = Client::from_config(config).await?;

        Ok(Self {
            client,
            channels,
            commands,
            state,
            announce,
            id: Uuid::new_v4(),
        })
    }

    #[instrument(skip(self), fields(id = %self.id))]
    fn connect(&mut self) -> IrcResult<()> {
        self.client.identify()?;
        self.client.send_cap_req(&[
            Capability::Custom("twitch.tv/tags"),
            Capability::Custom("twitch.tv/commands"),
        ])?;

        Ok(())
    }

    /// Reads chat until `cancel` fires, forwarding announcements to the first monitored channel.
    #[instrument(skip_all, fields(id = %self.id))]
    pub async fn run(mut self, cancel: CancellationToken) -> IrcResult<()> {
        self.connect()?;
        let mut stream = self.client.stream()?;

        let mut check_interval = tokio::time::interval(REJOIN_INTERVAL);
        check_interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                incoming = stream.next() => match incoming {
                    Some(Ok(msg)) => self.handle_message(&msg)?,
                    Some(Err(e)) => tracing::error!(error = ?e, "irc stream error"),
                    None => {
                        tracing::warn!("irc stream closed");
                        break;
                    }
                },

                Some(line) = self.announce.recv() => {
                    match self.state.config.announce_channel() {
                        Some(channel) => {
                            let channel = format!("#{}", channel.trim_start_matches('#'));
                            send_lines(&self.client.sender(), &channel, &[line]);
                        }
                        None => tracing::warn!("no announcement channel configured"),
                    }
                }

                _ = check_interval.tick() => {
                    if let Err(e) = self.rejoin_channels() {
                        tracing::error!(error = ?e, "channel rejoin failure");
                    }
                }
            }
        }

        if let Err(e) = self.client.send_quit("shutting down") {
            tracing::warn!(error = ?e, "failed to send QUIT");
        }

        tracing::info!("irc connection closed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn rejoin_channels(&mut self) -> IrcResult<()> {
        let expected: HashSet<String> = self.channels.iter().cloned().collect();
        let joined: HashSet<String> = self.get_joined().into_iter().collect();

        let missing: Vec<String> = expected.difference(&joined).cloned().collect();

        if !missing.is_empty() {
            tracing::warn!(missing_count = missing.len(), missing = ?missing, "trying channel rejoin");
            self.join_channels(&missing)?;
        } else {
            tracing::debug!(joined_count = joined.len(), "all channels appear joined");
        }

        Ok(())
    }

    fn join_channels(&self, channels: &[String]) -> IrcResult<()> {
        tracing::info!(channels = ?channels, "sending join");
        self.client.send_join(channels.join(","))?;

        Ok(())
    }

    fn get_joined(&self) -> Vec<String> {
        self.client.list_channels().unwrap_or_default()
    }

    #[instrument(skip_all)]
    fn handle_message(&mut self, msg: &Message) -> IrcResult<()> {
        match &msg.command {
            Command::PRIVMSG(channel, content) => {
                let tags = parse_tags(msg, channel);
                let Some(inv) = Invocation::parse(channel, &tags.user_login, content) else {
                    return Ok(());
                };

                tracing::debug!(invocation = ?inv, "RX command");

                // commands can run a full poll, so they get their own task
                let commands = self.commands.clone();
                let state = self.state.clone();
                let sender = self.client.sender();
                let channel = channel.clone();
                tokio::spawn(async move {
                    if let Some(replies) = commands.dispatch(&inv, &state).await {
                        send_lines(&sender, &channel, &replies);
                    }
                });
            }

            Command::CAP(_, result, caps, _) => match result {
                CapSubCommand::ACK => {
                    tracing::info!(caps = ?caps, "CAP REQ ok");
                    if self.get_joined().is_empty() {
                        self.join_channels(&self.channels)?;
                    }
                }
                CapSubCommand::NAK => {
                    tracing::warn!(caps = ?caps, "CAP REQ rejected");
                    self.join_channels(&self.channels)?;
                }
                _ => tracing::debug!(result = ?result, "unhandled CAP response"),
            },

            Command::NOTICE(target, notice) => {
                tracing::warn!(to = %target, notice = %notice, "RX NOTICE");
            }

            Command::JOIN(channel, _, _) => {
                tracing::debug!(%channel, user = ?msg.source_nickname(), "JOIN");
            }

            _ => {
                tracing::trace!(command = ?msg.command, "IRC received generic cmd");
            }
        }

        Ok(())
    }
}

fn send_lines(sender: &Sender, channel: &str, lines: &[String]) {
    for line in lines.iter().flat_map(|l| l.lines()) {
        if line.is_empty() {
            continue;
        }

        if let Err(e) = sender.send_privmsg(channel, truncate_on_boundary(line, MAX_LINE_BYTES)) {
            tracing::error!(error = ?e, channel, "failed to send message");
            return;
        }
    }
}

/// Pulls the sender's login out of Twitch-style tags, falling back to the message prefix.
pub fn parse_tags(msg: &Message, channel: &str) -> IrcTags {
    let mut result = IrcTags {
        channel_name: channel.trim_start_matches('#').to_string(),
        ..IrcTags::default()
    };

    for tag in msg.tags.iter().flatten() {
        match (tag.0.as_str(), &tag.1) {
            ("display-name", Some(name)) if !name.is_empty() => {
                result.user_login = name.to_lowercase()
            }
            ("user-id", Some(id)) => result.user_id = id.clone(),
            _ => (),
        }
    }

    if result.user_login.is_empty() {
        result.user_login = msg.source_nickname().unwrap_or_default().to_lowercase();
    }

    result
}

pub type IrcResult<T> = core::result::Result<T, IrcClientErr>;

#[derive(Debug, Error)]
pub enum IrcClientErr {
    #[error(transparent)]
    ClientError(#[from] irc::error::Error),
}
