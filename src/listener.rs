use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::api::BalanceSource;
use crate::commands::{CommandKind, CommandRouter, split_command};
use crate::config::{ReportConfig, SlackConfig};
use crate::registry::WalletRegistry;
use crate::slack::{ChatClient, MessageEvent, SlackClient, SocketEnvelope};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());

pub const INVALID_COMMAND_HINT: &str = "❌ Invalid command. Use `!help` to see available commands.\n\n\
     Valid commands: `!add` `!remove` `!check` `!list` `!help`";

pub const MENTION_HINT: &str = "🤖 Hi! Please use a valid command after mentioning me.\n\n\
     Use `@bot !help` to see available commands.";

pub const PERMISSION_DENIED: &str = "⛔ You do not have the required permissions to use this command. \
     Please contact an administrator.";

/// Turns channel events into command replies.
pub struct CommandBot<'a> {
    slack: &'a SlackConfig,
    report: &'a ReportConfig,
    registry: &'a WalletRegistry,
    source: &'a dyn BalanceSource,
    channel_id: String,
    bot_user_id: Option<String>,
}

impl<'a> CommandBot<'a> {
    pub fn new(
        slack: &'a SlackConfig,
        report: &'a ReportConfig,
        registry: &'a WalletRegistry,
        source: &'a dyn BalanceSource,
        channel_id: impl Into<String>,
        bot_user_id: Option<String>,
    ) -> Self {
        Self {
            slack,
            report,
            registry,
            source,
            channel_id: channel_id.into(),
            bot_user_id,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn mention_tag(&self) -> Option<String> {
        self.bot_user_id.as_ref().map(|id| format!("<@{id}>"))
    }

    /// Strip a leading or embedded `<@BOT>` mention.
    fn strip_mention<'t>(&self, text: &'t str) -> Cow<'t, str> {
        match self.mention_tag() {
            Some(tag) if text.contains(&tag) => {
                Cow::Owned(text.replace(&tag, "").trim().to_string())
            }
            _ => Cow::Borrowed(text),
        }
    }

    /// Reply to post for `event`, or `None` when the event is ignored.
    pub async fn handle_event(&self, event: &MessageEvent) -> Option<String> {
        if event.kind != "message" && event.kind != "app_mention" {
            return None;
        }
        if event.channel.as_deref() != Some(self.channel_id.as_str()) {
            return None;
        }
        if event.subtype.as_deref() == Some("bot_message") || event.bot_id.is_some() {
            return None;
        }
        // edits, joins and other subtypes carry no command
        if event.subtype.is_some() {
            return None;
        }
        let user = event.user.as_deref()?;
        if self.bot_user_id.as_deref() == Some(user) {
            return None;
        }
        // a mention also arrives as `app_mention`; answer that one only
        if event.kind == "message"
            && self
                .mention_tag()
                .is_some_and(|tag| event.text.contains(&tag))
        {
            return None;
        }

        let text = self.strip_mention(&event.text);
        let Some((token, args)) = split_command(&text) else {
            debug!("Non-command message from {user}: '{}'", event.text);
            return Some(if event.kind == "app_mention" {
                MENTION_HINT.to_string()
            } else {
                INVALID_COMMAND_HINT.to_string()
            });
        };

        if !self.slack.is_allowed(user) {
            warn!("User {user} denied for !{token}");
            return Some(PERMISSION_DENIED.to_string());
        }

        let kind = CommandKind::from_token(token);
        let router = CommandRouter::new(self.registry, self.source, self.report);
        let body = router.dispatch(token, args).await;
        if kind.is_some_and(CommandKind::is_mutating) {
            info!("Registry updated by {user} via !{token}");
        }

        let title = kind.map_or("CryptoBalanceBot Response", CommandKind::title);
        Some(format!("🤖 *{title}*\n\n{}", format_slack_text(&body)))
    }
}

/// Convert `**bold**` to Slack's `*bold*` and code-quote bare `!command` lines.
pub fn format_slack_text(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let line = line.trim();
            if line.matches("**").count() >= 2 {
                BOLD.replace_all(line, "*$1*").into_owned()
            } else if line.starts_with('!') {
                format!("`{line}`")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run the Socket Mode listener forever.
///
/// Frames are read, acked and ponged on the connection side while a single
/// worker handles queued events one at a time, in arrival order. The worker
/// outlives reconnects, so a slow command never delays an ack.
pub async fn run(bot: &CommandBot<'_>, client: &SlackClient, app_token: &str) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (result, ()) = tokio::join!(
        connection_loop(client, app_token, tx),
        process_events(bot, client, rx)
    );
    result
}

async fn connection_loop(
    client: &SlackClient,
    app_token: &str,
    events: mpsc::UnboundedSender<MessageEvent>,
) -> Result<()> {
    loop {
        match run_connection(client, app_token, &events).await {
            Ok(()) => info!("Socket Mode connection closed, reconnecting"),
            Err(e) => warn!("Socket Mode connection error: {e:#}"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_connection(
    client: &SlackClient,
    app_token: &str,
    events: &mpsc::UnboundedSender<MessageEvent>,
) -> Result<()> {
    let url = Url::parse(&client.open_socket_url(app_token).await?)
        .context("invalid Socket Mode URL")?;
    if url.scheme() != "wss" {
        anyhow::bail!("unexpected Socket Mode URL scheme: {}", url.scheme());
    }
    let (ws, _) = connect_async(url.as_str())
        .await
        .context("failed to connect to Socket Mode")?;
    let (write, read) = ws.split();
    info!("Connected to Socket Mode");
    pump_frames(read, write, events).await
}

/// Read frames until the server closes or asks to disconnect.
///
/// Every envelope is acked and every ping answered as soon as it arrives.
/// Message events go to `events`; redeliveries are acked and dropped.
async fn pump_frames<S, E, W>(
    mut read: S,
    mut write: W,
    events: &mpsc::UnboundedSender<MessageEvent>,
) -> Result<()>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    W: Sink<Message> + Unpin,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(frame) = read.next().await {
        match frame.context("Socket Mode read failed")? {
            Message::Text(text) => {
                let envelope: SocketEnvelope = match serde_json::from_str(&text) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!("Unparseable Socket Mode frame: {e}");
                        continue;
                    }
                };
                if let Some(ack) = envelope.ack() {
                    write.send(Message::Text(ack.into())).await?;
                }
                match envelope.kind.as_str() {
                    "hello" => info!("Socket Mode ready"),
                    "disconnect" => {
                        info!(
                            "Socket Mode disconnect requested: {}",
                            envelope.reason.as_deref().unwrap_or("unknown")
                        );
                        return Ok(());
                    }
                    "events_api" if envelope.is_retry() => debug!(
                        "Dropping redelivered envelope {} (attempt {})",
                        envelope.envelope_id.as_deref().unwrap_or("?"),
                        envelope.retry_attempt
                    ),
                    "events_api" => {
                        let Some(event) = envelope.message_event() else {
                            continue;
                        };
                        if events.send(event).is_err() {
                            anyhow::bail!("event worker stopped");
                        }
                    }
                    other => debug!("Ignoring Socket Mode frame: {other}"),
                }
            }
            Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

/// Handle queued events one at a time and post each reply to the channel.
async fn process_events(
    bot: &CommandBot<'_>,
    chat: &dyn ChatClient,
    mut events: mpsc::UnboundedReceiver<MessageEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Some(reply) = bot.handle_event(&event).await {
            if let Err(e) = chat.post_message(bot.channel_id(), &reply).await {
                warn!("Failed to post reply: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LookupFailure;
    use crate::api::stub::StubSource;
    use crate::types::{WalletMap, WalletRecord};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_tungstenite::tungstenite;

    const ADDR: &str = "TSpAswScHnu6WqJDaZzjWEA4ztPSzPRtPZ";

    struct Fixture {
        _dir: TempDir,
        slack: SlackConfig,
        report: ReportConfig,
        registry: WalletRegistry,
        source: StubSource,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let registry = WalletRegistry::new(dir.path().join("wallets.json"));
        Fixture {
            _dir: dir,
            slack: SlackConfig {
                allowed_users: vec!["U_OK".to_string()],
                ..Default::default()
            },
            report: ReportConfig::default(),
            registry,
            source: StubSource::with(&[(ADDR, dec!(42))]),
        }
    }

    fn bot(f: &Fixture) -> CommandBot<'_> {
        CommandBot::new(
            &f.slack,
            &f.report,
            &f.registry,
            &f.source,
            "C1",
            Some("UBOT".to_string()),
        )
    }

    fn msg(user: &str, text: &str) -> MessageEvent {
        MessageEvent {
            kind: "message".to_string(),
            channel: Some("C1".to_string()),
            user: Some(user.to_string()),
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Every lookup takes as long as a slow Tronscan response.
    struct SlowSource;

    #[async_trait]
    impl BalanceSource for SlowSource {
        async fn usdt_balance(&self, _address: &str) -> Result<Decimal, LookupFailure> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(dec!(10))
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        posts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatClient for RecordingChat {
        async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
            self.posts
                .lock()
                .unwrap()
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }

        async fn upload_file(&self, _: &str, _: &Path, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn events_frame(id: &str, retry_attempt: u32, text: &str) -> Message {
        let frame = json!({
            "type": "events_api",
            "envelope_id": id,
            "retry_attempt": retry_attempt,
            "payload": {"event": {"type": "message", "channel": "C1", "user": "U_OK", "text": text}}
        });
        Message::Text(frame.to_string().into())
    }

    fn ack_frame(id: &str) -> Message {
        Message::Text(json!({ "envelope_id": id }).to_string().into())
    }

    // ── formatting ─────────────────────────────────────────────────

    #[test]
    fn bold_converted() {
        assert_eq!(format_slack_text("**Wallet List**"), "*Wallet List*");
        assert_eq!(
            format_slack_text("• **A**: x and **B**"),
            "• *A*: x and *B*"
        );
        assert_eq!(format_slack_text("  plain  \n\n!list"), "plain\n\n`!list`");
        assert_eq!(format_slack_text("`!list`"), "`!list`");
    }

    // ── event handling ─────────────────────────────────────────────

    #[tokio::test]
    async fn ignores_other_channels_and_bots() {
        let f = fixture();
        let b = bot(&f);

        let mut other = msg("U_OK", "!help");
        other.channel = Some("C2".to_string());
        assert!(b.handle_event(&other).await.is_none());

        let mut from_bot = msg("U_OK", "!help");
        from_bot.subtype = Some("bot_message".to_string());
        assert!(b.handle_event(&from_bot).await.is_none());

        assert!(b.handle_event(&msg("UBOT", "!help")).await.is_none());

        let mut reaction = msg("U_OK", "!help");
        reaction.kind = "reaction_added".to_string();
        assert!(b.handle_event(&reaction).await.is_none());
    }

    #[tokio::test]
    async fn non_command_gets_hint() {
        let f = fixture();
        let b = bot(&f);
        assert_eq!(
            b.handle_event(&msg("U_OK", "hello there")).await.as_deref(),
            Some(INVALID_COMMAND_HINT)
        );

        let mut mention = msg("U_OK", "<@UBOT> hi");
        mention.kind = "app_mention".to_string();
        assert_eq!(b.handle_event(&mention).await.as_deref(), Some(MENTION_HINT));
    }

    #[tokio::test]
    async fn unauthorized_user_is_denied_without_side_effects() {
        let f = fixture();
        let b = bot(&f);
        let reply = b
            .handle_event(&msg("U_NO", &format!(r#"!add "KZP" "A" "{ADDR}""#)))
            .await;
        assert_eq!(reply.as_deref(), Some(PERMISSION_DENIED));
        assert!(!f.registry.path().exists());
        assert_eq!(f.source.call_count(), 0);
    }

    #[tokio::test]
    async fn authorized_add_then_list() {
        let f = fixture();
        let b = bot(&f);
        let reply = b
            .handle_event(&msg("U_OK", &format!(r#"!add "KZP" "KZP A" "{ADDR}""#)))
            .await
            .unwrap();
        assert!(reply.starts_with("🤖 *Add Wallet Result*\n\n"), "{reply}");
        assert!(!reply.contains("**"));
        assert_eq!(f.registry.load().len(), 1);

        let reply = b.handle_event(&msg("U_OK", "!LIST")).await.unwrap();
        assert!(reply.starts_with("🤖 *Wallet List*"));
        assert!(reply.contains("*KZP:*"));
    }

    #[tokio::test]
    async fn mention_prefix_is_stripped() {
        let f = fixture();
        let b = bot(&f);
        let mut mention = msg("U_OK", "<@UBOT> !help");
        mention.kind = "app_mention".to_string();
        let reply = b.handle_event(&mention).await.unwrap();
        assert!(reply.starts_with("🤖 *Help - Available Commands*"));
    }

    #[tokio::test]
    async fn mention_in_plain_message_is_left_to_app_mention() {
        let f = fixture();
        let b = bot(&f);
        assert!(b.handle_event(&msg("U_OK", "<@UBOT> !help")).await.is_none());
    }

    #[tokio::test]
    async fn unknown_command_is_routed() {
        let f = fixture();
        let b = bot(&f);
        let reply = b.handle_event(&msg("U_OK", "!delete")).await.unwrap();
        assert!(reply.starts_with("🤖 *CryptoBalanceBot Response*"));
        assert!(reply.contains("Unknown command: !delete"));
    }

    #[tokio::test(start_paused = true)]
    async fn check_over_many_slow_wallets_returns_total() {
        let f = fixture();
        let mut wallets = WalletMap::new();
        for i in 0..13 {
            let key = format!("W{i:02}");
            wallets.insert(
                key.clone(),
                WalletRecord {
                    company: "KZP".to_string(),
                    wallet: key,
                    address: format!("T{i:0>33}"),
                },
            );
        }
        f.registry.save(&wallets).unwrap();
        let source = SlowSource;
        let b = CommandBot::new(&f.slack, &f.report, &f.registry, &source, "C1", None);

        let started = tokio::time::Instant::now();
        let reply = b.handle_event(&msg("U_OK", "!check")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(130));
        assert!(reply.contains("📊 *Total:* 130.00 USDT"), "{reply}");
        assert!(!reply.contains("Sorry"));
    }

    // ── socket mode ────────────────────────────────────────────────

    #[tokio::test]
    async fn frames_are_acked_without_waiting_for_the_worker() {
        let frames = futures_util::stream::iter(vec![
            Ok::<_, tungstenite::Error>(Message::Text(
                r#"{"type":"hello","num_connections":1}"#.into(),
            )),
            Ok(events_frame("e1", 0, "!help")),
            Ok(events_frame("e2", 1, "!help")),
            Ok(Message::Ping(vec![1u8, 2].into())),
        ]);
        let mut sent: Vec<Message> = Vec::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        pump_frames(frames, &mut sent, &tx).await.unwrap();

        assert_eq!(
            sent,
            vec![
                ack_frame("e1"),
                ack_frame("e2"),
                Message::Pong(vec![1u8, 2].into())
            ]
        );
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.text, "!help");
        assert!(rx.try_recv().is_err(), "redelivery must not be queued");
    }

    #[tokio::test]
    async fn disconnect_stops_reading() {
        let frames = futures_util::stream::iter(vec![
            Ok::<_, tungstenite::Error>(Message::Text(
                r#"{"type":"disconnect","reason":"refresh_requested"}"#.into(),
            )),
            Ok(events_frame("e3", 0, "!list")),
        ]);
        let mut sent: Vec<Message> = Vec::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        pump_frames(frames, &mut sent, &tx).await.unwrap();

        assert!(sent.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn worker_replies_in_arrival_order() {
        let f = fixture();
        let b = bot(&f);
        let chat = RecordingChat::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(msg("U_OK", "!help")).unwrap();
        tx.send(msg("U_NO", "!list")).unwrap();
        tx.send(msg("U_OK", "!list")).unwrap();
        drop(tx);

        process_events(&b, &chat, rx).await;

        let posts = chat.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|(channel, _)| channel == "C1"));
        assert!(posts[0].1.starts_with("🤖 *Help - Available Commands*"));
        assert_eq!(posts[1].1, PERMISSION_DENIED);
        assert!(posts[2].1.starts_with("🤖 *Wallet List*"));
    }
}
