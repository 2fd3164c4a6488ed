//! Telegram bot implementation

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, ParseMode, ReplyParameters};
use teloxide::utils::command::BotCommands;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commands::{BotState, handle_ask, handle_restart, handle_stats, help_text};
use crate::error::Result;

/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram shows the typing indicator for about five seconds
const TYPING_INTERVAL: Duration = Duration::from_secs(5);

/// Telegram bot commands
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Stats,
    Restart(String),
}

/// Telegram bot wrapper
pub struct TelegramBot {
    bot: Bot,
    state: Arc<BotState>,
}

impl TelegramBot {
    pub fn new(token: &str, state: BotState) -> Self {
        Self {
            bot: Bot::new(token),
            state: Arc::new(state),
        }
    }

    /// Process updates until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting Telegram bot...");

        let handler = Update::filter_message()
            .branch(
                dptree::filter(|msg: Message, state: Arc<BotState>| {
                    !sender_id(&msg).is_some_and(|id| state.settings.is_allowed(id))
                })
                .endpoint(handle_rejected),
            )
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(dptree::endpoint(handle_message));

        let mut dispatcher = Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.state])
            .build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            shutdown.await;
            info!("Stopping Telegram bot...");
            match token.shutdown() {
                Ok(stopped) => stopped.await,
                Err(e) => warn!("Dispatcher was not running: {}", e),
            }
        });

        dispatcher.dispatch().await;

        info!("Telegram bot stopped");
        Ok(())
    }
}

fn sender_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

async fn handle_rejected(bot: Bot, msg: Message, state: Arc<BotState>) -> Result<()> {
    // Channel posts and the like have no sender to answer.
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    warn!(user_id, chat_id = msg.chat.id.0, "Rejected message from unlisted user");
    let settings = &state.settings;
    let text = settings
        .language
        .not_allowed(user_id, &settings.admin_contact);
    reply(&bot, &msg, &text).await
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<BotState>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let id = state.session_id(user_id, msg.chat.id.0);

    info!(session = %id, command = ?cmd, "Processing command");

    match cmd {
        Command::Start => {
            let commands = state
                .settings
                .command_list()
                .into_iter()
                .map(|(command, description)| BotCommand::new(command, description))
                .collect::<Vec<_>>();

            if let Err(e) = bot.set_my_commands(commands).await {
                error!("Failed to register bot commands: {}", e);
                let text = state
                    .settings
                    .language
                    .unexpected_error(&state.settings.admin_contact, &e.to_string());
                reply(&bot, &msg, &text).await?;
            }

            send(&bot, msg.chat.id, &help_text(&state.settings)).await
        }
        Command::Help => send(&bot, msg.chat.id, &help_text(&state.settings)).await,
        Command::Stats => send(&bot, msg.chat.id, &handle_stats(&state, id).await).await,
        Command::Restart(prompt) => {
            let text = handle_restart(&state, id, &prompt).await;
            reply(&bot, &msg, &text).await
        }
    }
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let lang = state.settings.language;

    let Some(text) = msg.text() else {
        return reply(&bot, &msg, lang.not_supported()).await;
    };

    if text.starts_with('/') {
        return reply(&bot, &msg, lang.command_not_supported()).await;
    }

    let id = state.session_id(user_id, msg.chat.id.0);
    let started = Instant::now();
    info!(session = %id, message_id = msg.id.0, "Processing message");

    let answer = {
        let _typing = Typing::start(bot.clone(), msg.chat.id);
        handle_ask(&state, id.clone(), text).await
    };

    info!(
        session = %id,
        message_id = msg.id.0,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Message processed"
    );

    reply(&bot, &msg, &answer).await
}

/// Keeps the typing indicator alive until dropped
struct Typing(JoinHandle<()>);

impl Typing {
    fn start(bot: Bot, chat_id: ChatId) -> Self {
        Self(tokio::spawn(async move {
            loop {
                if let Err(e) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
                    debug!("Failed to send typing action: {}", e);
                }
                tokio::time::sleep(TYPING_INTERVAL).await;
            }
        }))
    }
}

impl Drop for Typing {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Reply to `msg`, splitting long texts
async fn reply(bot: &Bot, msg: &Message, text: &str) -> Result<()> {
    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        deliver(bot, msg.chat.id, &chunk, Some(ReplyParameters::new(msg.id))).await?;
    }
    Ok(())
}

/// Send to a chat without quoting a message
async fn send(bot: &Bot, chat_id: ChatId, text: &str) -> Result<()> {
    for chunk in split_message(text, MAX_MESSAGE_CHARS) {
        deliver(bot, chat_id, &chunk, None).await?;
    }
    Ok(())
}

/// Send as Markdown, falling back to plain text when Telegram cannot parse it
async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to: Option<ReplyParameters>,
) -> Result<()> {
    let mut request = bot.send_message(chat_id, text).parse_mode(markdown());
    if let Some(params) = reply_to.clone() {
        request = request.reply_parameters(params);
    }

    match request.await {
        Ok(_) => Ok(()),
        Err(teloxide::RequestError::Api(e)) => {
            warn!(chat_id = chat_id.0, "Markdown rejected, sending plain text: {}", e);
            let mut request = bot.send_message(chat_id, text);
            if let Some(params) = reply_to {
                request = request.reply_parameters(params);
            }
            request.await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// The message catalog and model replies use legacy Markdown
#[allow(deprecated)]
fn markdown() -> ParseMode {
    ParseMode::Markdown
}

/// Split `text` into pieces of at most `limit` characters, preferring line breaks
fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > limit {
            for c in line.chars() {
                if current_len == limit {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push(c);
                current_len += 1;
            }
        } else {
            current.push_str(line);
            current_len += line_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start", "tgpt_bot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/stats", "tgpt_bot").unwrap(), Command::Stats);
        assert_eq!(
            Command::parse("/restart you are a helpful assistant", "tgpt_bot").unwrap(),
            Command::Restart("you are a helpful assistant".to_string())
        );
        assert_eq!(Command::parse("/help@tgpt_bot", "tgpt_bot").unwrap(), Command::Help);
        assert!(Command::parse("/resend", "tgpt_bot").is_err());
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n".to_string(), "cccc".to_string()]);
    }

    #[test]
    fn test_split_long_line_by_chars() {
        let text = "я".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
