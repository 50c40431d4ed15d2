use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, Recipient};
use teloxide::utils::html;
use tracing::{debug, warn};

/// Previews longer than this are cut before sending.
pub const PREVIEW_MAX_CHARS: usize = 500;

/// Downstream notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        title: &str,
        url: &str,
        source_label: &str,
        preview: Option<&str>,
    ) -> Result<()>;
}

/// Send through `notifier`, logging instead of propagating failures.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    title: &str,
    url: &str,
    source_label: &str,
    preview: Option<&str>,
) -> bool {
    match notifier.notify(title, url, source_label, preview).await {
        Ok(()) => true,
        Err(err) => {
            warn!(?err, title, url, source_label, "notification failed");
            false
        }
    }
}

/// Posts HTML-formatted messages to a single Telegram chat.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat: Recipient,
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self {
            bot: Bot::new(token),
            chat: parse_recipient(chat_id),
        }
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`. Both are required.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let chat_id = lookup("TELEGRAM_CHAT_ID").unwrap_or_default();
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set");
        }
        Ok(Self::new(token.trim(), chat_id.trim()))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(
        &self,
        title: &str,
        url: &str,
        source_label: &str,
        preview: Option<&str>,
    ) -> Result<()> {
        let text = format_message(title, url, source_label, preview);
        debug!(chat = ?self.chat, %url, "sending telegram message");
        self.bot
            .send_message(self.chat.clone(), text)
            .parse_mode(ParseMode::Html)
            .await
            .context("telegram send_message failed")?;
        Ok(())
    }
}

/// Numeric ids address chats directly; anything else is a channel username.
pub fn parse_recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

/// Trim and cut `preview` to [`PREVIEW_MAX_CHARS`] characters.
pub fn truncate_preview(preview: &str) -> &str {
    let trimmed = preview.trim();
    match trimmed.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

pub fn format_message(title: &str, url: &str, source_label: &str, preview: Option<&str>) -> String {
    let preview = preview.map(truncate_preview).unwrap_or_default();
    format!(
        "<b>{}</b>\n{}\n\n<a href=\"{}\">Open</a> · <i>{}</i>",
        html::escape(title),
        html::escape(preview),
        html::escape(url),
        html::escape(source_label),
    )
}
