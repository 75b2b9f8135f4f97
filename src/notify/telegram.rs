use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::Requester;
use teloxide::types::{ChatId, ParseMode};
use teloxide::Bot;
use tracing::{error, info};
use crate::{
    config::TelegramConfig,
    error::{ComplianceError, Result},
    notify::{Notifier, NotifyEvent},
    storage::{BatchJob, BatchStatus, SuppressionEntry},
};

pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.chat_ids.is_empty() {
            info!("No Telegram chats configured for notifications");
            return None;
        }

        info!("Telegram notifier initialized for {} chats", config.chat_ids.len());
        Some(Self {
            bot: Bot::new(config.bot_token.clone()),
            chat_ids: config.chat_ids.clone(),
        })
    }

    fn format_batch(job: &BatchJob) -> String {
        let emoji = match job.status {
            BatchStatus::Failed => "❌",
            _ if job.failed_items == 0 => "🎉",
            _ => "📦",
        };
        format!(
            "{} *Compliance Batch {}*\n\n\
            Job: `{}`\n\
            📋 Total: {}\n\
            ✅ Checked: {}\n\
            ❌ Failed: {}\n\n\
            _{}_",
            emoji,
            job.status,
            job.id,
            job.total_items,
            job.successful_items,
            job.failed_items,
            job.label.as_deref().unwrap_or("Unlabelled batch"),
        )
    }

    fn format_dnc(entry: &SuppressionEntry) -> String {
        format!(
            "🚫 *Added to DNC*\n\n\
            Identifier: `{}`\n\
            Reason: {}\n\
            Source: {}",
            Self::mask(&entry.identifier),
            entry.reason,
            entry.source,
        )
    }

    /// Keep only the last four characters visible
    fn mask(value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 4 {
            return value.to_string();
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }

    async fn send_to_all(&self, message: &str) -> usize {
        let mut failures = 0;
        for chat_id in &self.chat_ids {
            if let Err(e) = self
                .bot
                .send_message(ChatId(*chat_id), message)
                .parse_mode(ParseMode::Markdown)
                .await
            {
                error!("Failed to send notification to chat {}: {}", chat_id, e);
                failures += 1;
            }
        }
        failures
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, event: &NotifyEvent) -> Result<()> {
        let message = match event {
            NotifyEvent::BatchCompleted(job) => Self::format_batch(job),
            NotifyEvent::DncAdded(entry) => Self::format_dnc(entry),
        };

        let failures = self.send_to_all(&message).await;
        if failures == self.chat_ids.len() {
            return Err(ComplianceError::Other(anyhow::anyhow!(
                "telegram delivery failed for all {} chats",
                failures
            )));
        }
        Ok(())
    }
}
