//! Out-of-band notifications
//!
//! Job completion notices go out through a channel drained by a worker task
//! that POSTs to the Telegram sendMessage API. Without a configured bot
//! token and chat id the worker logs and drops; delivery failures are logged
//! and never propagated back to the sender.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Telegram caps messages at 4096 chars; stay under it.
const MAX_TEXT_CHARS: usize = 4000;

pub fn create_notify_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(64)
}

/// Notification worker that drains the channel and POSTs to Telegram
pub struct Notifier {
    rx: mpsc::Receiver<String>,
    client: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl Notifier {
    pub fn new(
        rx: mpsc::Receiver<String>,
        bot_token: Option<String>,
        chat_id: Option<String>,
    ) -> Self {
        Self {
            rx,
            client: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    /// Run the notifier (call from tokio::spawn)
    pub async fn run(mut self) {
        info!(
            component = "notify",
            event = "notify.started",
            configured = self.bot_token.is_some() && self.chat_id.is_some(),
            "Notifier started"
        );

        while let Some(text) = self.rx.recv().await {
            self.deliver(text).await;
        }
    }

    async fn deliver(&self, text: String) {
        let (Some(token), Some(chat_id)) = (self.bot_token.as_deref(), self.chat_id.as_deref())
        else {
            debug!(
                component = "notify",
                event = "notify.unconfigured",
                "Dropping notification, Telegram is not configured"
            );
            return;
        };

        let text = truncate_chars(text, MAX_TEXT_CHARS);
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    component = "notify",
                    event = "notify.sent",
                    "Notification delivered"
                );
            }
            Ok(response) => {
                warn!(
                    component = "notify",
                    event = "notify.rejected",
                    status = %response.status(),
                    "Telegram rejected the notification"
                );
            }
            Err(e) => {
                warn!(
                    component = "notify",
                    event = "notify.failed",
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{create_notify_channel, truncate_chars, Notifier};

    #[test]
    fn short_texts_pass_through_untouched() {
        assert_eq!(truncate_chars("hello".to_string(), 10), "hello");
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let text = "é".repeat(20);
        let cut = truncate_chars(text, 5);
        assert_eq!(cut.chars().count(), 5);
        assert_eq!(cut, "ééééé");
    }

    #[tokio::test]
    async fn unconfigured_worker_drains_and_exits() {
        let (tx, rx) = create_notify_channel();
        let worker = tokio::spawn(Notifier::new(rx, None, None).run());

        tx.send("✅ job done".to_string()).await.expect("send");
        drop(tx);

        // Without credentials nothing leaves the process; the worker just
        // drains the queue and stops when the channel closes.
        worker.await.expect("worker task");
    }
}
