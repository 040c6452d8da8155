//! Offline notification dispatch.
//!
//! For a freshly created message, every participant except the author who is
//! offline, has device tokens, and has not been notified for this message
//! gets one push. Provider failures are logged and swallowed.

pub mod dedupe;
pub mod push;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::presence::PresenceRegistry;
use crate::db::{self, models::MessageRecord, DbPool};
use dedupe::DedupeCache;
use push::{PushMessage, PushProvider};

/// Notification body for a message.
pub fn preview(content: Option<&str>, attachment: Option<&str>) -> String {
    match (content, attachment) {
        (Some(text), _) if !text.is_empty() => text.to_string(),
        (_, Some(a)) if !a.is_empty() => "Sent a photo".to_string(),
        _ => "New message".to_string(),
    }
}

#[derive(Clone)]
pub struct OfflineNotifier {
    db: DbPool,
    presence: PresenceRegistry,
    dedupe: DedupeCache,
    provider: Arc<dyn PushProvider>,
    store_timeout: Duration,
}

impl OfflineNotifier {
    pub fn new(
        db: DbPool,
        presence: PresenceRegistry,
        dedupe: DedupeCache,
        provider: Arc<dyn PushProvider>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            presence,
            dedupe,
            provider,
            store_timeout,
        }
    }

    pub fn dedupe(&self) -> &DedupeCache {
        &self.dedupe
    }

    /// Fire-and-forget: run `notify` on its own task.
    pub fn dispatch(&self, message: MessageRecord, sender_name: String, participants: Vec<String>) {
        let notifier = self.clone();
        tokio::spawn(async move {
            let sent = notifier.notify(&message, &sender_name, &participants).await;
            if sent > 0 {
                tracing::debug!(message_id = %message.id, recipients = sent, "Offline pushes sent");
            }
        });
    }

    /// Push to each offline participant. Returns how many recipients were pushed.
    pub async fn notify(&self, message: &MessageRecord, sender_name: &str, participants: &[String]) -> usize {
        let title = if sender_name.is_empty() {
            "New message".to_string()
        } else {
            sender_name.to_string()
        };
        let push = PushMessage {
            title,
            body: preview(message.content.as_deref(), message.attachment.as_deref()),
            data: HashMap::from([
                ("conversationId".to_string(), message.conversation_id.clone()),
                ("messageId".to_string(), message.id.clone()),
            ]),
            collapse_key: message.id.clone(),
        };

        let mut sent = 0;
        for recipient in participants {
            if recipient == &message.sender_id || self.presence.is_online(recipient) {
                continue;
            }

            let uid = recipient.clone();
            let tokens = match db::run(&self.db, self.store_timeout, move |conn| {
                db::users::push_tokens(conn, &uid)
            })
            .await
            {
                Ok(tokens) => tokens,
                Err(e) => {
                    tracing::warn!(user_id = %recipient, error = %e, "Failed to load push tokens");
                    continue;
                }
            };
            if tokens.is_empty() {
                continue;
            }
            if !self.dedupe.first_fire(recipient, &message.id) {
                continue;
            }

            match self.provider.send(&tokens, &push).await {
                Ok(report) => {
                    sent += 1;
                    tracing::debug!(
                        user_id = %recipient,
                        message_id = %message.id,
                        success = report.success,
                        failure = report.failure,
                        "Push delivered to provider"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %recipient,
                        message_id = %message.id,
                        error = %e,
                        "Push notification send failed"
                    );
                }
            }
        }
        sent
    }
}
