use std::sync::Arc;

use crate::classify::Classifier;
use crate::index::IndexStore;
use crate::message::{Email, EmailCategory};
use crate::notify::Notifier;

/// Ordered processing of normalized messages: index, classify, label,
/// notify. Safe under concurrent invocation; every write is an upsert
/// keyed by message identity.
///
/// No step failure ever propagates to the caller. Indexing must commit
/// before classification because the label write is a partial update
/// that requires the document to already exist.
pub struct Pipeline {
    index: Arc<dyn IndexStore>,
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        index: Arc<dyn IndexStore>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Pipeline {
            index,
            classifier,
            notifier,
        }
    }

    /// Single-message run: upsert, then classify and route.
    pub async fn process(&self, email: Email) {
        if let Err(e) = self.index.upsert(&email).await {
            log::error!("Error indexing message {}: {e}", email.id);
            return;
        }
        self.classify_and_route(email).await;
    }

    /// Batch run for backfill: every message is indexed before any
    /// message advances to classification.
    pub async fn process_batch(&self, emails: Vec<Email>) {
        if emails.is_empty() {
            return;
        }
        if let Err(e) = self.index.bulk_upsert(&emails).await {
            log::error!("Error bulk indexing {} messages: {e}", emails.len());
            return;
        }
        for email in emails {
            self.classify_and_route(email).await;
        }
    }

    async fn classify_and_route(&self, mut email: Email) {
        let category = match self.classifier.classify(&email).await {
            Ok(category) => category,
            Err(e) => {
                log::error!("Error classifying message {}: {e}", email.id);
                return;
            }
        };
        email.category = Some(category);
        log::debug!("Message {} classified as {category}", email.id);

        if let Err(e) = self.index.update_category(&email.id, category).await {
            log::error!("Error updating category for {}: {e}", email.id);
            return;
        }

        if category == EmailCategory::Interested {
            if let Err(e) = self.notifier.chat_alert(&email).await {
                log::error!("Error sending chat alert for {}: {e}", email.id);
            }
            if let Err(e) = self.notifier.webhook_event(&email).await {
                log::error!("Error triggering webhook for {}: {e}", email.id);
            }
        }
    }
}
