use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

use crate::config::{ClassifierConfig, ProductConfig};
use crate::message::{Email, EmailCategory, SuggestedReply};

const BODY_EXCERPT_CHARS: usize = 1000;
const REPLY_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Http(String),
    #[error("classifier returned an unusable response: {0}")]
    Response(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, email: &Email) -> Result<EmailCategory, ClassifyError>;
}

struct CategoryRule {
    category: EmailCategory,
    patterns: Vec<Regex>,
}

/// Deterministic offline classifier. Category rules are evaluated in a
/// fixed precedence order and the first match wins:
/// out_of_office > meeting_booked > interested > not_interested > spam.
pub struct RuleClassifier {
    rules: Vec<CategoryRule>,
    interested_word: Regex,
}

impl RuleClassifier {
    pub fn new() -> anyhow::Result<Self> {
        let table: [(EmailCategory, &[&str]); 5] = [
            (
                EmailCategory::OutOfOffice,
                &["out of office", "automatic reply", "away from", "on vacation"],
            ),
            (
                EmailCategory::MeetingBooked,
                &[
                    "meeting confirmed",
                    "calendar invite",
                    "scheduled",
                    "booking confirmed",
                    "accepted your invitation",
                ],
            ),
            (
                EmailCategory::Interested,
                &[
                    "tell me more",
                    "sounds good",
                    "would like to",
                    "let's discuss",
                    "more information",
                ],
            ),
            (
                EmailCategory::NotInterested,
                &[
                    "not interested",
                    "no thank",
                    "unsubscribe",
                    "remove me",
                    "not at this time",
                ],
            ),
            (
                EmailCategory::Spam,
                &[
                    "click here",
                    "limited time offer",
                    "act now",
                    "congratulations",
                    "you have won",
                ],
            ),
        ];

        let mut rules = Vec::with_capacity(table.len());
        for (category, phrases) in table {
            let mut patterns = Vec::with_capacity(phrases.len());
            for phrase in phrases {
                patterns.push(Regex::new(&format!("(?i){}", regex::escape(phrase)))?);
            }
            rules.push(CategoryRule { category, patterns });
        }

        Ok(RuleClassifier {
            rules,
            interested_word: Regex::new(r"(?i)\binterested\b")?,
        })
    }

    pub fn classify_text(&self, text: &str) -> EmailCategory {
        for rule in &self.rules {
            if rule.patterns.iter().any(|p| p.is_match(text)) {
                return rule.category;
            }
            if rule.category == EmailCategory::Interested && self.mentions_interest(text) {
                return rule.category;
            }
        }
        EmailCategory::Uncategorized
    }

    /// The bare word "interested" counts only when it is not negated;
    /// "not interested" and "isn't interested" must not read as interest.
    fn mentions_interest(&self, text: &str) -> bool {
        for found in self.interested_word.find_iter(text) {
            let prefix = text[..found.start()].trim_end().to_lowercase();
            if prefix.ends_with("not") || prefix.ends_with("n't") {
                continue;
            }
            return true;
        }
        false
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, email: &Email) -> Result<EmailCategory, ClassifyError> {
        Ok(self.classify_text(&classification_text(email)))
    }
}

/// Remote classifier speaking the OpenAI-compatible chat-completions API.
/// Unreachable, unconfigured, or out-of-vocabulary responses all fall
/// back to the rule classifier; this never hard-fails.
pub struct LlmClassifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    fallback: RuleClassifier,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(LlmClassifier {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            fallback: RuleClassifier::new()?,
        })
    }

    pub fn configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn completion(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ClassifyError> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifyError::Http(format!("status {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClassifyError::Response(e.to_string()))?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ClassifyError::Response("missing completion content".to_string()))?;
        Ok(content.trim().to_string())
    }

    /// Generate a short reply suggestion from product context plus any
    /// relevant reply-context notes. Falls back to a static template when
    /// the remote model is unconfigured or unreachable.
    pub async fn suggest_reply(
        &self,
        email: &Email,
        product: &ProductConfig,
        notes: &str,
    ) -> SuggestedReply {
        if !self.configured() {
            return SuggestedReply {
                reply: "Classifier API key not configured; set classifier.api_key to generate \
                        suggested replies."
                    .to_string(),
                confidence: 0.0,
                context: "not configured".to_string(),
            };
        }

        let mut context = format!(
            "Product/Service: {}\nOutreach Purpose: {}\nMeeting Link: {}",
            product.name, product.outreach_agenda, product.meeting_link
        );
        if !notes.is_empty() {
            context.push_str("\nRelevant notes:\n");
            context.push_str(notes);
        }

        let prompt = format!(
            "Based on the context below, generate a professional and concise reply (max 150 \
             words). Include the meeting link if the sender shows interest.\n\n{}\n\nIncoming \
             Email:\nFrom: {}\nSubject: {}\nBody: {}",
            context,
            email.from,
            email.subject,
            body_excerpt(email, REPLY_EXCERPT_CHARS)
        );

        match self
            .completion(
                "You are a professional email assistant. Generate only the reply body, do not \
                 add signatures.",
                &prompt,
                0.7,
                400,
            )
            .await
        {
            Ok(reply) if !reply.is_empty() => SuggestedReply {
                reply,
                confidence: 0.85,
                context: "ai-generated".to_string(),
            },
            Ok(_) => SuggestedReply {
                reply: format!(
                    "Thanks for reaching out regarding {}. I'll get back to you shortly.",
                    email.subject
                ),
                confidence: 0.4,
                context: "ai-generated".to_string(),
            },
            Err(e) => {
                log::error!("Suggested reply generation failed: {e}");
                SuggestedReply {
                    reply: format!(
                        "Thank you for your email regarding {}. I appreciate your message and \
                         will follow up shortly.",
                        email.subject
                    ),
                    confidence: 0.3,
                    context: "fallback template".to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, email: &Email) -> Result<EmailCategory, ClassifyError> {
        if !self.configured() {
            log::warn!("Classifier API key not set, using rule-based categorization");
            return Ok(self.fallback.classify_text(&classification_text(email)));
        }

        let prompt = format!(
            "Analyze this email and respond with ONLY one of the following category keywords: \
             interested, meeting_booked, not_interested, spam, out_of_office, uncategorized.\n\n\
             Email: From: {}\nSubject: {}\nBody: {}",
            email.from,
            email.subject,
            body_excerpt(email, BODY_EXCERPT_CHARS)
        );

        let answer = match self
            .completion(
                "You are an email categorization assistant. Respond with exactly one keyword \
                 from the allowed list.",
                &prompt,
                0.0,
                10,
            )
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("Remote classification failed: {e}");
                return Ok(self.fallback.classify_text(&classification_text(email)));
            }
        };

        match EmailCategory::from_keyword(&answer) {
            Some(category) => Ok(category),
            None => {
                log::warn!("Classifier returned out-of-vocabulary answer '{answer}'");
                Ok(self.fallback.classify_text(&classification_text(email)))
            }
        }
    }
}

fn classification_text(email: &Email) -> String {
    let body = if email.text_body.is_empty() {
        &email.body
    } else {
        &email.text_body
    };
    format!("{} {}", email.subject, body)
}

fn body_excerpt(email: &Email, max_chars: usize) -> String {
    let body = if email.text_body.is_empty() {
        &email.body
    } else {
        &email.text_body
    };
    body.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn email_with_body(subject: &str, body: &str) -> Email {
        Email {
            id: "id".to_string(),
            account_id: "account1".to_string(),
            message_id: "mid".to_string(),
            from: "sender@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            subject: subject.to_string(),
            body: body.to_string(),
            text_body: body.to_string(),
            date: Utc::now(),
            folder: "INBOX".to_string(),
            flags: Vec::new(),
            category: None,
            raw: None,
        }
    }

    #[test]
    fn test_single_trigger_per_category() {
        let rules = RuleClassifier::new().unwrap();
        assert_eq!(
            rules.classify_text("I will be out of office until Monday"),
            EmailCategory::OutOfOffice
        );
        assert_eq!(
            rules.classify_text("Your booking confirmed for Tuesday"),
            EmailCategory::MeetingBooked
        );
        assert_eq!(
            rules.classify_text("sounds good, send the details"),
            EmailCategory::Interested
        );
        assert_eq!(
            rules.classify_text("please remove me from this list"),
            EmailCategory::NotInterested
        );
        assert_eq!(
            rules.classify_text("act now to claim your prize"),
            EmailCategory::Spam
        );
        assert_eq!(
            rules.classify_text("see attached quarterly report"),
            EmailCategory::Uncategorized
        );
    }

    #[test]
    fn test_earlier_category_wins_on_overlap() {
        let rules = RuleClassifier::new().unwrap();
        // out_of_office beats interested
        assert_eq!(
            rules.classify_text("Automatic reply: tell me more next week"),
            EmailCategory::OutOfOffice
        );
        // meeting_booked beats interested
        assert_eq!(
            rules.classify_text("Meeting confirmed, I am interested in the agenda"),
            EmailCategory::MeetingBooked
        );
        // interested beats spam
        assert_eq!(
            rules.classify_text("sounds good, but why does it say click here"),
            EmailCategory::Interested
        );
    }

    #[test]
    fn test_negated_interest_is_not_interest() {
        let rules = RuleClassifier::new().unwrap();
        assert_eq!(
            rules.classify_text("I am not interested, please remove me"),
            EmailCategory::NotInterested
        );
        assert_ne!(
            rules.classify_text("we aren't interested at all"),
            EmailCategory::Interested
        );
        // plain interest still counts
        assert_eq!(
            rules.classify_text("I am interested in a demo"),
            EmailCategory::Interested
        );
        assert_eq!(
            rules.classify_text("Interested in learning more about pricing"),
            EmailCategory::Interested
        );
    }

    #[test]
    fn test_negation_inside_word_does_not_match() {
        let rules = RuleClassifier::new().unwrap();
        assert_ne!(
            rules.classify_text("they seemed uninterested"),
            EmailCategory::Interested
        );
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let rules = RuleClassifier::new().unwrap();
        assert_eq!(
            rules.classify_text("OUT OF OFFICE"),
            EmailCategory::OutOfOffice
        );
        assert_eq!(rules.classify_text("UNSUBSCRIBE"), EmailCategory::NotInterested);
    }

    #[tokio::test]
    async fn test_subject_participates_in_classification() {
        let rules = RuleClassifier::new().unwrap();
        let email = email_with_body("Meeting confirmed for Friday", "see you there");
        assert_eq!(
            rules.classify(&email).await.unwrap(),
            EmailCategory::MeetingBooked
        );
    }

    #[tokio::test]
    async fn test_unconfigured_llm_uses_rule_fallback() {
        let classifier = LlmClassifier::new(&ClassifierConfig::default()).unwrap();
        assert!(!classifier.configured());
        let email = email_with_body("Re: your outreach", "I am not interested, please remove me");
        assert_eq!(
            classifier.classify(&email).await.unwrap(),
            EmailCategory::NotInterested
        );
    }

    #[tokio::test]
    async fn test_unconfigured_reply_suggestion_is_template() {
        let classifier = LlmClassifier::new(&ClassifierConfig::default()).unwrap();
        let email = email_with_body("Pricing", "tell me more");
        let suggestion = classifier
            .suggest_reply(&email, &ProductConfig::default(), "")
            .await;
        assert_eq!(suggestion.confidence, 0.0);
        assert_eq!(suggestion.context, "not configured");
    }

    #[test]
    fn test_body_excerpt_is_char_bounded() {
        let mut email = email_with_body("s", "");
        email.text_body = "é".repeat(2000);
        let excerpt = body_excerpt(&email, 1000);
        assert_eq!(excerpt.chars().count(), 1000);
    }
}
