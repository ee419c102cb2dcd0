//! Reply drafting with retrieved rules as prompt context.

use std::sync::{Arc, OnceLock};

use log::{info, warn};
use regex::Regex;
use thiserror::Error;

use crate::config::ReplySettings;
use crate::db::DatabaseError;

use super::retrieval::RuleStore;
use super::{sanitize_for_prompt, Embedder, LanguageModel, ModelError};

/// Number of suggestions requested from the model.
pub const SUGGESTION_COUNT: usize = 3;

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("Subject and body must not both be empty")]
    EmptyInput,

    #[error("Rule text must not be empty")]
    EmptyRule,

    #[error("Model returned no numbered suggestions")]
    UnexpectedFormat { raw: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub struct ReplyAssistant {
    model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    rules: RuleStore,
    settings: ReplySettings,
}

impl ReplyAssistant {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        rules: RuleStore,
        settings: ReplySettings,
    ) -> Self {
        Self {
            model,
            embedder,
            rules,
            settings,
        }
    }

    /// Embeds and stores a rule, replacing any rule with the same id.
    pub async fn save_rule(&self, id: &str, text: &str) -> Result<(), ReplyError> {
        if text.trim().is_empty() {
            return Err(ReplyError::EmptyRule);
        }
        let embedding = self.embedder.embed(text).await?;
        self.rules.add_rule(id, text, &embedding)?;
        info!("Saved reply rule '{}'", id);
        Ok(())
    }

    /// Drafts a single reply guided by the most relevant stored rules.
    pub async fn draft_reply(&self, subject: &str, body: &str) -> Result<String, ReplyError> {
        let email = email_text(subject, body)?;
        let embedding = self.embedder.embed(&email).await?;
        let rules = self.rules.search(&embedding, self.settings.top_k)?;
        let rule_texts: Vec<&str> = rules.iter().map(|r| r.text.as_str()).collect();

        let prompt = draft_prompt(&rule_texts, &self.settings.booking_link, &email);
        let reply = self.model.generate(&prompt).await?;
        Ok(reply.trim().to_string())
    }

    /// Asks for three short replies.
    ///
    /// Partial answers are accepted; only a response without any numbered
    /// item is an error.
    pub async fn suggest_replies(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<Vec<String>, ReplyError> {
        email_text(subject, body)?;
        let prompt = format!(
            "I received an email with the subject: \"{}\" and the body: \"{}\".\n\
             Generate exactly {} professional, concise, and polite replies I could send in response.\n\
             Label them as 1., 2., and 3. for easy parsing.",
            sanitize_for_prompt(subject.trim()),
            sanitize_for_prompt(body.trim()),
            SUGGESTION_COUNT
        );

        let raw = self.model.generate(&prompt).await?;
        let suggestions = parse_suggestions(&raw);
        if suggestions.is_empty() {
            return Err(ReplyError::UnexpectedFormat { raw });
        }
        if suggestions.len() < SUGGESTION_COUNT {
            warn!(
                "Model returned {} of {} reply suggestions",
                suggestions.len(),
                SUGGESTION_COUNT
            );
        }
        Ok(suggestions)
    }
}

fn email_text(subject: &str, body: &str) -> Result<String, ReplyError> {
    if subject.trim().is_empty() && body.trim().is_empty() {
        return Err(ReplyError::EmptyInput);
    }
    Ok(format!("{}\n{}", subject.trim(), body.trim()))
}

fn draft_prompt(rules: &[&str], booking_link: &str, email: &str) -> String {
    format!(
        "You are an AI assistant helping reply to job-related emails.\n\n\
         Use the following rules to guide your reply:\n{}\n\n\
         Keep the reply short, polite, and professional.\n\
         Include the following booking link exactly: {}\n\
         Do NOT add any extra salutations or signatures.\n\n\
         Email received:\n\"\"\"\n{}\n\"\"\"\n\n\
         Reply concisely:",
        rules.join("\n"),
        booking_link,
        sanitize_for_prompt(email)
    )
}

/// Splits `1. foo 2. bar 3. baz` style output into items.
///
/// Text before the first marker is dropped; at most three items are kept.
pub fn parse_suggestions(raw: &str) -> Vec<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s+").expect("valid regex"));

    let starts: Vec<(usize, usize)> = marker.find_iter(raw).map(|m| (m.start(), m.end())).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &(_, content_start))| {
            let end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(raw.len());
            raw[content_start..end].trim().to_string()
        })
        .filter(|s| !s.is_empty())
        .take(SUGGESTION_COUNT)
        .collect()
}
