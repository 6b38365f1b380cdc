//! Classification collaborator used by the enrich capability.
//!
//! Two providers:
//! - **`keyword`**: title keyword heuristics, offline and deterministic.
//! - **`chat`**: any OpenAI-compatible chat-completions endpoint (Groq by
//!   default) asked to answer with a JSON object.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use radio_cortex_core::error::CollaboratorError;
use radio_cortex_core::models::Item;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::http;

/// Categorical metadata derived for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(alias = "primary_genre")]
    pub category: String,
    #[serde(default, alias = "secondary_genres")]
    pub secondary_categories: Vec<String>,
    #[serde(default)]
    pub mood_tags: Vec<String>,
    #[serde(default)]
    pub cultural_context: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, item: &Item) -> Result<Classification, CollaboratorError>;
}

// ============ Keyword Classifier ============

const KEYWORD_RULES: &[(&[&str], &str)] = &[
    (&["jazz", "bossa", "swing"], "Jazz"),
    (&["rock", "metal", "punk"], "Rock"),
    (&["classical", "symphony", "concerto"], "Classical"),
    (&["electronic", "techno", "house"], "Electronic"),
];

pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, item: &Item) -> Result<Classification, CollaboratorError> {
        let title = item.title.to_lowercase();
        let category = KEYWORD_RULES
            .iter()
            .find(|(words, _)| words.iter().any(|w| title.contains(w)))
            .map(|(_, category)| *category)
            .unwrap_or("Unknown");

        Ok(Classification {
            category: category.to_string(),
            secondary_categories: Vec::new(),
            mood_tags: vec!["neutral".to_string()],
            cultural_context: None,
        })
    }
}

// ============ Chat Classifier ============

const SYSTEM_PROMPT: &str = "You are a music classification expert. \
Analyze tracks and return JSON with genre, mood, and cultural context.";

pub struct ChatClassifier {
    url: String,
    model: String,
    api_key: String,
    client: Client,
}

impl ChatClassifier {
    /// # Errors
    ///
    /// Returns an error if the environment variable named by
    /// `classifier.api_key_env` is not set.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            client: http::client(Duration::from_secs(config.timeout_secs))?,
        })
    }
}

#[async_trait]
impl Classifier for ChatClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, item: &Item) -> Result<Classification, CollaboratorError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_prompt(item)},
            ],
            "temperature": 0.3,
            "max_tokens": 500,
        });
        // One attempt; the runner owns retries for classification.
        let json = http::post_json("classifier", 0, || {
            self.client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                CollaboratorError::Terminal("classifier response has no message content".into())
            })?;
        parse_classification(content)
    }
}

fn build_prompt(item: &Item) -> String {
    let duration = item
        .duration_secs
        .map(|d| format!("{}s", d))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Analyze this music track and classify it.\n\n\
         Title: {}\n\
         Artist: {}\n\
         Album: {}\n\
         Duration: {}\n\n\
         Return a JSON object with:\n\
         - primary_genre: Main genre (e.g., \"Bossa Nova\", \"Jazz\", \"Rock\")\n\
         - secondary_genres: List of 1-2 related genres\n\
         - mood_tags: List of 2-3 mood keywords (e.g., \"calm\", \"energetic\", \"melancholic\")\n\
         - cultural_context: Brief cultural/geographic context if identifiable (max 50 words)\n\n\
         Return ONLY the JSON object, no other text.",
        item.title,
        item.artist.as_deref().unwrap_or("Unknown"),
        item.album.as_deref().unwrap_or("Unknown"),
        duration,
    )
}

/// Parse the model's answer, tolerating a surrounding markdown fence.
fn parse_classification(content: &str) -> Result<Classification, CollaboratorError> {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }

    let parsed: Classification = serde_json::from_str(text.trim()).map_err(|e| {
        CollaboratorError::Terminal(format!("classifier returned unparseable JSON: {}", e))
    })?;
    if parsed.category.trim().is_empty() {
        return Err(CollaboratorError::Terminal(
            "classifier returned an empty category".into(),
        ));
    }
    Ok(parsed)
}

pub fn create_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    match config.provider.as_str() {
        "keyword" => Ok(Box::new(KeywordClassifier)),
        "chat" => Ok(Box::new(ChatClassifier::new(config)?)),
        other => bail!("Unknown classifier provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_cortex_core::license::LicenseKind;
    use radio_cortex_core::models::NewItem;

    fn item(title: &str) -> Item {
        Item::from_new(
            "id-1".into(),
            NewItem {
                source: "test".into(),
                source_id: "1".into(),
                title: title.into(),
                artist: Some("Tom Jobim".into()),
                album: None,
                duration_secs: Some(200),
                license_raw: None,
                license_kind: LicenseKind::CcBy,
                source_url: "https://example.org/1".into(),
                media_url: None,
                collected_by: "test".into(),
            },
            0,
        )
    }

    #[tokio::test]
    async fn test_keyword_rules() {
        let c = KeywordClassifier;
        assert_eq!(c.classify(&item("Bossa Nova Sunset")).await.unwrap().category, "Jazz");
        assert_eq!(c.classify(&item("Punk Anthem")).await.unwrap().category, "Rock");
        assert_eq!(c.classify(&item("Symphony No. 5")).await.unwrap().category, "Classical");
        assert_eq!(c.classify(&item("Deep House Mix")).await.unwrap().category, "Electronic");

        let unknown = c.classify(&item("Águas de Março")).await.unwrap();
        assert_eq!(unknown.category, "Unknown");
        assert_eq!(unknown.mood_tags, vec!["neutral"]);
    }

    #[test]
    fn test_parse_fenced_json_with_genre_names() {
        let content = "```json\n{\"primary_genre\": \"Bossa Nova\", \"secondary_genres\": [\"MPB\"], \
                       \"mood_tags\": [\"calm\"], \"cultural_context\": \"Brazil, 1960s\"}\n```";
        let parsed = parse_classification(content).unwrap();
        assert_eq!(parsed.category, "Bossa Nova");
        assert_eq!(parsed.secondary_categories, vec!["MPB"]);
        assert_eq!(parsed.cultural_context.as_deref(), Some("Brazil, 1960s"));
    }

    #[test]
    fn test_parse_garbage_is_terminal() {
        let err = parse_classification("I think it's jazz").unwrap_err();
        assert!(!err.is_retryable());
        assert!(parse_classification("{\"category\": \"  \"}").is_err());
    }

    #[test]
    fn test_prompt_mentions_track_fields() {
        let prompt = build_prompt(&item("Corcovado"));
        assert!(prompt.contains("Title: Corcovado"));
        assert!(prompt.contains("Artist: Tom Jobim"));
        assert!(prompt.contains("Duration: 200s"));
    }

    #[test]
    fn test_chat_classifier_requires_api_key() {
        let config = ClassifierConfig {
            provider: "chat".into(),
            api_key_env: "RADIO_CORTEX_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..ClassifierConfig::default()
        };
        assert!(create_classifier(&config).is_err());
    }
}
