//! AI-backed anime title parsing

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Category, TitleParseResult};

use super::client::AiCaller;
use super::prompts;
use super::schemas;

/// Raw wire shape of the title-parse response
#[derive(Debug, Deserialize)]
struct TitleParseRaw {
    original_title: Option<String>,
    anime_full_title: Option<String>,
    anime_clean_title: String,
    subtitle_group_name: Option<String>,
    episode: Option<f64>,
    season: Option<u32>,
    category: Option<String>,
}

/// Parses release titles into structured anime metadata
///
/// The system prompt is specialised with the configured language-priority
/// list so the upstream picks `clean_title` in the user's preferred language.
pub struct TitleParser {
    caller: AiCaller,
    system_prompt: String,
}

impl TitleParser {
    /// Create a parser over an AI caller with the given language priority
    pub fn new(caller: AiCaller, language_priority: &[String]) -> Self {
        let system_prompt = prompts::title_parse_system_prompt(language_priority);
        Self {
            caller,
            system_prompt,
        }
    }

    /// Parse a release title.
    ///
    /// Returns `Ok(None)` when the upstream kept failing or never produced a
    /// valid result within the retry budget; the orchestrator then falls back
    /// to regex heuristics or records the title as unparseable.
    ///
    /// # Errors
    ///
    /// [`Error::CircuitOpen`] and [`Error::KeysExhausted`] propagate so the
    /// caller can distinguish "try later" from "unparseable".
    pub async fn parse(&self, title: &str) -> Result<Option<TitleParseResult>> {
        tracing::info!(title = %title.chars().take(50).collect::<String>(), "parsing title");

        let raw: TitleParseRaw = match self
            .caller
            .call_json(
                &self.system_prompt,
                title,
                schemas::title_parse_response_format(),
            )
            .await
        {
            Ok(raw) => raw,
            Err(Error::UpstreamFault(message)) | Err(Error::ParseFailure(message)) => {
                tracing::error!(error = %message, "title parse failed after retries");
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        if raw.anime_clean_title.trim().is_empty() {
            tracing::warn!("upstream returned an empty clean title");
            return Ok(None);
        }

        let result = TitleParseResult {
            original_title: raw
                .original_title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| title.to_string()),
            clean_title: raw.anime_clean_title.trim().to_string(),
            full_title: raw.anime_full_title.filter(|t| !t.is_empty()),
            subtitle_group: raw.subtitle_group_name.unwrap_or_default(),
            season: raw.season.unwrap_or(1),
            episode: raw.episode.map(|e| e.round() as u32),
            category: raw
                .category
                .as_deref()
                .map(Category::from_str_lossy)
                .unwrap_or_default(),
        };

        tracing::info!(
            clean_title = %result.clean_title,
            season = result.season,
            episode = ?result.episode,
            category = %result.category,
            "title parsed"
        );
        Ok(Some(result))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use crate::config::AiTaskConfig;
    use crate::keypool::{KeyPool, KeySpec};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parser_for(server: &MockServer, retries: u32) -> TitleParser {
        let pool = KeyPool::new("title_parse");
        pool.configure(vec![KeySpec {
            key_id: "k0".to_string(),
            name: "Key 0".to_string(),
            api_key: "sk-test".to_string(),
            base_url: server.uri(),
            model: "test-model".to_string(),
            rpm_limit: 0,
            rpd_limit: 0,
            enabled: true,
        }]);
        let task = AiTaskConfig {
            retries,
            timeout: 10,
            ..Default::default()
        };
        let caller = AiCaller::new(
            "title_parse",
            Arc::new(pool),
            Arc::new(CircuitBreaker::new("title_parse")),
            &task,
            300,
            None,
        )
        .unwrap();
        TitleParser::new(caller, &["中文".to_string(), "English".to_string()])
    }

    fn chat_response(content: serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [
                { "message": { "role": "assistant", "content": content.to_string() } }
            ]
        })
    }

    #[tokio::test]
    async fn parses_a_frieren_episode_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(json!({
                "original_title": "[ANi] 葬送的芙莉莲 - 02 [1080P][Baha][WEB-DL][AAC AVC][CHT][MP4]",
                "anime_full_title": "Frieren: Beyond Journey's End / 葬送的芙莉莲",
                "anime_clean_title": "葬送的芙莉莲",
                "subtitle_group_name": "ANi",
                "episode": 2,
                "season": 1,
                "category": "tv"
            }))))
            .mount(&server)
            .await;

        let parser = parser_for(&server, 3);
        let result = parser
            .parse("[ANi] 葬送的芙莉莲 - 02 [1080P][Baha][WEB-DL][AAC AVC][CHT][MP4]")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.clean_title, "葬送的芙莉莲");
        assert_eq!(result.subtitle_group, "ANi");
        assert_eq!(result.season, 1);
        assert_eq!(result.episode, Some(2));
        assert_eq!(result.category, Category::Tv);
    }

    #[tokio::test]
    async fn null_episode_and_missing_season_get_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(json!({
                "original_title": "",
                "anime_full_title": "Suzume",
                "anime_clean_title": "Suzume",
                "subtitle_group_name": "ANi",
                "episode": null,
                "category": "movie"
            }))))
            .mount(&server)
            .await;

        let parser = parser_for(&server, 1);
        let result = parser.parse("[ANi] Suzume 剧场版").await.unwrap().unwrap();

        assert_eq!(result.season, 1);
        assert_eq!(result.episode, None);
        assert_eq!(result.category, Category::Movie);
        // Empty echoed original falls back to the input
        assert_eq!(result.original_title, "[ANi] Suzume 剧场版");
    }

    #[tokio::test]
    async fn persistent_upstream_failure_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(json!({
                "anime_clean_title": ""
            }))))
            .mount(&server)
            .await;

        let parser = parser_for(&server, 1);
        let result = parser.parse("garbage").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn circuit_open_propagates_as_error() {
        let server = MockServer::start().await;
        let pool = KeyPool::new("title_parse");
        pool.configure(vec![KeySpec {
            key_id: "k0".to_string(),
            name: "Key 0".to_string(),
            api_key: "sk-test".to_string(),
            base_url: server.uri(),
            model: "m".to_string(),
            rpm_limit: 0,
            rpd_limit: 0,
            enabled: true,
        }]);
        let breaker = Arc::new(CircuitBreaker::new("title_parse"));
        breaker.trip(None, Some("test"));

        let task = AiTaskConfig {
            retries: 1,
            timeout: 10,
            ..Default::default()
        };
        let caller = AiCaller::new(
            "title_parse",
            Arc::new(pool),
            breaker,
            &task,
            300,
            None,
        )
        .unwrap();
        let parser = TitleParser::new(caller, &[]);

        let err = parser.parse("whatever").await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
    }
}
