//! AI-backed subtitle-to-video matching

use serde::Deserialize;

use crate::error::{Error, Result};

use super::client::AiCaller;
use super::prompts;
use super::schemas;

/// One matched video/subtitle pair
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SubtitleMatch {
    /// Key of the video in the request list (`v1`, `v2`, ...)
    pub video_key: String,
    /// Key of the subtitle in the request list (`s1`, `s2`, ...)
    pub subtitle_key: String,
    /// Normalised language tag (chs, cht, eng, jpn, kor, ...)
    pub language_tag: String,
    /// New subtitle file name, without any season directory prefix
    pub new_name: String,
}

/// Full matching result for one torrent
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubtitleMatchResult {
    /// Matched pairs
    pub matches: Vec<SubtitleMatch>,
    /// Subtitle keys with no matching video
    #[serde(default)]
    pub unmatched_subtitles: Vec<String>,
    /// Video keys with no matching subtitle
    #[serde(default)]
    pub videos_without_subtitle: Vec<String>,
}

/// Matches subtitle files to their videos through the AI upstream
pub struct SubtitleMatcher {
    caller: AiCaller,
}

impl SubtitleMatcher {
    /// Create a matcher over an AI caller
    pub fn new(caller: AiCaller) -> Self {
        Self { caller }
    }

    /// Match subtitles against videos.
    ///
    /// Both lists are keyed (`v1..`, `s1..`) in the user message; the result
    /// refers to files by key so names with odd characters survive the trip.
    pub async fn match_subtitles(
        &self,
        videos: &[String],
        subtitles: &[String],
        anime_title: &str,
    ) -> Result<SubtitleMatchResult> {
        if subtitles.is_empty() {
            return Ok(SubtitleMatchResult::default());
        }
        if videos.is_empty() {
            return Ok(SubtitleMatchResult {
                unmatched_subtitles: (1..=subtitles.len()).map(|i| format!("s{i}")).collect(),
                ..Default::default()
            });
        }

        let user_message = build_user_message(videos, subtitles, anime_title);
        let result: SubtitleMatchResult = self
            .caller
            .call_json(
                prompts::SUBTITLE_MATCH_PROMPT,
                &user_message,
                schemas::subtitle_match_response_format(),
            )
            .await?;

        // Reject matches that refer to keys outside the request
        for matched in &result.matches {
            if key_index(&matched.video_key, 'v').is_none_or(|i| i >= videos.len())
                || key_index(&matched.subtitle_key, 's').is_none_or(|i| i >= subtitles.len())
            {
                return Err(Error::ParseFailure(format!(
                    "subtitle match referenced unknown keys {}/{}",
                    matched.video_key, matched.subtitle_key
                )));
            }
        }

        tracing::info!(
            matches = result.matches.len(),
            unmatched = result.unmatched_subtitles.len(),
            "subtitle matching complete"
        );
        Ok(result)
    }

    /// Resolve a match's keys back to the request's file paths
    pub fn resolve<'a>(
        matched: &SubtitleMatch,
        videos: &'a [String],
        subtitles: &'a [String],
    ) -> Option<(&'a str, &'a str)> {
        let video = key_index(&matched.video_key, 'v').and_then(|i| videos.get(i))?;
        let subtitle = key_index(&matched.subtitle_key, 's').and_then(|i| subtitles.get(i))?;
        Some((video.as_str(), subtitle.as_str()))
    }
}

fn build_user_message(videos: &[String], subtitles: &[String], anime_title: &str) -> String {
    let videos: serde_json::Map<String, serde_json::Value> = videos
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("v{}", i + 1), serde_json::json!(v)))
        .collect();
    let subtitles: serde_json::Map<String, serde_json::Value> = subtitles
        .iter()
        .enumerate()
        .map(|(i, s)| (format!("s{}", i + 1), serde_json::json!(s)))
        .collect();
    serde_json::json!({
        "anime_title": anime_title,
        "videos": videos,
        "subtitles": subtitles,
    })
    .to_string()
}

/// `v3` -> Some(2); keys are 1-based in the wire format
fn key_index(key: &str, prefix: char) -> Option<usize> {
    key.strip_prefix(prefix)?
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
}
