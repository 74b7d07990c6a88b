//! AI-backed multi-file rename planning
//!
//! Given a torrent's full file list, produces target library paths for the
//! main content plus a reusable regex bundle for the fast regex-first path.
//! Large file sets are partitioned into batches; each batch after the first
//! receives the targets generated so far so the upstream cannot collide with
//! already-materialised paths.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::db::AnimePatternsBundle;
use crate::error::{Error, Result};
use crate::types::Category;

use super::client::AiCaller;
use super::prompts;
use super::schemas;

/// TVDB season boundaries handed to the rename prompt
#[derive(Clone, Debug, Default)]
pub struct TvdbSeasonInfo {
    /// Series name as TVDB knows it
    pub series_name: String,
    /// Episode count per season number (0 = specials)
    pub season_episode_counts: BTreeMap<u32, u32>,
}

impl TvdbSeasonInfo {
    fn summary(&self) -> String {
        let seasons: Vec<String> = self
            .season_episode_counts
            .iter()
            .map(|(season, count)| format!("S{season}: {count} episodes"))
            .collect();
        format!("{} — {}", self.series_name, seasons.join(", "))
    }
}

/// One batch's season metadata
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SeasonInfo {
    /// tv / movie / special
    #[serde(rename = "type")]
    pub kind: String,
    /// Episodes identified in this season
    pub count: u32,
    /// Human-readable description
    pub description: String,
}

/// Request for a rename plan over a torrent's files
pub struct RenameRequest<'a> {
    /// Full file list, paths relative to the torrent root
    pub files: &'a [String],
    /// tv or movie
    pub category: Category,
    /// Canonical library title the upstream must use for renames
    pub anime_title: &'a str,
    /// Library-relative targets already materialised by earlier torrents
    pub previous_hardlinks: &'a [String],
    /// TVDB season boundaries, when the provider is available
    pub tvdb: Option<&'a TvdbSeasonInfo>,
}

/// Aggregated rename plan across all batches
#[derive(Clone, Debug, Default)]
pub struct RenameResult {
    /// Ordered (source path, target relative path) pairs
    pub main_files: Vec<(String, String)>,
    /// Source paths classified as non-main content
    pub skipped_files: Vec<String>,
    /// Union of per-season metadata over all batches
    pub seasons_info: BTreeMap<u32, SeasonInfo>,
    /// Full anime title from the upstream
    pub anime_full_title: String,
    /// Clean anime title from the upstream
    pub anime_clean_title: String,
    /// Primary group name
    pub subtitle_group_name: String,
    /// Season primarily represented by the torrent
    pub season: u32,
    /// tv or movie
    pub category: Category,
    /// Regex bundle for the stored-pattern fast path
    pub patterns: AnimePatternsBundle,
}

/// Raw wire shape of one rename batch response
#[derive(Debug, Deserialize)]
struct MultiFileRenameRaw {
    main_files: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    skipped_files: Vec<String>,
    #[serde(default)]
    seasons_info: BTreeMap<String, SeasonInfo>,
    anime_full_title: String,
    anime_clean_title: String,
    subtitle_group_name: String,
    subtitle_group_regex: String,
    full_title_regex: String,
    clean_title_regex: String,
    episode_regex: String,
    season: u32,
    category: String,
    special_tag_regex: String,
    quality_regex: String,
    platform_regex: String,
    source_regex: String,
    codec_regex: String,
    subtitle_type_regex: String,
    format_regex: String,
}

/// Produces rename plans through the AI upstream
pub struct FileRenamer {
    caller: AiCaller,
    max_batch_size: usize,
    batch_retries: u32,
}

impl FileRenamer {
    /// Create a renamer with the configured batch size and per-batch retries
    pub fn new(caller: AiCaller, max_batch_size: usize, batch_retries: u32) -> Self {
        Self {
            caller,
            max_batch_size: max_batch_size.clamp(1, 100),
            batch_retries: batch_retries.max(1),
        }
    }

    /// Produce a rename plan for a torrent's file set.
    ///
    /// Files beyond `max_batch_size` are processed in further upstream calls;
    /// each call receives all targets generated so far (plus the request's
    /// own `previous_hardlinks`) so no two batches can emit the same target.
    pub async fn rename(&self, request: RenameRequest<'_>) -> Result<RenameResult> {
        if request.files.is_empty() {
            return Err(Error::Validation("rename request carries no files".into()));
        }

        let system_prompt = prompts::multi_file_rename_system_prompt(request.tvdb.is_some());
        let tvdb_summary = request.tvdb.map(TvdbSeasonInfo::summary);

        let mut result = RenameResult {
            category: request.category,
            ..Default::default()
        };
        let mut known_targets: Vec<String> = request.previous_hardlinks.to_vec();
        let batch_count = request.files.len().div_ceil(self.max_batch_size);

        for (batch_index, chunk) in request.files.chunks(self.max_batch_size).enumerate() {
            tracing::info!(
                batch = batch_index + 1,
                batches = batch_count,
                files = chunk.len(),
                "requesting rename batch"
            );

            let raw = self
                .rename_batch(&system_prompt, chunk, &request, &known_targets, tvdb_summary.as_deref())
                .await?;

            self.merge_batch(&mut result, &mut known_targets, chunk, raw, batch_index);
        }

        tracing::info!(
            main = result.main_files.len(),
            skipped = result.skipped_files.len(),
            seasons = result.seasons_info.len(),
            "rename plan complete"
        );
        Ok(result)
    }

    async fn rename_batch(
        &self,
        system_prompt: &str,
        chunk: &[String],
        request: &RenameRequest<'_>,
        known_targets: &[String],
        tvdb_summary: Option<&str>,
    ) -> Result<MultiFileRenameRaw> {
        let user_message = prompts::build_rename_user_message(
            chunk,
            request.category,
            request.anime_title,
            known_targets,
            tvdb_summary,
        );

        let mut last_error: Option<Error> = None;
        for attempt in 1..=self.batch_retries {
            match self
                .caller
                .call_json::<MultiFileRenameRaw>(
                    system_prompt,
                    &user_message,
                    schemas::multi_file_rename_response_format(),
                )
                .await
            {
                Ok(raw) => match validate_batch(&raw, known_targets) {
                    Ok(()) => return Ok(raw),
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            retries = self.batch_retries,
                            error = %e,
                            "rename batch rejected"
                        );
                        last_error = Some(e);
                    }
                },
                Err(e @ Error::CircuitOpen { .. }) | Err(e @ Error::KeysExhausted { .. }) => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        retries = self.batch_retries,
                        error = %e,
                        "rename batch failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::UpstreamFault("rename batch failed without a recorded error".into())
        }))
    }

    fn merge_batch(
        &self,
        result: &mut RenameResult,
        known_targets: &mut Vec<String>,
        chunk: &[String],
        raw: MultiFileRenameRaw,
        batch_index: usize,
    ) {
        // Preserve the chunk's file order in the merged plan
        for source in chunk {
            if let Some(target) = raw.main_files.get(source).and_then(|v| v.as_str()) {
                let target = target.trim();
                if target.is_empty() {
                    continue;
                }
                known_targets.push(target.to_string());
                result
                    .main_files
                    .push((source.clone(), target.to_string()));
            }
        }

        result
            .skipped_files
            .extend(raw.skipped_files.iter().cloned());

        for (season_key, info) in raw.seasons_info {
            if let Ok(season) = season_key.parse::<u32>() {
                result.seasons_info.entry(season).or_insert(info);
            }
        }

        // The first batch defines the header fields and the regex bundle
        if batch_index == 0 {
            result.anime_full_title = raw.anime_full_title;
            result.anime_clean_title = raw.anime_clean_title;
            result.subtitle_group_name = raw.subtitle_group_name;
            result.season = raw.season;
            result.category = Category::from_str_lossy(&raw.category);
            result.patterns = AnimePatternsBundle {
                subtitle_group_regex: raw.subtitle_group_regex,
                full_title_regex: raw.full_title_regex,
                clean_title_regex: raw.clean_title_regex,
                episode_regex: raw.episode_regex,
                special_tag_regex: raw.special_tag_regex,
                quality_regex: raw.quality_regex,
                platform_regex: raw.platform_regex,
                source_regex: raw.source_regex,
                codec_regex: raw.codec_regex,
                subtitle_type_regex: raw.subtitle_type_regex,
                format_regex: raw.format_regex,
            };
        }
    }
}

/// Reject a batch whose targets collide with each other or with targets
/// already generated (earlier batches or prior hardlinks).
fn validate_batch(raw: &MultiFileRenameRaw, known_targets: &[String]) -> Result<()> {
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for value in raw.main_files.values() {
        let Some(target) = value.as_str().map(str::trim) else {
            continue;
        };
        if target.is_empty() {
            continue;
        }
        if !seen.insert(target) || known_targets.iter().any(|t| t.as_str() == target) {
            return Err(Error::ParseFailure(format!(
                "rename batch produced duplicate target '{target}'"
            )));
        }
    }
    Ok(())
}
