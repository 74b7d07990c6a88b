//! Rename decision service
//!
//! Decides target library names for a completed torrent's files. Stored
//! patterns are tried first: when the anime carries a regex bundle whose
//! episode matcher covers every video file, the plan is computed locally
//! with no upstream call. Otherwise the AI renamer's result is converted
//! into a plan and its regex bundle is persisted for the next torrent of
//! the same series.

mod patterns;

pub use patterns::{CompiledPatterns, MAX_REASONABLE_EPISODE};

use std::path::Path;

use crate::ai::RenameResult;
use crate::db::AnimePatternsBundle;
use crate::types::Category;
use crate::utils::sanitize_filename;

/// Closed set of video extensions
const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"];
/// Closed set of subtitle extensions
const SUBTITLE_EXTENSIONS: [&str; 5] = ["srt", "ass", "ssa", "vtt", "sub"];

/// File classification by extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Member of the video extension set
    Video,
    /// Member of the subtitle extension set
    Subtitle,
    /// Everything else
    Other,
}

impl FileKind {
    /// Stable string form for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Video => "video",
            FileKind::Subtitle => "subtitle",
            FileKind::Other => "other",
        }
    }
}

/// Classify a file path by its extension
pub fn classify(path: &str) -> FileKind {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => FileKind::Video,
        Some(ext) if SUBTITLE_EXTENSIONS.contains(&ext) => FileKind::Subtitle,
        _ => FileKind::Other,
    }
}

/// How a plan's names were decided
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameMethod {
    /// Computed locally from the stored regex bundle
    StoredPatterns,
    /// Produced by the AI renamer
    Ai,
}

/// One planned rename
#[derive(Clone, Debug, PartialEq)]
pub struct PlanEntry {
    /// Source path relative to the torrent root
    pub source: String,
    /// Target path relative to the anime's library directory
    pub target_rel: String,
    /// Classification of the source file
    pub kind: FileKind,
}

/// Full rename plan for one torrent
#[derive(Clone, Debug, Default)]
pub struct RenamePlan {
    /// Planned renames in processing order
    pub entries: Vec<PlanEntry>,
    /// Source paths deliberately not materialised
    pub skipped: Vec<String>,
    /// Subtitle sources the stored patterns could not assign; resolved by
    /// the AI subtitle matcher before materialisation
    pub unmatched_subtitles: Vec<String>,
    /// How the names were decided
    pub method: Option<RenameMethod>,
    /// Regex bundle to persist (AI path only)
    pub new_patterns: Option<AnimePatternsBundle>,
}

impl RenamePlan {
    /// Count of planned video files
    pub fn video_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kind == FileKind::Video).count()
    }

    /// Count of planned subtitle files
    pub fn subtitle_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kind == FileKind::Subtitle).count()
    }
}

/// Identity of the anime a plan is computed for
#[derive(Clone, Debug)]
pub struct AnimeContext<'a> {
    /// Canonical library title
    pub title: &'a str,
    /// Season the series maps to (0 = specials)
    pub season: u32,
    /// Fansub/encoder group
    pub group: &'a str,
    /// tv or movie
    pub category: Category,
}

/// Try the regex-first path: every video file must yield an episode through
/// the stored episode matcher, otherwise the whole attempt is abandoned and
/// `None` tells the caller to use the AI fallback.
pub fn plan_from_patterns(
    files: &[String],
    anime: &AnimeContext<'_>,
    bundle: &AnimePatternsBundle,
) -> Option<RenamePlan> {
    let compiled = CompiledPatterns::compile(bundle);
    if !compiled.has_episode() && anime.category == Category::Tv {
        return None;
    }

    let mut plan = RenamePlan {
        method: Some(RenameMethod::StoredPatterns),
        ..Default::default()
    };

    for file in files {
        let file_name = Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file.as_str());

        match classify(file) {
            FileKind::Video => {
                let target = match anime.category {
                    Category::Movie => format_movie_name(
                        anime.title,
                        anime.group,
                        compiled.extract_special_tag(file_name).as_deref(),
                        compiled.extract_subtitle_type(file_name).as_deref(),
                        extension_of(file_name)?,
                    ),
                    Category::Tv => {
                        let episode = compiled.extract_episode(file_name)?;
                        format_episode_name(
                            anime.title,
                            anime.season,
                            episode,
                            anime.group,
                            compiled.extract_special_tag(file_name).as_deref(),
                            compiled.extract_subtitle_type(file_name).as_deref(),
                            extension_of(file_name)?,
                        )
                    }
                };
                plan.entries.push(PlanEntry {
                    source: file.clone(),
                    target_rel: target,
                    kind: FileKind::Video,
                });
            }
            FileKind::Subtitle => {
                // A subtitle the episode matcher can't place doesn't doom the
                // plan; the AI subtitle matcher picks it up afterwards
                let episode = match anime.category {
                    Category::Movie => None,
                    Category::Tv => match compiled.extract_episode(file_name) {
                        Some(episode) => Some(episode),
                        None => {
                            plan.unmatched_subtitles.push(file.clone());
                            continue;
                        }
                    },
                };
                let Some(ext) = extension_of(file_name) else {
                    plan.unmatched_subtitles.push(file.clone());
                    continue;
                };
                let target = match episode {
                    None => format_movie_name(
                        anime.title,
                        anime.group,
                        None,
                        subtitle_language_tag(file_name),
                        ext,
                    ),
                    Some(episode) => format_episode_name(
                        anime.title,
                        anime.season,
                        episode,
                        anime.group,
                        None,
                        subtitle_language_tag(file_name),
                        ext,
                    ),
                };
                plan.entries.push(PlanEntry {
                    source: file.clone(),
                    target_rel: target,
                    kind: FileKind::Subtitle,
                });
            }
            FileKind::Other => plan.skipped.push(file.clone()),
        }
    }

    // A plan with colliding targets means the patterns are not specific
    // enough for this file set
    let mut seen = std::collections::HashSet::new();
    for entry in &plan.entries {
        if !seen.insert(entry.target_rel.as_str()) {
            tracing::warn!(
                target = %entry.target_rel,
                "stored patterns produced colliding targets, falling back"
            );
            return None;
        }
    }

    (!plan.entries.is_empty()).then_some(plan)
}

/// Convert an AI rename result into a plan, carrying its regex bundle for
/// persistence.
pub fn plan_from_ai(result: &RenameResult) -> RenamePlan {
    let entries = result
        .main_files
        .iter()
        .map(|(source, target)| PlanEntry {
            source: source.clone(),
            target_rel: target.clone(),
            kind: classify(source),
        })
        .collect();

    RenamePlan {
        entries,
        skipped: result.skipped_files.clone(),
        unmatched_subtitles: Vec::new(),
        method: Some(RenameMethod::Ai),
        new_patterns: Some(result.patterns.clone()),
    }
}

/// `Season {n}/{title} - S{n:02}E{e:02} - {group} [{special}][{sub_type}].{ext}`
///
/// Season 0 renders the specials form (no special tag slot).
pub fn format_episode_name(
    title: &str,
    season: u32,
    episode: u32,
    group: &str,
    special: Option<&str>,
    sub_type: Option<&str>,
    ext: &str,
) -> String {
    let title = sanitize_filename(title);
    let special = if season == 0 { None } else { special };
    let brackets = bracket_suffix(&[special, sub_type]);
    format!("Season {season}/{title} - S{season:02}E{episode:02} - {group}{brackets}.{ext}")
}

/// `{title} - {group} [{special}][{sub_type}].{ext}` — never a season prefix
pub fn format_movie_name(
    title: &str,
    group: &str,
    special: Option<&str>,
    sub_type: Option<&str>,
    ext: &str,
) -> String {
    let title = sanitize_filename(title);
    let brackets = bracket_suffix(&[special, sub_type]);
    format!("{title} - {group}{brackets}.{ext}")
}

fn bracket_suffix(parts: &[Option<&str>]) -> String {
    let rendered: String = parts
        .iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .map(|p| format!("[{p}]"))
        .collect();
    if rendered.is_empty() {
        rendered
    } else {
        format!(" {rendered}")
    }
}

fn extension_of(name: &str) -> Option<&str> {
    Path::new(name).extension().and_then(|e| e.to_str())
}

/// Best-effort language tag from a subtitle file name
fn subtitle_language_tag(name: &str) -> Option<&'static str> {
    let lowered = name.to_lowercase();
    let tokens = [
        (".sc.", "CHS"),
        (".chs.", "CHS"),
        ("[chs]", "CHS"),
        ("[gb]", "CHS"),
        (".tc.", "CHT"),
        (".cht.", "CHT"),
        ("[cht]", "CHT"),
        ("[big5]", "CHT"),
        (".en.", "ENG"),
        (".eng.", "ENG"),
        ("[eng]", "ENG"),
        (".jp.", "JPN"),
        (".jpn.", "JPN"),
        ("[jpn]", "JPN"),
    ];
    tokens
        .iter()
        .find(|(token, _)| lowered.contains(token))
        .map(|(_, tag)| *tag)
}
