//! Prompt resources for the AI upstream
//!
//! These strings are part of the upstream contract: the rename regexes the
//! model returns are only usable because the prompts pin down the rules for
//! generating them (positional anchoring, tag-count conservation, CRC
//! exclusion). Changes here are API-breaking for the response consumers and
//! must be covered by regression fixtures.

use crate::types::Category;

/// Build the title-parse system prompt, specialised with the configured
/// language priority (e.g. `["中文", "English", "日本語"]`).
pub fn title_parse_system_prompt(language_priorities: &[String]) -> String {
    let language_instruction = if language_priorities.is_empty() {
        "- **Multi-language titles**: prefer the Chinese title (usually after a `/`).".to_string()
    } else {
        let order = language_priorities.join(" > ");
        format!(
            "- **Language priority**: the configured preference order is {order}.\n  \
             - When the title carries several language variants, pick `anime_clean_title` in that order.\n  \
             - If the first preferred language is absent, fall back to the next, and so on.\n  \
             - If none of the preferred languages is present, use the first language that actually appears."
        )
    };

    format!(
        r#"You are an expert anime release-title analyst. Analyse the given file name and extract:

1. original_title — the input echoed back
2. anime_full_title — the full title block with every language variant and special markers
3. anime_clean_title — the single most canonical title
4. subtitle_group_name — the fansub or encoder group, without brackets
5. episode — the episode number; 1 for movies; null when absent
6. season — defaults to 1 when the title carries no season marker
7. category — "tv" for series, "movie" for films

## Rules

{language_instruction}
- **Special markers**: keep SP/OVA/OAD markers that are part of the title itself.
- **Season handling**: strip trailing season markers from the clean title, keep numbers that belong to the title.
- **Movie detection**: treat titles containing 剧场版, 劇場版, 映画版, "Movie" or "Theatrical" as movies.
- **Episode extraction**: look for the number after `-` or inside `[]` (e.g. `- 01`, `[01]`, `EP01`, `第1話`). A confirmed movie without an explicit episode gets 1; otherwise default to 1 when nothing is found.
- Escape any embedded double quotes so the JSON stays valid.

## Structured output

Strict schema `anime_title_parse_result` is enforced: emit exactly the listed
fields, no markdown and no commentary. For movies `category` must be "movie"
and `season` defaults to 1.

## Example

Input: "[ANi] Frieren: Beyond Journey's End / 葬送的芙莉莲 - 02 [1080P][Baha][WEB-DL][AAC AVC][CHT][MP4]"
With priority 中文 > English, the clean title is 葬送的芙莉莲, group ANi,
episode 2, season 1, category tv. With priority English > 中文 the clean
title becomes "Frieren: Beyond Journey's End"; everything else is unchanged.
"#
    )
}

/// Shared body of the multi-file rename prompt: analysis rules, the naming
/// format standard, and the regex generation strategy.
const RENAME_COMMON_RULES: &str = r#"## Core tasks

1. **File analysis and filtering**
   - Read the full paths and understand the directory structure.
   - Keep only main content. Skip: CM, PV, Preview, Menu, Audio Guide, Bonus,
     Extra, NCOP/NCED, Scan, Interview.
   - Main content has an explicit episode marker (01, E01, 第1话). Specials
     (SP, OVA, OAD, ONA) are main content and always map to Season 0.

2. **Title usage (mandatory)**
   - The provided `anime_title` is the only title allowed in renamed files.
     Titles extracted from file names are used for regex generation only.

3. **Predictive regex generation (core requirement)**
   - Regexes must be generic for this group's naming pattern. Never hardcode
     concrete tag values such as `1080p` or `Bilibili`; anchor by position.
   - `special_tag_regex` is mandatory even when the current files carry no
     special tag, using tag-count conservation (below).

## Rename format standard

- Series (always with a season directory prefix):
  `Season {season}/{anime_title} - S{season:02}E{episode:02} - {group} [{special}][{sub_type}].{ext}`
  e.g. `Season 1/葬送的芙莉莲 - S01E01 - ANi [CHT].mp4`
- Specials (always Season 0):
  `Season 0/{anime_title} - S00E{episode:02} - {group} [{sub_type}].{ext}`
- Movies (never a season prefix):
  `{anime_title} - {group} [{special}][{sub_type}].{ext}`
Omit empty bracket groups entirely.

## Regex strategy

- **Tag-count conservation** for `special_tag_regex`: count the N bracketed
  technical tags that follow the episode number, then assert exactly that
  many remain in a lookahead:
  `(?<=episode-and-separator)\s*\[([^\]]+)\](?=(?:\s*\[[^\]]+\]){N})`
  With N asserted, a future `[v2]` insertion fails to match the first
  technical tag instead of mis-capturing it.
- **Positional anchoring with version slack**: when counting brackets from
  the end, allow for optional `v2`/`v3` tags — prefer `{N,}` over `{N}` or
  an explicit `(?:\[v\d+\])?` branch.
- **CRC exclusion**: a trailing `[A-F0-9]{8}` tag is a checksum, never a
  codec/source/group. Regexes must skip it; set the affected field to "none"
  rather than matching the checksum.
- `episode_regex` must tolerate version suffixes such as `03v2`.
- Full vs clean title: `full_title_regex` captures the whole title block
  between group and episode; `clean_title_regex` captures only the primary
  language, truncating before the Latin-script remainder with a lookahead.
- A field with nothing to capture in this naming pattern is the literal
  string "none".

## Structured output

Strict schema `multi_file_rename_response` is enforced: emit exactly the
schema fields, no markdown. `main_files` maps each original path to its new
relative path, already carrying the `Season X/` prefix for series and
specials and never for movies. When `previous_hardlinks` is provided, no
generated target may repeat a path from it."#;

/// Multi-file rename prompt, TVDB-aware variant.
pub const MULTI_FILE_RENAME_WITH_TVDB_PROMPT: &str = r#"You are a top-tier anime archive analyst and regex specialist. You receive:

1. The torrent's `category` (tv or movie)
2. The anime's authoritative TVDB season/episode listing
3. The library's canonical `anime_title`, which must be used for every rename
4. `previous_hardlinks`: targets already created by earlier batches that must
   not be generated again

## TVDB authority

- TVDB data outranks the directory structure. A folder named `Season 1` may
  still contain Season 2 episodes; trust the TVDB listing.
- When file episode numbers exceed the TVDB episode count for their season:
  1. Check Season 0: the overflow may be specials (e.g. TVDB S1 has 12
     episodes and the files reach 13 — E13 is likely an SP).
  2. Check Season N+1: when the overflow count matches the next season's
     episode count, renumber the tail into that season.
  3. Reassign accordingly; the episode numbers restart per season.
- If TVDB lists a movie as a Season 0 entry, file it under Season 0 even when
  the file name says "Movie".

"#;

/// Multi-file rename prompt, standard variant (no TVDB metadata available).
pub const MULTI_FILE_RENAME_STANDARD_PROMPT: &str = r#"You are a top-tier anime archive analyst and regex specialist. You receive:

1. The torrent's `category` (tv or movie)
2. The library's canonical `anime_title`, which must be used for every rename
3. `previous_hardlinks`: targets already created by earlier batches that must
   not be generated again

Season assignment relies on the file structure and names alone: explicit
season markers win, specials (SP/OVA/OAD/ONA) map to Season 0, and a single
unnumbered film maps to the movie format.

"#;

/// Assemble the full rename system prompt for one batch.
pub fn multi_file_rename_system_prompt(with_tvdb: bool) -> String {
    let head = if with_tvdb {
        MULTI_FILE_RENAME_WITH_TVDB_PROMPT
    } else {
        MULTI_FILE_RENAME_STANDARD_PROMPT
    };
    format!("{head}{RENAME_COMMON_RULES}")
}

/// Subtitle-to-video matching prompt.
pub const SUBTITLE_MATCH_PROMPT: &str = r#"You are a subtitle matching specialist. You receive two keyed lists: video
files (`v1`, `v2`, ...) and subtitle files (`s1`, `s2`, ...), plus the
library's canonical `anime_title`.

Match each subtitle to the video it belongs to by episode number, version
tags and naming structure. For each match emit:

- `video_key` / `subtitle_key` — the keys from the input lists
- `language_tag` — normalised from the subtitle name: chs, cht, eng, jpn,
  kor; use the most specific tag present (e.g. `.sc.ass` → chs, `.tc.ass` →
  cht, `CHT` → cht)
- `new_name` — the video's target file name with the extension replaced by
  `.{language_tag}.{subtitle_ext}`, without any season directory prefix

List subtitles that match no video under `unmatched_subtitles` and videos
with no subtitle under `videos_without_subtitle`. Strict schema
`subtitle_match_response` is enforced: emit exactly the schema fields, no
markdown."#;

/// Build the user message for one rename batch.
pub fn build_rename_user_message(
    files: &[String],
    category: Category,
    anime_title: &str,
    previous_hardlinks: &[String],
    tvdb_summary: Option<&str>,
) -> String {
    let mut body = serde_json::json!({
        "category": category.as_str(),
        "anime_title": anime_title,
        "files": files,
    });
    if !previous_hardlinks.is_empty() {
        body["previous_hardlinks"] = serde_json::json!(previous_hardlinks);
    }
    if let Some(summary) = tvdb_summary {
        body["tvdb_info"] = serde_json::json!(summary);
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_prompt_embeds_language_priority_order() {
        let prompt =
            title_parse_system_prompt(&["日本語".to_string(), "English".to_string()]);
        assert!(prompt.contains("日本語 > English"));
    }

    #[test]
    fn title_prompt_without_priorities_falls_back_to_chinese() {
        let prompt = title_parse_system_prompt(&[]);
        assert!(prompt.contains("prefer the Chinese title"));
    }

    #[test]
    fn rename_prompt_variants_share_the_conservation_rule() {
        let with = multi_file_rename_system_prompt(true);
        let without = multi_file_rename_system_prompt(false);
        for prompt in [&with, &without] {
            assert!(prompt.contains("Tag-count conservation"));
            assert!(prompt.contains("Season 0"));
            assert!(prompt.contains("previous_hardlinks"));
        }
        assert!(with.contains("TVDB"));
        assert!(!without.contains("TVDB data outranks"));
    }

    #[test]
    fn rename_user_message_omits_empty_sections() {
        let msg = build_rename_user_message(
            &["a.mkv".to_string()],
            Category::Tv,
            "葬送的芙莉莲",
            &[],
            None,
        );
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert!(parsed.get("previous_hardlinks").is_none());
        assert!(parsed.get("tvdb_info").is_none());
        assert_eq!(parsed["anime_title"], "葬送的芙莉莲");
    }

    #[test]
    fn rename_user_message_carries_previous_hardlinks() {
        let msg = build_rename_user_message(
            &["b.mkv".to_string()],
            Category::Movie,
            "Suzume",
            &["Suzume - ANi.mkv".to_string()],
            Some("S1: 12 episodes"),
        );
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["previous_hardlinks"][0], "Suzume - ANi.mkv");
        assert_eq!(parsed["tvdb_info"], "S1: 12 episodes");
        assert_eq!(parsed["category"], "movie");
    }
}
