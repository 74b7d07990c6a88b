//! Strict response schemas for the AI upstream
//!
//! Each upstream task pins a `response_format` document so the model is
//! forced into a known JSON shape. Upstreams without strict-schema support
//! still receive these; local validation rejects mismatches as retryable
//! parse errors either way.

use serde_json::{Value, json};
use std::sync::OnceLock;

fn string_field(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn number_or_null(description: &str) -> Value {
    json!({
        "description": description,
        "anyOf": [
            { "type": "integer", "minimum": 0 },
            { "type": "number", "minimum": 0 },
            { "type": "null" }
        ]
    })
}

/// Response format for title parsing
pub fn title_parse_response_format() -> &'static Value {
    static FORMAT: OnceLock<Value> = OnceLock::new();
    FORMAT.get_or_init(|| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "anime_title_parse_result",
                "strict": true,
                "schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": [
                        "original_title",
                        "anime_full_title",
                        "anime_clean_title",
                        "subtitle_group_name",
                        "episode",
                        "season",
                        "category"
                    ],
                    "properties": {
                        "original_title": string_field("Input title to analyze"),
                        "anime_full_title": string_field("Full multi-language anime title"),
                        "anime_clean_title": string_field("Single-language clean anime title"),
                        "subtitle_group_name": string_field("Fansub or encoder name without brackets"),
                        "episode": number_or_null("Episode number, movie defaults to 1, null if unknown"),
                        "season": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Season number, defaults to 1 when unknown"
                        },
                        "category": {
                            "type": "string",
                            "description": "Content category",
                            "enum": ["tv", "movie"]
                        }
                    }
                }
            }
        })
    })
}

/// Response format for multi-file renaming
pub fn multi_file_rename_response_format() -> &'static Value {
    static FORMAT: OnceLock<Value> = OnceLock::new();
    FORMAT.get_or_init(|| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "multi_file_rename_response",
                "strict": true,
                "schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": [
                        "main_files",
                        "skipped_files",
                        "seasons_info",
                        "anime_full_title",
                        "anime_clean_title",
                        "subtitle_group_name",
                        "subtitle_group_regex",
                        "full_title_regex",
                        "clean_title_regex",
                        "episode_regex",
                        "season",
                        "category",
                        "special_tag_regex",
                        "quality_regex",
                        "platform_regex",
                        "source_regex",
                        "codec_regex",
                        "subtitle_type_regex",
                        "format_regex"
                    ],
                    "properties": {
                        "main_files": {
                            "type": "object",
                            "description": "Mapping of original file paths to new relative paths",
                            "additionalProperties": string_field(
                                "Target file path with season prefix when required"
                            )
                        },
                        "skipped_files": {
                            "type": "array",
                            "description": "Original paths of non-main content files to skip",
                            "items": string_field("File path that should be skipped")
                        },
                        "seasons_info": {
                            "type": "object",
                            "description": "Season metadata keyed by season number",
                            "additionalProperties": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["type", "count", "description"],
                                "properties": {
                                    "type": string_field("tv / movie / special"),
                                    "count": {
                                        "type": "integer",
                                        "minimum": 0,
                                        "description": "Number of episodes identified"
                                    },
                                    "description": string_field(
                                        "Human-readable description for the season"
                                    )
                                }
                            }
                        },
                        "anime_full_title": string_field("Full anime title"),
                        "anime_clean_title": string_field("Clean anime title"),
                        "subtitle_group_name": string_field("Primary fansub or encoder name"),
                        "subtitle_group_regex": string_field("Regex to capture subtitle group"),
                        "full_title_regex": string_field("Regex to capture full title block"),
                        "clean_title_regex": string_field("Regex to capture clean title"),
                        "episode_regex": string_field("Regex to capture episode numbers"),
                        "season": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Season number primarily represented by this batch"
                        },
                        "category": {
                            "type": "string",
                            "description": "Content category",
                            "enum": ["tv", "movie"]
                        },
                        "special_tag_regex": string_field("Regex for tags like V2, END, SP"),
                        "quality_regex": string_field("Regex for quality markers (e.g., 1080p)"),
                        "platform_regex": string_field("Regex for platform/source tags"),
                        "source_regex": string_field("Regex targeting rip/source info"),
                        "codec_regex": string_field("Regex for codec tagging"),
                        "subtitle_type_regex": string_field("Regex for subtitle type tags"),
                        "format_regex": string_field("Regex to capture extension/format")
                    }
                }
            }
        })
    })
}

/// Response format for subtitle matching
pub fn subtitle_match_response_format() -> &'static Value {
    static FORMAT: OnceLock<Value> = OnceLock::new();
    FORMAT.get_or_init(|| {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": "subtitle_match_response",
                "strict": true,
                "schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["matches", "unmatched_subtitles", "videos_without_subtitle"],
                    "properties": {
                        "matches": {
                            "type": "array",
                            "description": "List of matched video-subtitle pairs using keys",
                            "items": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["video_key", "subtitle_key", "language_tag", "new_name"],
                                "properties": {
                                    "video_key": string_field("Video file key (e.g. \"v1\", \"v2\")"),
                                    "subtitle_key": string_field("Subtitle file key (e.g. \"s1\", \"s2\")"),
                                    "language_tag": string_field(
                                        "Standardized language tag: chs, cht, eng, jpn, kor, etc."
                                    ),
                                    "new_name": string_field(
                                        "New subtitle file name (without Season directory prefix)"
                                    )
                                }
                            }
                        },
                        "unmatched_subtitles": {
                            "type": "array",
                            "items": string_field("Subtitle file keys that could not be matched"),
                            "description": "Subtitle file keys without matching video"
                        },
                        "videos_without_subtitle": {
                            "type": "array",
                            "items": string_field("Video file keys without matching subtitle"),
                            "description": "Video file keys with no subtitle match"
                        }
                    }
                }
            }
        })
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_parse_schema_requires_all_fields() {
        let format = title_parse_response_format();
        let required = format["json_schema"]["schema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 7);
        assert!(required.iter().any(|v| v == "anime_clean_title"));
        assert_eq!(
            format["json_schema"]["schema"]["properties"]["category"]["enum"],
            serde_json::json!(["tv", "movie"])
        );
    }

    #[test]
    fn rename_schema_lists_every_regex_field() {
        let format = multi_file_rename_response_format();
        let required = format["json_schema"]["schema"]["required"].as_array().unwrap();
        for field in [
            "subtitle_group_regex",
            "full_title_regex",
            "clean_title_regex",
            "episode_regex",
            "special_tag_regex",
            "quality_regex",
            "platform_regex",
            "source_regex",
            "codec_regex",
            "subtitle_type_regex",
            "format_regex",
        ] {
            assert!(
                required.iter().any(|v| v == field),
                "missing required regex field {field}"
            );
        }
    }

    #[test]
    fn subtitle_match_schema_shape() {
        let format = subtitle_match_response_format();
        let item_required = format["json_schema"]["schema"]["properties"]["matches"]["items"]
            ["required"]
            .as_array()
            .unwrap();
        assert_eq!(item_required.len(), 4);
    }
}
