//! Stored rename-pattern engine
//!
//! Compiles an anime's stored regex bundle and extracts naming components
//! from file names. A field holding the sentinel "none" (or the upstream's
//! "无"), an empty string, or a pattern the regex engine rejects compiles to
//! an absent matcher — extraction then simply yields nothing and the caller
//! falls back to the AI path. Patterns never degrade to wrong output.

use regex::Regex;

use crate::db::AnimePatternsBundle;

/// Upper bound accepted from an extracted episode number
pub const MAX_REASONABLE_EPISODE: u32 = 2000;

/// Compiled form of a stored [`AnimePatternsBundle`]
#[derive(Debug, Default)]
pub struct CompiledPatterns {
    subtitle_group: Option<Regex>,
    episode: Option<Regex>,
    special_tag: Option<Regex>,
    quality: Option<Regex>,
    subtitle_type: Option<Regex>,
    format: Option<Regex>,
}

fn compile_field(name: &str, pattern: &str) -> Option<Regex> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() || trimmed == "none" || trimmed == "无" {
        return None;
    }
    match Regex::new(trimmed) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(
                field = name,
                pattern = trimmed,
                error = %e,
                "stored pattern not usable by the regex engine"
            );
            None
        }
    }
}

impl CompiledPatterns {
    /// Compile the usable fields of a stored bundle
    pub fn compile(bundle: &AnimePatternsBundle) -> Self {
        Self {
            subtitle_group: compile_field("subtitle_group_regex", &bundle.subtitle_group_regex),
            episode: compile_field("episode_regex", &bundle.episode_regex),
            special_tag: compile_field("special_tag_regex", &bundle.special_tag_regex),
            quality: compile_field("quality_regex", &bundle.quality_regex),
            subtitle_type: compile_field("subtitle_type_regex", &bundle.subtitle_type_regex),
            format: compile_field("format_regex", &bundle.format_regex),
        }
    }

    /// Whether the bundle carries a usable episode matcher (the gate for the
    /// regex-first rename path)
    pub fn has_episode(&self) -> bool {
        self.episode.is_some()
    }

    /// Extract an episode number within sane bounds (0..=2000).
    ///
    /// Fractional captures such as `13.5` are rejected; half-episodes go
    /// through the AI path which can map them to specials.
    pub fn extract_episode(&self, name: &str) -> Option<u32> {
        let capture = self.first_capture(self.episode.as_ref(), name)?;
        let value: f64 = capture.parse().ok()?;
        if value.fract() != 0.0 {
            return None;
        }
        let episode = value as u32;
        (episode <= MAX_REASONABLE_EPISODE).then_some(episode)
    }

    /// Extract the subtitle group name
    pub fn extract_group(&self, name: &str) -> Option<String> {
        self.first_capture(self.subtitle_group.as_ref(), name)
    }

    /// Extract a special tag (V2, END, SP, ...)
    pub fn extract_special_tag(&self, name: &str) -> Option<String> {
        self.first_capture(self.special_tag.as_ref(), name)
    }

    /// Extract the quality marker
    pub fn extract_quality(&self, name: &str) -> Option<String> {
        self.first_capture(self.quality.as_ref(), name)
    }

    /// Extract the subtitle type tag (CHT, CHS, ...)
    pub fn extract_subtitle_type(&self, name: &str) -> Option<String> {
        self.first_capture(self.subtitle_type.as_ref(), name)
    }

    /// Extract the container format/extension
    pub fn extract_format(&self, name: &str) -> Option<String> {
        self.first_capture(self.format.as_ref(), name)
    }

    fn first_capture(&self, re: Option<&Regex>, name: &str) -> Option<String> {
        let re = re?;
        let captures = re.captures(name)?;
        let matched = captures.get(1).or_else(|| captures.get(0))?;
        let text = matched.as_str().trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_episode(pattern: &str) -> AnimePatternsBundle {
        AnimePatternsBundle {
            episode_regex: pattern.to_string(),
            subtitle_group_regex: r"^\[(.*?)\]".to_string(),
            format_regex: r"\.(\w+)$".to_string(),
            special_tag_regex: "none".to_string(),
            quality_regex: "无".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sentinel_and_empty_fields_compile_to_absent() {
        let patterns = CompiledPatterns::compile(&bundle_with_episode(r"-\s*(\d+)\s*\["));
        assert!(patterns.has_episode());
        assert_eq!(patterns.extract_special_tag("[x][V2]"), None);
        assert_eq!(patterns.extract_quality("[1080P]"), None);
    }

    #[test]
    fn unsupported_lookaround_degrades_to_absent() {
        // The upstream emits look-around patterns; the regex engine rejects
        // them and the field must become unusable rather than erroring
        let bundle = AnimePatternsBundle {
            special_tag_regex: r"(?<=-\s\d{2}\s)\[([^\]]+)\](?=(?:\s*\[[^\]]+\]){5})".to_string(),
            episode_regex: r"-\s*(\d+)\s*\[".to_string(),
            ..Default::default()
        };
        let patterns = CompiledPatterns::compile(&bundle);
        assert!(patterns.has_episode());
        assert_eq!(patterns.extract_special_tag("[ANi] X - 01 [V2][1080P]"), None);
    }

    #[test]
    fn extracts_episode_group_and_format() {
        let patterns = CompiledPatterns::compile(&bundle_with_episode(r"-\s*(\d+(?:\.\d+)?)\s*\["));
        let name = "[ANi] 葬送的芙莉莲 - 02 [1080P][Baha][WEB-DL][AAC AVC][CHT].mp4";

        assert_eq!(patterns.extract_episode(name), Some(2));
        assert_eq!(patterns.extract_group(name).as_deref(), Some("ANi"));
        assert_eq!(patterns.extract_format(name).as_deref(), Some("mp4"));
    }

    #[test]
    fn fractional_episodes_are_rejected() {
        let patterns = CompiledPatterns::compile(&bundle_with_episode(r"-\s*(\d+(?:\.\d+)?)\s*\["));
        assert_eq!(patterns.extract_episode("[G] X - 13.5 [1080P].mkv"), None);
    }

    #[test]
    fn out_of_bounds_episode_is_rejected() {
        let patterns = CompiledPatterns::compile(&bundle_with_episode(r"-\s*(\d+)\s*\["));
        assert_eq!(patterns.extract_episode("[G] X - 2001 [1080P].mkv"), None);
        assert_eq!(patterns.extract_episode("[G] X - 2000 [1080P].mkv"), Some(2000));
        assert_eq!(patterns.extract_episode("[G] X - 0 [1080P].mkv"), Some(0));
    }

    #[test]
    fn no_match_yields_none() {
        let patterns = CompiledPatterns::compile(&bundle_with_episode(r"-\s*(\d+)\s*\["));
        assert_eq!(patterns.extract_episode("Movie without episode.mkv"), None);
    }
}
