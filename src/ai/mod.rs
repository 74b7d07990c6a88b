//! AI upstream callers
//!
//! One single-purpose caller per upstream task (title parsing, multi-file
//! rename, subtitle matching), each wrapping a key pool and a circuit
//! breaker. Responses are validated against strict JSON schemas at the
//! boundary; downstream code only ever sees typed results.

mod client;
mod file_renamer;
pub mod prompts;
pub mod schemas;
mod subtitle_matcher;
mod title_parser;
mod trace;

pub use client::AiCaller;
pub use file_renamer::{
    FileRenamer, RenameRequest, RenameResult, SeasonInfo, TvdbSeasonInfo,
};
pub use subtitle_matcher::{SubtitleMatch, SubtitleMatchResult, SubtitleMatcher};
pub use title_parser::TitleParser;
pub use trace::{AiTrace, TraceOutcome};
