//! Rotating JSON trace of AI upstream calls
//!
//! When the debug flag is set, every call — success or failure — is written
//! as one JSON file into the trace directory. The directory is capped at a
//! configured file count with oldest-first eviction. Trace writes are
//! best-effort: failures are logged and never propagate.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome classification recorded with each trace entry
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// HTTP 200 with parseable content
    Success,
    /// Non-200 upstream status
    HttpError,
    /// Transport-level failure (timeout, connect error)
    Transport,
    /// 200 but the content failed schema validation
    ParseError,
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    recorded_at_utc: String,
    purpose: &'a str,
    model: &'a str,
    outcome: TraceOutcome,
    response_time_ms: u64,
    system_prompt: &'a str,
    user_message: &'a str,
    response_body: &'a str,
}

/// Trace writer shared by all AI callers
pub struct AiTrace {
    dir: PathBuf,
    max_files: usize,
    seq: AtomicU64,
    evict_lock: Mutex<()>,
}

impl AiTrace {
    /// Create a trace writer rooted at `dir`, keeping at most `max_files` files
    pub fn new(dir: PathBuf, max_files: usize) -> Self {
        Self {
            dir,
            max_files: max_files.max(1),
            seq: AtomicU64::new(0),
            evict_lock: Mutex::new(()),
        }
    }

    /// Record one call. Never fails; IO problems are logged at warn.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        purpose: &str,
        model: &str,
        outcome: TraceOutcome,
        response_time_ms: u64,
        system_prompt: &str,
        user_message: &str,
        response_body: &str,
    ) {
        let record = TraceRecord {
            recorded_at_utc: Utc::now().to_rfc3339(),
            purpose,
            model,
            outcome,
            response_time_ms,
            system_prompt,
            user_message,
            response_body,
        };

        if let Err(e) = self.write_record(purpose, &record) {
            tracing::warn!(error = %e, "failed to write AI trace record");
        }
    }

    fn write_record(&self, purpose: &str, record: &TraceRecord<'_>) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{}_{purpose}_{seq:04}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        );
        let path = self.dir.join(name);
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(&path, body)?;

        self.evict_oldest()?;
        Ok(())
    }

    fn evict_oldest(&self) -> std::io::Result<()> {
        let _guard = match self.evict_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();

        if entries.len() <= self.max_files {
            return Ok(());
        }

        // File names start with a sortable timestamp
        entries.sort();
        let excess = entries.len() - self.max_files;
        for path in entries.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to evict trace file");
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn count_json(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count()
    }

    #[test]
    fn record_writes_one_file_per_call() {
        let tmp = tempfile::tempdir().unwrap();
        let trace = AiTrace::new(tmp.path().to_path_buf(), 10);

        trace.record("title_parse", "m", TraceOutcome::Success, 120, "sys", "user", "{}");
        trace.record("title_parse", "m", TraceOutcome::HttpError, 50, "sys", "user", "boom");

        assert_eq!(count_json(tmp.path()), 2);
    }

    #[test]
    fn eviction_keeps_at_most_max_files() {
        let tmp = tempfile::tempdir().unwrap();
        let trace = AiTrace::new(tmp.path().to_path_buf(), 3);

        for i in 0..7 {
            trace.record(
                "rename",
                "m",
                TraceOutcome::Success,
                i,
                "sys",
                "user",
                "{}",
            );
        }

        assert_eq!(count_json(tmp.path()), 3);
    }

    #[test]
    fn record_contains_outcome_and_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let trace = AiTrace::new(tmp.path().to_path_buf(), 5);
        trace.record("subtitle_match", "gpt-x", TraceOutcome::ParseError, 9, "SYS", "USR", "RESP");

        let entry = std::fs::read_dir(tmp.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(entry.path()).unwrap()).unwrap();
        assert_eq!(body["outcome"], "parse_error");
        assert_eq!(body["system_prompt"], "SYS");
        assert_eq!(body["model"], "gpt-x");
    }
}
