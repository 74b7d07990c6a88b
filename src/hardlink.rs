//! Hardlink materialisation
//!
//! Turns a rename plan into hardlinks under the library root. Creation is
//! idempotent per (torrent, source, target): an existing row is a no-op, an
//! existing target with the same inode is repaired into a row, and an
//! existing target with a different inode is a name collision that is
//! reported but never overwritten. Removal walks the rows and tolerates
//! files that are already gone.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{LibraryConfig, PathConversionConfig};
use crate::db::{Database, NewHardlink};
use crate::error::Result;
use crate::rename::RenamePlan;
use crate::types::{AnimeId, Category, MediaType, TorrentHash};
use crate::utils::{convert_path, sanitize_filename};

/// Outcome of one planned link
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum LinkStatus {
    /// Link created and row inserted
    Created,
    /// Row (or same-inode target) already present
    AlreadyLinked,
    /// Fatal for this file; the torrent becomes reportably partial
    Failed(String),
}

/// Per-file report entry
#[derive(Clone, Debug, Serialize)]
pub struct LinkOutcome {
    /// Absolute source path
    pub source: PathBuf,
    /// Absolute target path under the library
    pub target: PathBuf,
    /// What happened
    pub status: LinkStatus,
}

/// Aggregate result of materialising one plan
#[derive(Clone, Debug, Default, Serialize)]
pub struct HardlinkReport {
    /// Per-file outcomes, in plan order
    pub outcomes: Vec<LinkOutcome>,
    /// Links created this run
    pub created: usize,
    /// Idempotent no-ops
    pub already_linked: usize,
    /// Per-file failures
    pub failed: usize,
    /// The anime's library directory
    pub target_dir: PathBuf,
}

impl HardlinkReport {
    /// True when every file is linked or was already linked
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Materialises rename plans as hardlinks and tracks them for dedup/reversal
#[derive(Clone)]
pub struct HardlinkService {
    db: Database,
    library: LibraryConfig,
    path_conversion: PathConversionConfig,
}

impl HardlinkService {
    /// Create a service over the library roots and path translation settings
    pub fn new(
        db: Database,
        library: LibraryConfig,
        path_conversion: PathConversionConfig,
    ) -> Self {
        Self {
            db,
            library,
            path_conversion,
        }
    }

    /// The library directory an anime's files land in
    pub fn anime_dir(&self, title: &str, media_type: MediaType, category: Category) -> PathBuf {
        self.library
            .root_for(media_type, category)
            .join(sanitize_filename(title))
    }

    /// Materialise a rename plan.
    ///
    /// `save_path` is the downloader-reported torrent directory; it passes
    /// through path conversion at this boundary. Per-file failures are
    /// recorded in the report and do not abort the remaining files; only
    /// database faults propagate as `Err`.
    pub async fn materialise(
        &self,
        hash: &TorrentHash,
        anime_id: AnimeId,
        anime_title: &str,
        media_type: MediaType,
        category: Category,
        save_path: &str,
        plan: &RenamePlan,
    ) -> Result<HardlinkReport> {
        let source_base = PathBuf::from(convert_path(&self.path_conversion, save_path));
        let target_dir = self.anime_dir(anime_title, media_type, category);

        let mut report = HardlinkReport {
            target_dir: target_dir.clone(),
            ..Default::default()
        };

        for entry in &plan.entries {
            let source = source_base.join(&entry.source);
            let target = target_dir.join(&entry.target_rel);
            let status = self.link_one(hash, anime_id, &source, &target).await?;

            match &status {
                LinkStatus::Created => report.created += 1,
                LinkStatus::AlreadyLinked => report.already_linked += 1,
                LinkStatus::Failed(reason) => {
                    tracing::error!(
                        hash = %hash.short(),
                        source = %source.display(),
                        target = %target.display(),
                        reason = %reason,
                        "hardlink failed"
                    );
                    report.failed += 1;
                }
            }
            report.outcomes.push(LinkOutcome {
                source,
                target,
                status,
            });
        }

        tracing::info!(
            hash = %hash.short(),
            created = report.created,
            already_linked = report.already_linked,
            failed = report.failed,
            target_dir = %target_dir.display(),
            "hardlink pass complete"
        );
        Ok(report)
    }

    async fn link_one(
        &self,
        hash: &TorrentHash,
        anime_id: AnimeId,
        source: &Path,
        target: &Path,
    ) -> Result<LinkStatus> {
        let source_str = source.to_string_lossy();
        let target_str = target.to_string_lossy();

        // Row already present: idempotent no-op
        if self
            .db
            .hardlink_exists(hash.as_str(), &source_str, &target_str)
            .await?
        {
            return Ok(LinkStatus::AlreadyLinked);
        }

        let source_meta = match std::fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                return Ok(LinkStatus::Failed(format!("source missing: {e}")));
            }
        };

        if let Some(parent) = target.parent()
            && let Err(e) = create_dir_all_mode(parent)
        {
            return Ok(LinkStatus::Failed(format!(
                "failed to create directory '{}': {e}",
                parent.display()
            )));
        }

        match std::fs::metadata(target) {
            Ok(target_meta) => {
                if same_inode(&source_meta, &target_meta) {
                    // Link exists but the row was lost; repair the row
                    self.insert_row(hash, anime_id, &source_str, &target_str, &source_meta)
                        .await?;
                    return Ok(LinkStatus::AlreadyLinked);
                }
                return Ok(LinkStatus::Failed(
                    "name collision: target exists with a different inode".to_string(),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Ok(LinkStatus::Failed(format!("cannot stat target: {e}")));
            }
        }

        if let Err(e) = std::fs::hard_link(source, target) {
            // Cross-device links are the classic failure here; the error is
            // fatal for the file either way
            return Ok(LinkStatus::Failed(format!("link failed: {e}")));
        }

        self.insert_row(hash, anime_id, &source_str, &target_str, &source_meta)
            .await?;
        Ok(LinkStatus::Created)
    }

    async fn insert_row(
        &self,
        hash: &TorrentHash,
        anime_id: AnimeId,
        source: &str,
        target: &str,
        meta: &std::fs::Metadata,
    ) -> Result<()> {
        self.db
            .insert_hardlink(&NewHardlink {
                torrent_hash: hash.as_str(),
                anime_id,
                original_file_path: source,
                hardlink_path: target,
                file_size: meta.len() as i64,
            })
            .await?;
        Ok(())
    }

    /// Remove every link created from a torrent.
    ///
    /// Files already gone from the library are tolerated; rows are deleted
    /// either way. Returns the number of rows removed.
    pub async fn remove_for_torrent(&self, hash: &TorrentHash) -> Result<usize> {
        let rows = self.db.delete_hardlinks_for_torrent(hash.as_str()).await?;

        for row in &rows {
            match std::fs::remove_file(&row.hardlink_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %row.hardlink_path, "link already removed");
                }
                Err(e) => {
                    tracing::warn!(path = %row.hardlink_path, error = %e, "failed to unlink");
                }
            }
        }

        tracing::info!(hash = %hash.short(), count = rows.len(), "hardlinks removed");
        Ok(rows.len())
    }
}

#[cfg(unix)]
fn create_dir_all_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().recursive(true).mode(0o775).create(path)
}

#[cfg(not(unix))]
fn create_dir_all_mode(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(unix)]
fn same_inode(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.ino() == b.ino() && a.dev() == b.dev()
}

#[cfg(not(unix))]
fn same_inode(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::rename::{FileKind, PlanEntry};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        db: Database,
        _db_file: tempfile::NamedTempFile,
        service: HardlinkService,
        downloads: PathBuf,
        library_root: PathBuf,
        hash: TorrentHash,
        anime_id: AnimeId,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let downloads = tmp.path().join("downloads");
        let library_root = tmp.path().join("library/anime/tv");
        std::fs::create_dir_all(&downloads).unwrap();

        let db_file = tempfile::NamedTempFile::new().unwrap();
        let db = Database::new(db_file.path()).await.unwrap();

        let hash = TorrentHash::parse(&"a".repeat(40)).unwrap();
        db.insert_download(&crate::db::NewDownload {
            hash: hash.as_str().to_string(),
            original_filename: "test".to_string(),
            anime_id: None,
            status: "completed".to_string(),
            download_directory: downloads.to_string_lossy().to_string(),
        })
        .await
        .unwrap();

        let anime_id = db
            .insert_anime(&crate::db::NewAnime {
                short_title: "X",
                full_title: None,
                subtitle_group: "ANi",
                season: 1,
                category: "tv",
                media_type: "anime",
            })
            .await
            .unwrap();

        let library = LibraryConfig {
            anime_tv: library_root.clone(),
            anime_movie: tmp.path().join("library/anime/movies"),
            live_action_tv: tmp.path().join("library/live/tv"),
            live_action_movie: tmp.path().join("library/live/movies"),
        };
        let service = HardlinkService::new(
            db.clone(),
            library,
            PathConversionConfig::default(),
        );

        Fixture {
            _tmp: tmp,
            db,
            _db_file: db_file,
            service,
            downloads,
            library_root,
            hash,
            anime_id,
        }
    }

    fn write_source(fix: &Fixture, rel: &str, contents: &str) {
        let path = fix.downloads.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn plan(entries: &[(&str, &str)]) -> RenamePlan {
        RenamePlan {
            entries: entries
                .iter()
                .map(|(source, target)| PlanEntry {
                    source: source.to_string(),
                    target_rel: target.to_string(),
                    kind: FileKind::Video,
                })
                .collect(),
            ..Default::default()
        }
    }

    async fn materialise(fix: &Fixture, plan: &RenamePlan) -> HardlinkReport {
        fix.service
            .materialise(
                &fix.hash,
                fix.anime_id,
                "X",
                MediaType::Anime,
                Category::Tv,
                &fix.downloads.to_string_lossy(),
                plan,
            )
            .await
            .unwrap()
    }

    fn count_library_files(root: &Path) -> usize {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[tokio::test]
    async fn creates_links_directories_and_rows() {
        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "video-bytes");

        let plan = plan(&[("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv")]);
        let report = materialise(&fix, &plan).await;

        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 0);
        assert!(report.is_complete());

        let target = fix.library_root.join("X/Season 1/X - S01E01 - ANi.mkv");
        assert!(target.exists());

        // Same inode as the source (a real hardlink, not a copy)
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let source_ino = std::fs::metadata(fix.downloads.join("ep01.mkv")).unwrap().ino();
            assert_eq!(std::fs::metadata(&target).unwrap().ino(), source_ino);
        }

        let rows = fix.db.get_hardlinks_for_torrent(fix.hash.as_str()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_size, "video-bytes".len() as i64);
    }

    #[tokio::test]
    async fn rerunning_the_same_plan_is_idempotent() {
        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "video");
        write_source(&fix, "ep02.mkv", "video2");

        let plan = plan(&[
            ("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv"),
            ("ep02.mkv", "Season 1/X - S01E02 - ANi.mkv"),
        ]);

        let first = materialise(&fix, &plan).await;
        assert_eq!(first.created, 2);

        let rows_before = fix.db.get_hardlinks_for_torrent(fix.hash.as_str()).await.unwrap();
        let files_before = count_library_files(&fix.library_root);

        let second = materialise(&fix, &plan).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.already_linked, 2);
        assert!(second.is_complete());

        let rows_after = fix.db.get_hardlinks_for_torrent(fix.hash.as_str()).await.unwrap();
        assert_eq!(rows_after.len(), rows_before.len(), "zero additional rows");
        assert_eq!(
            count_library_files(&fix.library_root),
            files_before,
            "zero additional filesystem links"
        );
    }

    #[tokio::test]
    async fn foreign_target_is_a_collision_not_an_overwrite() {
        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "video");

        // Pre-create the target as an unrelated file
        let target = fix.library_root.join("X/Season 1/X - S01E01 - ANi.mkv");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "someone else's file").unwrap();

        let plan = plan(&[("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv")]);
        let report = materialise(&fix, &plan).await;

        assert_eq!(report.failed, 1);
        assert!(!report.is_complete());
        assert!(matches!(report.outcomes[0].status, LinkStatus::Failed(_)));
        // The foreign file is untouched
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "someone else's file");
    }

    #[tokio::test]
    async fn same_inode_target_repairs_the_missing_row() {
        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "video");

        // Link exists on disk but no row (e.g. the row was lost)
        let target = fix.library_root.join("X/Season 1/X - S01E01 - ANi.mkv");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::hard_link(fix.downloads.join("ep01.mkv"), &target).unwrap();

        let plan = plan(&[("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv")]);
        let report = materialise(&fix, &plan).await;

        assert_eq!(report.already_linked, 1);
        assert_eq!(report.failed, 0);
        let rows = fix.db.get_hardlinks_for_torrent(fix.hash.as_str()).await.unwrap();
        assert_eq!(rows.len(), 1, "row repaired");
    }

    #[tokio::test]
    async fn missing_source_fails_that_file_only() {
        let fix = fixture().await;
        write_source(&fix, "ep02.mkv", "video");

        let plan = plan(&[
            ("missing.mkv", "Season 1/X - S01E01 - ANi.mkv"),
            ("ep02.mkv", "Season 1/X - S01E02 - ANi.mkv"),
        ]);
        let report = materialise(&fix, &plan).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert!(matches!(report.outcomes[0].status, LinkStatus::Failed(_)));
        assert_eq!(report.outcomes[1].status, LinkStatus::Created);
    }

    #[tokio::test]
    async fn removal_unlinks_and_tolerates_missing_files() {
        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "v1");
        write_source(&fix, "ep02.mkv", "v2");

        let plan = plan(&[
            ("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv"),
            ("ep02.mkv", "Season 1/X - S01E02 - ANi.mkv"),
        ]);
        materialise(&fix, &plan).await;

        // One target disappears out-of-band
        std::fs::remove_file(fix.library_root.join("X/Season 1/X - S01E01 - ANi.mkv")).unwrap();

        let removed = fix.service.remove_for_torrent(&fix.hash).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!fix.library_root.join("X/Season 1/X - S01E02 - ANi.mkv").exists());
        assert!(
            fix.db
                .get_hardlinks_for_torrent(fix.hash.as_str())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn created_directories_carry_mode_775() {
        use std::os::unix::fs::PermissionsExt;

        let fix = fixture().await;
        write_source(&fix, "ep01.mkv", "video");
        let plan = plan(&[("ep01.mkv", "Season 1/X - S01E01 - ANi.mkv")]);
        materialise(&fix, &plan).await;

        let dir = fix.library_root.join("X/Season 1");
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        // umask may clear group bits; the mode must never exceed 775
        assert_eq!(mode & !0o775, 0, "mode {mode:o} must be within 775");
    }
}
