//! Torrent completion pipeline
//!
//! Runs on `torrent_completed`: list the torrent's files, decide renames
//! (stored patterns first, AI fallback), persist any new regex bundle,
//! materialise hardlinks, and notify. The torrent becomes `archived` only
//! when every file is linked or deliberately skipped; anything else leaves
//! a reportably partial `error` state with per-file outcomes logged.

use std::collections::BTreeMap;

use crate::adapters::Embed;
use crate::ai::{RenameRequest, TvdbSeasonInfo};
use crate::db::AnimeRecord;
use crate::error::{Error, Result};
use crate::rename::{self, RenameMethod, RenamePlan};
use crate::types::{AnimeId, Category, DownloadStatus, Event, MediaType, TorrentHash};

use super::DownloadOrchestrator;

impl DownloadOrchestrator {
    /// Run the completion pipeline for a finished torrent.
    pub(crate) async fn run_completion_pipeline(&self, hash: &TorrentHash) -> Result<()> {
        let record = self
            .db
            .get_download(hash.as_str())
            .await?
            .ok_or_else(|| Error::NotFound(format!("download {}", hash.short())))?;

        // Downloader-reported location wins over what we recorded at submit
        let save_path = match self.downloader.get_torrent_info(hash).await? {
            Some(info) => info.save_path,
            None => record.download_directory.clone(),
        };

        let files = self.downloader.get_torrent_files(hash).await?;
        if files.is_empty() {
            return Err(Error::NotFound(format!(
                "downloader lists no files for {}",
                hash.short()
            )));
        }

        let file_rows: Vec<(String, i64, String)> = files
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    f.size as i64,
                    rename::classify(&f.name).as_str().to_string(),
                )
            })
            .collect();
        self.db.replace_torrent_files(hash.as_str(), &file_rows).await?;

        // The anime may still be unresolved when submit-time parsing failed
        let anime_id = match record.anime_id {
            Some(id) => AnimeId(id),
            None => {
                let media_type = MediaType::Anime;
                match self
                    .resolve_or_create_anime(&record.original_filename, media_type)
                    .await?
                {
                    Some(id) => {
                        self.db.set_download_anime(hash.as_str(), id).await?;
                        id
                    }
                    None => {
                        self.db
                            .set_download_error(hash.as_str(), "title unparseable")
                            .await?;
                        return Err(Error::ParseFailure(format!(
                            "cannot resolve an anime for {}",
                            hash.short()
                        )));
                    }
                }
            }
        };

        let anime = self
            .db
            .get_anime(anime_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("anime {anime_id}")))?;

        let file_paths: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let plan = self.decide_renames(hash, &anime, &file_paths).await?;
        let plan = self.resolve_unmatched_subtitles(plan, &anime).await;

        if let Some(bundle) = &plan.new_patterns {
            self.db.upsert_anime_patterns(anime_id, bundle).await?;
            tracing::info!(anime_id = %anime_id, "stored rename patterns replaced");
        }

        let category = Category::from_str_lossy(&anime.category);
        let media_type = MediaType::from_str_lossy(&anime.media_type);
        let report = self
            .hardlinks
            .materialise(
                hash,
                anime_id,
                &anime.short_title,
                media_type,
                category,
                &save_path,
                &plan,
            )
            .await?;

        if report.is_complete() {
            self.db
                .update_download_status(hash.as_str(), DownloadStatus::Archived.as_str())
                .await?;
            tracing::info!(hash = %hash.short(), "torrent archived");
            self.emit(Event::TorrentArchived {
                hash: hash.clone(),
                video_count: plan.video_count(),
                subtitle_count: plan.subtitle_count(),
                target_dir: report.target_dir.clone(),
            });
        } else {
            let error = format!(
                "{} of {} files failed to link",
                report.failed,
                plan.entries.len()
            );
            self.db.set_download_error(hash.as_str(), &error).await?;
            self.emit(Event::TorrentFailed {
                hash: hash.clone(),
                error,
            });
        }

        self.notify_hardlink_summary(&anime, &plan, &report).await;

        if report.is_complete() {
            Ok(())
        } else {
            Err(Error::Filesystem {
                path: report.target_dir,
                reason: format!("{} files failed to link", report.failed),
            })
        }
    }

    /// Stored regex bundle first; AI fallback with prior-hardlink awareness.
    async fn decide_renames(
        &self,
        hash: &TorrentHash,
        anime: &AnimeRecord,
        files: &[String],
    ) -> Result<RenamePlan> {
        let anime_id = AnimeId(anime.anime_id);
        let context = rename::AnimeContext {
            title: &anime.short_title,
            season: anime.season.max(0) as u32,
            group: &anime.subtitle_group,
            category: Category::from_str_lossy(&anime.category),
        };

        if let Some(bundle) = self.db.get_anime_patterns(anime_id).await?
            && let Some(plan) = rename::plan_from_patterns(files, &context, &bundle)
        {
            tracing::info!(
                hash = %hash.short(),
                entries = plan.entries.len(),
                "renames decided from stored patterns"
            );
            return Ok(plan);
        }

        let previous_hardlinks = self.db.get_hardlink_targets_for_anime(anime_id).await?;
        let tvdb = self.tvdb_season_info(anime).await;

        let result = self
            .file_renamer
            .rename(RenameRequest {
                files,
                category: context.category,
                anime_title: &anime.short_title,
                previous_hardlinks: &previous_hardlinks,
                tvdb: tvdb.as_ref(),
            })
            .await?;

        tracing::info!(
            hash = %hash.short(),
            entries = result.main_files.len(),
            skipped = result.skipped_files.len(),
            "renames decided by AI"
        );
        Ok(rename::plan_from_ai(&result))
    }

    /// Pair subtitles the stored patterns could not place with their videos.
    ///
    /// Matching failures are never fatal: leftovers land in `skipped` and
    /// the torrent can still archive.
    async fn resolve_unmatched_subtitles(
        &self,
        mut plan: RenamePlan,
        anime: &AnimeRecord,
    ) -> RenamePlan {
        if plan.unmatched_subtitles.is_empty() {
            return plan;
        }

        let videos: Vec<String> = plan
            .entries
            .iter()
            .filter(|e| e.kind == crate::rename::FileKind::Video)
            .map(|e| e.target_rel.clone())
            .collect();
        let subtitles = std::mem::take(&mut plan.unmatched_subtitles);

        if videos.is_empty() {
            plan.skipped.extend(subtitles);
            return plan;
        }

        match self
            .subtitle_matcher
            .match_subtitles(&videos, &subtitles, &anime.short_title)
            .await
        {
            Ok(result) => {
                let mut assigned: std::collections::HashSet<String> =
                    std::collections::HashSet::new();
                for matched in &result.matches {
                    let Some((video_target, subtitle_source)) =
                        crate::ai::SubtitleMatcher::resolve(matched, &videos, &subtitles)
                    else {
                        continue;
                    };
                    // new_name carries no season directory; inherit the
                    // matched video's prefix
                    let target_rel = match std::path::Path::new(video_target).parent() {
                        Some(prefix) if prefix != std::path::Path::new("") => {
                            format!("{}/{}", prefix.display(), matched.new_name)
                        }
                        _ => matched.new_name.clone(),
                    };
                    plan.entries.push(crate::rename::PlanEntry {
                        source: subtitle_source.to_string(),
                        target_rel,
                        kind: crate::rename::FileKind::Subtitle,
                    });
                    assigned.insert(subtitle_source.to_string());
                }
                for subtitle in subtitles {
                    if !assigned.contains(&subtitle) {
                        plan.skipped.push(subtitle);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "subtitle matching failed, skipping subtitles");
                plan.skipped.extend(subtitles);
            }
        }

        plan
    }

    /// Fetch TVDB season boundaries for an anime; outages are never fatal.
    async fn tvdb_season_info(&self, anime: &AnimeRecord) -> Option<TvdbSeasonInfo> {
        let provider = self.metadata.as_ref()?;
        let anime_id = AnimeId(anime.anime_id);

        let series_id = match anime.tvdb_id {
            Some(id) => id,
            None => {
                let results = match provider.search_series(&anime.short_title).await {
                    Ok(results) => results,
                    Err(e) => {
                        tracing::warn!(error = %e, "TVDB search failed, renaming without metadata");
                        return None;
                    }
                };
                let first = results.into_iter().next()?;
                if let Err(e) = self.db.set_anime_tvdb_id(anime_id, first.id).await {
                    tracing::warn!(error = %e, "failed to persist tvdb id");
                }
                first.id
            }
        };

        let episodes = match provider.get_all_episodes(series_id).await {
            Ok(episodes) => episodes,
            Err(e) => {
                tracing::warn!(error = %e, "TVDB episodes fetch failed, renaming without metadata");
                return None;
            }
        };
        if episodes.is_empty() {
            return None;
        }

        let mut season_episode_counts: BTreeMap<u32, u32> = BTreeMap::new();
        for episode in &episodes {
            *season_episode_counts.entry(episode.season_number).or_insert(0) += 1;
        }

        Some(TvdbSeasonInfo {
            series_name: anime.short_title.clone(),
            season_episode_counts,
        })
    }

    /// Hardlink-complete notification: counts, method, target dir, examples.
    async fn notify_hardlink_summary(
        &self,
        anime: &AnimeRecord,
        plan: &RenamePlan,
        report: &crate::hardlink::HardlinkReport,
    ) {
        let method = match plan.method {
            Some(RenameMethod::StoredPatterns) => "stored patterns",
            Some(RenameMethod::Ai) => "AI",
            None => "unknown",
        };

        let examples: Vec<String> = plan
            .entries
            .iter()
            .take(3)
            .map(|e| e.target_rel.clone())
            .collect();

        let mut embed = Embed::new(
            if report.is_complete() {
                "Hardlinks complete"
            } else {
                "Hardlinks partial"
            },
            anime.short_title.clone(),
        )
        .color(if report.is_complete() { 0x2ECC71 } else { 0xE67E22 })
        .field("videos", plan.video_count().to_string(), true)
        .field("subtitles", plan.subtitle_count().to_string(), true)
        .field("method", method, true)
        .field("directory", report.target_dir.display().to_string(), false);

        if !examples.is_empty() {
            embed = embed.field("examples", examples.join("\n"), false);
        }
        if report.failed > 0 {
            embed = embed.field("failed", report.failed.to_string(), true);
        }

        let result = self.notifier.send("hardlink", vec![embed], None).await;
        if !result.success {
            self.emit(Event::NotificationFailed {
                channel: "hardlink".to_string(),
                error: result.error.unwrap_or_default(),
            });
        }
    }
}
