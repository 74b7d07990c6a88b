//! qBittorrent WebUI REST client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::DownloaderConfig;
use crate::error::{Error, Result};
use crate::types::{TorrentFileEntry, TorrentHash, TorrentInfo};

use super::{DownloaderClient, TorrentSource, TorrentSummary};

#[derive(Debug, Deserialize)]
struct QbitTorrentRow {
    hash: String,
    name: String,
    save_path: String,
    size: i64,
    progress: f64,
}

#[derive(Debug, Deserialize)]
struct QbitFileRow {
    name: String,
    size: i64,
}

/// Client for qBittorrent's WebUI API (v2)
///
/// Authentication is cookie-based; a 403 on any call triggers one re-login
/// and retry before the error surfaces.
pub struct QbitClient {
    http: reqwest::Client,
    config: DownloaderConfig,
}

impl QbitClient {
    /// Create a client over the configured WebUI endpoint
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v2/{endpoint}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn do_login(&self) -> Result<()> {
        let response = self
            .http
            .post(self.url("auth/login"))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(Error::UpstreamFault(format!(
                "qBittorrent login failed: HTTP {} {body}",
                status.as_u16()
            )));
        }
        tracing::debug!("qBittorrent login succeeded");
        Ok(())
    }

    /// GET an endpoint, re-authenticating once on 403
    async fn get_with_relogin(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<String> {
        for attempt in 0..2 {
            let response = self
                .http
                .get(self.url(endpoint))
                .query(query)
                .send()
                .await?;
            let status = response.status();

            if status.as_u16() == 403 && attempt == 0 {
                tracing::debug!(endpoint, "session expired, re-authenticating");
                self.do_login().await?;
                continue;
            }
            if !status.is_success() {
                return Err(Error::UpstreamFault(format!(
                    "qBittorrent {endpoint} failed: HTTP {}",
                    status.as_u16()
                )));
            }
            return Ok(response.text().await?);
        }
        Err(Error::Unreachable("relogin loop exhausted".into()))
    }
}

#[async_trait]
impl DownloaderClient for QbitClient {
    async fn login(&self) -> Result<()> {
        self.do_login().await
    }

    async fn add_torrent(
        &self,
        source: TorrentSource,
        category: &str,
        save_path: &str,
    ) -> Result<()> {
        let mut form = reqwest::multipart::Form::new()
            .text("savepath", save_path.to_string())
            .text("category", category.to_string());

        form = match source {
            TorrentSource::Url(url) => form.text("urls", url),
            TorrentSource::File { file_name, bytes } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/x-bittorrent")
                    .map_err(|e| Error::Other(format!("invalid torrent mime: {e}")))?;
                form.part("torrents", part)
            }
        };

        let response = self
            .http
            .post(self.url("torrents/add"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        // qBittorrent answers 200 "Ok." for new torrents and "Fails." when it
        // refuses; an already-known hash is treated as success (idempotent add)
        if status.is_success() && body.trim() != "Fails." {
            return Ok(());
        }
        if body.contains("already") {
            tracing::debug!("torrent already present in downloader");
            return Ok(());
        }
        Err(Error::UpstreamFault(format!(
            "qBittorrent add failed: HTTP {} {body}",
            status.as_u16()
        )))
    }

    async fn get_torrent_info(&self, hash: &TorrentHash) -> Result<Option<TorrentInfo>> {
        let body = self
            .get_with_relogin("torrents/info", &[("hashes", hash.as_str())])
            .await?;
        let rows: Vec<QbitTorrentRow> = serde_json::from_str(&body)?;

        Ok(rows.into_iter().next().map(|row| TorrentInfo {
            name: row.name,
            save_path: row.save_path,
            size: row.size.max(0) as u64,
            progress: row.progress,
        }))
    }

    async fn get_torrent_files(&self, hash: &TorrentHash) -> Result<Vec<TorrentFileEntry>> {
        let body = self
            .get_with_relogin("torrents/files", &[("hash", hash.as_str())])
            .await?;
        let rows: Vec<QbitFileRow> = serde_json::from_str(&body)?;

        Ok(rows
            .into_iter()
            .map(|row| TorrentFileEntry {
                name: row.name,
                size: row.size.max(0) as u64,
            })
            .collect())
    }

    async fn get_all_torrents(&self) -> Result<Vec<TorrentSummary>> {
        let body = self.get_with_relogin("torrents/info", &[]).await?;
        let rows: Vec<QbitTorrentRow> = serde_json::from_str(&body)?;

        let mut torrents = Vec::with_capacity(rows.len());
        for row in rows {
            let Ok(hash) = TorrentHash::parse(&row.hash) else {
                tracing::warn!(hash = %row.hash, "skipping torrent with malformed hash");
                continue;
            };
            torrents.push(TorrentSummary {
                hash,
                name: row.name,
                progress: row.progress,
            });
        }
        Ok(torrents)
    }

    async fn delete_torrent(&self, hash: &TorrentHash, delete_files: bool) -> Result<()> {
        let response = self
            .http
            .post(self.url("torrents/delete"))
            .form(&[
                ("hashes", hash.as_str()),
                ("deleteFiles", if delete_files { "true" } else { "false" }),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFault(format!(
                "qBittorrent delete failed: HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
