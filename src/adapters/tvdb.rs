//! TVDB v4 REST client

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::TvdbConfig;
use crate::error::{Error, Result};
use crate::types::EpisodeInfo;

use super::{MetadataProvider, SeriesExtended, SeriesSearchResult};

/// Pagination safety cap for episode listings
const MAX_EPISODE_PAGES: u32 = 20;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchRow>,
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    tvdb_id: String,
    name: String,
    year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodesResponse {
    #[serde(default)]
    data: EpisodesData,
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodesData {
    #[serde(default)]
    episodes: Vec<EpisodeInfo>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

/// Client for TVDB's v4 API.
///
/// The bearer token from `/login` is cached and refreshed on 401.
pub struct TvdbClient {
    http: reqwest::Client,
    config: TvdbConfig,
    token: RwLock<Option<String>>,
}

impl TvdbClient {
    /// Create a client over the configured endpoint
    pub fn new(config: TvdbConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'))
    }

    async fn login(&self) -> Result<String> {
        let response = self
            .http
            .post(self.url("login"))
            .json(&serde_json::json!({ "apikey": self.config.api_key }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFault(format!(
                "TVDB login failed: HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: LoginResponse = response.json().await?;
        let token = body.data.token;
        *self.token.write().await = Some(token.clone());
        tracing::debug!("TVDB login succeeded");
        Ok(token)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// GET a JSON endpoint with the cached token, refreshing once on 401
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        for attempt in 0..2 {
            let token = self.token().await?;
            let response = self
                .http
                .get(self.url(endpoint))
                .bearer_auth(token)
                .query(query)
                .send()
                .await?;
            let status = response.status();

            if status.as_u16() == 401 && attempt == 0 {
                tracing::debug!(endpoint, "TVDB token expired, refreshing");
                *self.token.write().await = None;
                continue;
            }
            if !status.is_success() {
                return Err(Error::UpstreamFault(format!(
                    "TVDB {endpoint} failed: HTTP {}",
                    status.as_u16()
                )));
            }
            return Ok(response.json().await?);
        }
        Err(Error::Unreachable("token refresh loop exhausted".into()))
    }
}

#[async_trait]
impl MetadataProvider for TvdbClient {
    async fn search_series(&self, name: &str) -> Result<Vec<SeriesSearchResult>> {
        let body: SearchResponse = self
            .get_json("search", &[("query", name), ("type", "series")])
            .await?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|row| {
                // tvdb_id comes back as "series-12345" or a bare number
                let id = row
                    .tvdb_id
                    .rsplit('-')
                    .next()
                    .and_then(|part| part.parse::<i64>().ok())?;
                Some(SeriesSearchResult {
                    id,
                    name: row.name,
                    year: row.year,
                })
            })
            .collect())
    }

    async fn get_series_extended(&self, series_id: i64) -> Result<Option<SeriesExtended>> {
        #[derive(Deserialize)]
        struct ExtendedResponse {
            data: Option<ExtendedRow>,
        }
        #[derive(Deserialize)]
        struct ExtendedRow {
            id: i64,
            name: String,
            status: Option<StatusRow>,
            #[serde(rename = "firstAired")]
            first_aired: Option<String>,
        }
        #[derive(Deserialize)]
        struct StatusRow {
            name: Option<String>,
        }

        let body: ExtendedResponse = self
            .get_json(&format!("series/{series_id}/extended"), &[])
            .await?;

        Ok(body.data.map(|row| SeriesExtended {
            id: row.id,
            name: row.name,
            status: row.status.and_then(|s| s.name),
            first_aired: row.first_aired,
        }))
    }

    async fn get_all_episodes(&self, series_id: i64) -> Result<Vec<EpisodeInfo>> {
        let mut episodes = Vec::new();

        for page in 0..MAX_EPISODE_PAGES {
            let page_param = page.to_string();
            let body: EpisodesResponse = self
                .get_json(
                    &format!("series/{series_id}/episodes/default"),
                    &[("page", page_param.as_str())],
                )
                .await?;

            episodes.extend(body.data.episodes);

            let has_next = body
                .links
                .as_ref()
                .and_then(|l| l.next.as_deref())
                .is_some_and(|n| !n.is_empty());
            if !has_next {
                break;
            }
        }

        tracing::debug!(series_id, count = episodes.len(), "TVDB episodes fetched");
        Ok(episodes)
    }
}
