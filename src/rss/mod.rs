//! RSS feed fetching and parsing
//!
//! Fetches anime release feeds and normalises them into [`RssItem`]s. Both
//! RSS 2.0 and Atom are supported; parsing tries RSS first and falls back to
//! Atom. Torrent URLs come from enclosures or links; the info hash is
//! extracted from whichever URL carries a 40-hex token.

mod filter;

pub use filter::FeedFilter;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::utils::extract_info_hash;

/// Represents an item from an RSS or Atom feed
#[derive(Clone, Debug)]
pub struct RssItem {
    /// Item title
    pub title: String,

    /// Item link/URL
    pub link: Option<String>,

    /// Unique identifier (GUID for RSS, id for Atom)
    pub guid: String,

    /// Publication date
    pub pub_date: Option<DateTime<Utc>>,

    /// Item description
    pub description: Option<String>,

    /// Size in bytes (from enclosure)
    pub size: Option<u64>,

    /// Torrent download URL (from enclosure or link)
    pub torrent_url: Option<String>,

    /// Info hash extracted from the torrent URL, link or GUID
    pub hash: Option<String>,
}

/// Fetches and parses release feeds
pub struct RssFetcher {
    http_client: reqwest::Client,
}

impl RssFetcher {
    /// Create a fetcher with a 30 s timeout
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("ani-dl RSS Reader")
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http_client })
    }

    /// Fetch a feed and parse it into items.
    ///
    /// Tries RSS 2.0 first, then Atom; both failing is an error carrying both
    /// parse messages.
    pub async fn check_feed(&self, url: &str) -> Result<Vec<RssItem>> {
        debug!(url, "checking feed");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::UpstreamFault(format!("failed to fetch feed '{url}': {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamFault(format!(
                "feed returned HTTP {}: {url}",
                status.as_u16()
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| Error::UpstreamFault(format!("failed to read feed body: {e}")))?;

        match parse_as_rss(&content) {
            Ok(items) => {
                debug!(count = items.len(), "parsed as RSS");
                Ok(items)
            }
            Err(rss_err) => {
                debug!(error = %rss_err, "RSS parse failed, trying Atom");
                match parse_as_atom(&content) {
                    Ok(items) => {
                        debug!(count = items.len(), "parsed as Atom");
                        Ok(items)
                    }
                    Err(atom_err) => Err(Error::ParseFailure(format!(
                        "feed is neither RSS nor Atom. RSS error: {rss_err}. Atom error: {atom_err}"
                    ))),
                }
            }
        }
    }
}

fn parse_as_rss(content: &str) -> Result<Vec<RssItem>> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| Error::ParseFailure(format!("RSS parse error: {e}")))?;

    let items = channel
        .items()
        .iter()
        .map(|item| {
            // GUID preference: guid, then link, then title
            let guid = item
                .guid()
                .map(|g| g.value().to_string())
                .or_else(|| item.link().map(str::to_string))
                .unwrap_or_else(|| item.title().unwrap_or("").to_string());

            let pub_date = item.pub_date().and_then(|date_str| {
                DateTime::parse_from_rfc2822(date_str)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            });

            let torrent_url = item
                .enclosure()
                .map(|enc| enc.url().to_string())
                .or_else(|| {
                    item.link()
                        .filter(|link| {
                            link.ends_with(".torrent") || link.starts_with("magnet:")
                        })
                        .map(str::to_string)
                });

            let size = item
                .enclosure()
                .and_then(|enc| enc.length().parse::<u64>().ok())
                .filter(|&s| s > 0);

            let hash = torrent_url
                .as_deref()
                .and_then(extract_info_hash)
                .or_else(|| item.link().and_then(extract_info_hash))
                .or_else(|| extract_info_hash(&guid));

            RssItem {
                title: item.title().unwrap_or("").to_string(),
                link: item.link().map(str::to_string),
                guid,
                pub_date,
                description: item.description().map(str::to_string),
                size,
                torrent_url,
                hash,
            }
        })
        .collect();

    Ok(items)
}

fn parse_as_atom(content: &str) -> Result<Vec<RssItem>> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| Error::ParseFailure(format!("Atom parse error: {e}")))?;

    let items = feed
        .entries()
        .iter()
        .map(|entry| {
            let guid = entry.id().to_string();

            let pub_date = entry
                .published()
                .copied()
                .or_else(|| Some(*entry.updated()))
                .map(|dt| dt.with_timezone(&Utc));

            let torrent_url = entry
                .links()
                .iter()
                .find(|link| {
                    link.href().ends_with(".torrent")
                        || link.href().starts_with("magnet:")
                        || link.mime_type() == Some("application/x-bittorrent")
                })
                .map(|link| link.href().to_string());

            let link = entry.links().first().map(|l| l.href().to_string());

            let hash = torrent_url
                .as_deref()
                .and_then(extract_info_hash)
                .or_else(|| link.as_deref().and_then(extract_info_hash))
                .or_else(|| extract_info_hash(&guid));

            RssItem {
                title: entry.title().to_string(),
                link,
                guid,
                pub_date,
                description: entry.summary().map(|s| s.to_string()),
                size: None,
                torrent_url,
                hash,
            }
        })
        .collect();

    Ok(items)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_rss(hash: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Mikan Project</title>
    <link>https://mikan.example</link>
    <description>anime releases</description>
    <item>
      <title>[ANi] 葬送的芙莉莲 - 02 [1080P][Baha][WEB-DL][AAC AVC][CHT][MP4]</title>
      <link>https://mikan.example/Home/Episode/{hash}</link>
      <guid isPermaLink="false">https://mikan.example/Home/Episode/{hash}</guid>
      <pubDate>Sat, 30 Sep 2023 12:00:00 +0000</pubDate>
      <description>1080P WEB-DL</description>
      <enclosure url="https://mikan.example/Download/{hash}.torrent" length="438291222" type="application/x-bittorrent"/>
    </item>
    <item>
      <title>Second item without enclosure</title>
      <link>https://mikan.example/page</link>
    </item>
  </channel>
</rss>"#
        )
    }

    const SAMPLE_ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Releases</title>
  <id>urn:feed:1</id>
  <updated>2023-09-30T12:00:00Z</updated>
  <entry>
    <title>[Sub] Title - 05</title>
    <id>urn:item:5</id>
    <updated>2023-09-30T12:00:00Z</updated>
    <link href="https://example.com/dl/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.torrent"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items_with_hash_and_enclosure() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        let items = parse_as_rss(&sample_rss(hash)).unwrap();

        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert!(first.title.starts_with("[ANi] 葬送的芙莉莲"));
        assert_eq!(
            first.torrent_url.as_deref(),
            Some(format!("https://mikan.example/Download/{hash}.torrent").as_str())
        );
        assert_eq!(first.hash.as_deref(), Some(hash));
        assert_eq!(first.size, Some(438_291_222));
        assert!(first.pub_date.is_some());

        let second = &items[1];
        assert!(second.torrent_url.is_none());
        assert!(second.hash.is_none());
    }

    #[test]
    fn falls_back_to_atom() {
        let items = parse_as_atom(SAMPLE_ATOM).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].hash.as_deref(), Some("a".repeat(40).as_str()));
        assert!(items[0].torrent_url.as_deref().unwrap().ends_with(".torrent"));
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        assert!(parse_as_rss("not xml").is_err());
        assert!(parse_as_atom("not xml").is_err());
    }

    #[tokio::test]
    async fn check_feed_fetches_and_parses() {
        let server = MockServer::start().await;
        let hash = "f".repeat(40);
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sample_rss(&hash)))
            .mount(&server)
            .await;

        let fetcher = RssFetcher::new().unwrap();
        let items = fetcher
            .check_feed(&format!("{}/rss", server.uri()))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].hash.as_deref(), Some(hash.as_str()));
    }

    #[tokio::test]
    async fn check_feed_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = RssFetcher::new().unwrap();
        let err = fetcher
            .check_feed(&format!("{}/rss", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamFault(_)));
        assert!(err.to_string().contains("503"));
    }
}
