//! YouTube Data API v3 client.
//!
//! API keys live in the database-backed credential pool; a key that comes
//! back `403 quotaExceeded` is cooled down and the next one is tried.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Deserialize;

use crate::cred::CredPool;
use crate::error::{PipelineError, PipelineResult};

use super::is_transient;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct YoutubeLocalization {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YoutubeVideo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub default_language: Option<String>,
    /// BCP 47 tag -> localized title/description.
    pub localizations: HashMap<String, YoutubeLocalization>,
    /// Largest thumbnail: (url, width, height).
    pub thumbnail: Option<(String, u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct YoutubeChannel {
    pub id: String,
    pub title: String,
    pub description: String,
    pub handle: Option<String>,
    pub avatar: Option<(String, u32, u32)>,
    pub banner: Option<(String, u32, u32)>,
}

/// Lookups the YouTube passes need. Batched endpoints return one slot per
/// requested id, `None` where the id is gone (deleted or private).
#[async_trait]
pub trait YoutubeCatalog: Send + Sync + std::fmt::Debug {
    async fn videos(&self, ids: &[String]) -> PipelineResult<Vec<Option<YoutubeVideo>>>;
    async fn channels(&self, ids: &[String]) -> PipelineResult<Vec<Option<YoutubeChannel>>>;
}

pub const VIDEO_BATCH: usize = 50;
pub const CHANNEL_BATCH: usize = 50;

// --- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireThumb {
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVideoSnippet {
    title: String,
    description: String,
    channel_id: String,
    default_language: Option<String>,
    #[serde(default)]
    thumbnails: HashMap<String, WireThumb>,
}

#[derive(Debug, Deserialize)]
struct WireVideo {
    id: String,
    snippet: WireVideoSnippet,
    #[serde(default)]
    localizations: HashMap<String, YoutubeLocalization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChannelSnippet {
    title: String,
    description: String,
    custom_url: Option<String>,
    #[serde(default)]
    thumbnails: HashMap<String, WireThumb>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChannelBranding {
    #[serde(default)]
    image: Option<WireChannelBrandingImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChannelBrandingImage {
    banner_external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChannel {
    id: String,
    snippet: WireChannelSnippet,
    #[serde(default)]
    branding_settings: Option<WireChannelBranding>,
}

#[derive(Debug, Deserialize)]
struct WireListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

fn largest_thumb(thumbs: &HashMap<String, WireThumb>) -> Option<(String, u32, u32)> {
    thumbs
        .values()
        .max_by_key(|t| u64::from(t.width) * u64::from(t.height))
        .map(|t| (t.url.clone(), t.width, t.height))
}

/// Re-order an unordered API item list to match the requested ids.
fn zip_by_id<T, F: Fn(&T) -> &str>(ids: &[String], items: Vec<T>, id_of: F) -> Vec<Option<T>> {
    let mut by_id: HashMap<String, T> = items
        .into_iter()
        .map(|item| (id_of(&item).to_owned(), item))
        .collect();
    ids.iter().map(|id| by_id.remove(id)).collect()
}

// --- client ----------------------------------------------------------------

#[derive(Debug)]
pub struct YoutubeClient {
    http: Client,
    pool: CredPool,
}

impl YoutubeClient {
    pub fn new(http: Client, pool: CredPool) -> Arc<Self> {
        Arc::new(Self { http, pool })
    }

    async fn get_list<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        part: &str,
        ids: &[String],
    ) -> PipelineResult<Vec<T>> {
        let (cred_id, key) = self
            .pool
            .roll()
            .await?
            .ok_or_else(|| PipelineError::Stop("no usable youtube api key".into()))?;

        let url = format!(
            "https://www.googleapis.com/youtube/v3/{endpoint}?part={part}&maxResults=50&id={}&key={key}",
            ids.join(",")
        );

        let fetch = || async {
            let response = self.http.get(&url).send().await?;
            if response.status().as_u16() == 403 {
                // quota or key revocation, cool this key for an hour
                self.pool.ban(cred_id, crate::HOUR_MS).await?;
                return Err(PipelineError::Catalog {
                    catalog: "youtube",
                    message: "api key rejected (403)".into(),
                });
            }
            let body: WireListResponse<T> = response.error_for_status()?.json().await?;
            Ok(body.items)
        };
        fetch
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(is_transient)
            .await
    }
}

#[async_trait]
impl YoutubeCatalog for YoutubeClient {
    async fn videos(&self, ids: &[String]) -> PipelineResult<Vec<Option<YoutubeVideo>>> {
        let items: Vec<WireVideo> = self
            .get_list("videos", "snippet,localizations", ids)
            .await?;
        let videos = items
            .into_iter()
            .map(|v| YoutubeVideo {
                thumbnail: largest_thumb(&v.snippet.thumbnails),
                id: v.id,
                title: v.snippet.title,
                description: v.snippet.description,
                channel_id: v.snippet.channel_id,
                default_language: v.snippet.default_language,
                localizations: v.localizations,
            })
            .collect();
        Ok(zip_by_id(ids, videos, |v| &v.id))
    }

    async fn channels(&self, ids: &[String]) -> PipelineResult<Vec<Option<YoutubeChannel>>> {
        let items: Vec<WireChannel> = self
            .get_list("channels", "snippet,brandingSettings", ids)
            .await?;
        let channels = items
            .into_iter()
            .map(|c| YoutubeChannel {
                avatar: largest_thumb(&c.snippet.thumbnails),
                banner: c
                    .branding_settings
                    .and_then(|b| b.image)
                    .and_then(|i| i.banner_external_url)
                    .map(|url| (url, 0, 0)),
                id: c.id,
                title: c.snippet.title,
                description: c.snippet.description,
                handle: c.snippet.custom_url,
            })
            .collect();
        Ok(zip_by_id(ids, channels, |c| &c.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_by_id_restores_request_order_with_gaps() {
        let ids = vec!["a".to_owned(), "gone".to_owned(), "b".to_owned()];
        let items = vec![("b", 2), ("a", 1)];
        let zipped = zip_by_id(&ids, items, |(id, _)| id);
        assert_eq!(zipped, vec![Some(("a", 1)), None, Some(("b", 2))]);
    }

    #[test]
    fn video_snippet_parses() {
        let json = r#"{"items": [{
            "id": "dQw4w9WgXcQ",
            "snippet": {
                "title": "Video",
                "description": "desc https://example.com",
                "channelId": "UC123",
                "defaultLanguage": "ja",
                "thumbnails": {
                    "default": {"url": "small", "width": 120, "height": 90},
                    "maxres": {"url": "big", "width": 1280, "height": 720}
                }
            },
            "localizations": {"en": {"title": "English", "description": null}}
        }]}"#;
        let body: WireListResponse<WireVideo> = serde_json::from_str(json).unwrap();
        let video = &body.items[0];
        assert_eq!(video.snippet.channel_id, "UC123");
        assert_eq!(largest_thumb(&video.snippet.thumbnails).unwrap().0, "big");
        assert_eq!(
            video.localizations["en"].title.as_deref(),
            Some("English")
        );
    }
}
