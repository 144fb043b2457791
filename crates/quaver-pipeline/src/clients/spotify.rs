//! Spotify Web API client (client-credentials flow).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cred::CredRing;
use crate::error::{PipelineError, PipelineResult};

use super::is_transient;

/// A track as the passes consume it, flattened from the API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyTrack {
    pub id: String,
    pub name: String,
    pub isrc: Option<String>,
    pub preview_url: Option<String>,
    pub album_id: String,
    pub artist_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyAlbum {
    pub id: String,
    pub name: String,
    pub artist_ids: Vec<String>,
    pub track_ids: Vec<String>,
    pub total_tracks: usize,
    /// Widest cover art, if any: (url, width, height).
    pub cover_art: Option<(String, u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpotifyArtist {
    pub id: String,
    pub name: String,
    pub profile_art: Option<(String, u32, u32)>,
}

/// Catalog lookups the Spotify passes need. Batched endpoints return one
/// slot per requested id, `None` where the catalog has no such id.
#[async_trait]
pub trait SpotifyCatalog: Send + Sync + std::fmt::Debug {
    async fn tracks(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyTrack>>>;
    async fn albums(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyAlbum>>>;
    async fn artists(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyArtist>>>;
    /// One page of an album's tracks, 50 per page.
    async fn album_tracks(&self, id: &str, offset: usize) -> PipelineResult<Vec<String>>;
}

/// The documentation says 100 ids per request; the API disagrees. 50 works.
pub const TRACK_BATCH: usize = 50;
pub const ARTIST_BATCH: usize = 50;
pub const ALBUM_BATCH: usize = 20;

// --- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct WireImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WireExternalIds {
    isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    id: String,
    name: String,
    preview_url: Option<String>,
    #[serde(default)]
    external_ids: Option<WireExternalIds>,
    album: WireRef,
    artists: Vec<WireRef>,
}

#[derive(Debug, Deserialize)]
struct WireTracksEnvelope {
    tracks: Vec<Option<WireTrack>>,
}

#[derive(Debug, Deserialize)]
struct WirePage {
    items: Vec<WireRef>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct WireAlbum {
    id: String,
    name: String,
    total_tracks: usize,
    artists: Vec<WireRef>,
    images: Vec<WireImage>,
    tracks: WirePage,
}

#[derive(Debug, Deserialize)]
struct WireAlbumsEnvelope {
    albums: Vec<Option<WireAlbum>>,
}

#[derive(Debug, Deserialize)]
struct WireArtist {
    id: String,
    name: String,
    #[serde(default)]
    images: Vec<WireImage>,
}

#[derive(Debug, Deserialize)]
struct WireArtistsEnvelope {
    artists: Vec<Option<WireArtist>>,
}

fn widest_image(images: &[WireImage]) -> Option<(String, u32, u32)> {
    // the API lists cover art widest first, but don't rely on it
    images
        .iter()
        .max_by_key(|i| u64::from(i.width.unwrap_or(0)) * u64::from(i.height.unwrap_or(0)))
        .map(|i| (i.url.clone(), i.width.unwrap_or(0), i.height.unwrap_or(0)))
}

// --- client ----------------------------------------------------------------

/// API credential pair, one entry of the credential ring file.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct SpotifyApiCred {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    good_until: Instant,
}

/// [`SpotifyCatalog`] over the real Web API.
///
/// Tokens come from the client-credentials flow, rotating through the
/// credential ring; a credential that fails to authenticate is cooled down
/// and the next one is tried.
#[derive(Debug)]
pub struct SpotifyClient {
    http: Client,
    ring: CredRing<SpotifyApiCred>,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(http: Client, ring: CredRing<SpotifyApiCred>) -> Arc<Self> {
        Arc::new(Self {
            http,
            ring,
            token: Mutex::new(None),
        })
    }

    async fn bearer(&self) -> PipelineResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.good_until > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        // one attempt per ring entry before giving up on the run
        for _ in 0..self.ring.len() {
            let (slot, cred) = match self.ring.roll() {
                Some(entry) => entry,
                None => break,
            };
            let response = self
                .http
                .post("https://accounts.spotify.com/api/token")
                .basic_auth(&cred.client_id, Some(&cred.client_secret))
                .form(&[("grant_type", "client_credentials")])
                .send()
                .await?;

            if response.status().is_client_error() {
                log::warn!("spotify: credential {} rejected, cooling down", cred.client_id);
                self.ring.ban(slot, Duration::from_secs(10 * 60));
                continue;
            }

            let token: TokenResponse = response.error_for_status()?.json().await?;
            let good_until =
                Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
            let access_token = token.access_token.clone();
            *cached = Some(CachedToken {
                access_token: token.access_token,
                good_until,
            });
            return Ok(access_token);
        }

        Err(PipelineError::Stop(
            "no usable spotify api credential".into(),
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        let fetch = || async {
            let bearer = self.bearer().await?;
            let response = self
                .http
                .get(url)
                .bearer_auth(bearer)
                .send()
                .await?
                .error_for_status()?;
            Ok(response.json::<T>().await?)
        };
        fetch
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(is_transient)
            .await
    }
}

#[async_trait]
impl SpotifyCatalog for SpotifyClient {
    async fn tracks(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyTrack>>> {
        let url = format!("https://api.spotify.com/v1/tracks?ids={}", ids.join(","));
        let envelope: WireTracksEnvelope = self.get_json(&url).await?;
        Ok(envelope
            .tracks
            .into_iter()
            .map(|t| {
                t.map(|t| SpotifyTrack {
                    id: t.id,
                    name: t.name,
                    isrc: t.external_ids.and_then(|e| e.isrc),
                    preview_url: t.preview_url,
                    album_id: t.album.id,
                    artist_ids: t.artists.into_iter().map(|a| a.id).collect(),
                })
            })
            .collect())
    }

    async fn albums(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyAlbum>>> {
        let url = format!("https://api.spotify.com/v1/albums?ids={}", ids.join(","));
        let envelope: WireAlbumsEnvelope = self.get_json(&url).await?;
        Ok(envelope
            .albums
            .into_iter()
            .map(|a| {
                a.map(|a| SpotifyAlbum {
                    id: a.id,
                    name: a.name,
                    artist_ids: a.artists.into_iter().map(|r| r.id).collect(),
                    track_ids: a.tracks.items.into_iter().map(|r| r.id).collect(),
                    total_tracks: a.total_tracks.max(a.tracks.total),
                    cover_art: widest_image(&a.images),
                })
            })
            .collect())
    }

    async fn artists(&self, ids: &[String]) -> PipelineResult<Vec<Option<SpotifyArtist>>> {
        let url = format!("https://api.spotify.com/v1/artists?ids={}", ids.join(","));
        let envelope: WireArtistsEnvelope = self.get_json(&url).await?;
        Ok(envelope
            .artists
            .into_iter()
            .map(|a| {
                a.map(|a| SpotifyArtist {
                    id: a.id,
                    name: a.name,
                    profile_art: widest_image(&a.images),
                })
            })
            .collect())
    }

    async fn album_tracks(&self, id: &str, offset: usize) -> PipelineResult<Vec<String>> {
        let url = format!(
            "https://api.spotify.com/v1/albums/{id}/tracks?limit=50&offset={offset}"
        );
        let page: WirePage = self.get_json(&url).await?;
        Ok(page.items.into_iter().map(|r| r.id).collect())
    }
}
