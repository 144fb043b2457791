//! Catalog API clients.
//!
//! Passes never talk to `reqwest` directly: they go through the
//! [`SpotifyCatalog`], [`YoutubeCatalog`], and [`Fetcher`] traits so tests
//! can substitute in-memory fakes.

pub mod spotify;
pub mod youtube;

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;

use crate::error::{PipelineError, PipelineResult};

pub use spotify::{SpotifyAlbum, SpotifyArtist, SpotifyCatalog, SpotifyClient, SpotifyTrack};
pub use youtube::{YoutubeCatalog, YoutubeChannel, YoutubeClient, YoutubeVideo};

pub(crate) const USER_AGENT: &str = "quaver/0.1.0 (https://github.com/oxur/quaver)";

/// Build the shared HTTP client with sane timeouts.
pub fn http_client() -> PipelineResult<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()?)
}

/// Plain byte downloads (images, preview audio).
#[async_trait]
pub trait Fetcher: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>>;
}

/// [`Fetcher`] backed by `reqwest`, retrying transient failures with
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> PipelineResult<Self> {
        Ok(Self {
            http: http_client()?,
        })
    }

    async fn fetch_once(&self, url: &str) -> PipelineResult<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> PipelineResult<Vec<u8>> {
        (|| self.fetch_once(url))
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(is_transient)
            .await
    }
}

/// Server-side hiccups worth retrying; 4xx responses are not.
pub(crate) fn is_transient(err: &PipelineError) -> bool {
    match err {
        PipelineError::Request(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
        }
        _ => false,
    }
}
