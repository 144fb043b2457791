//! Shared state handed to every pass.

use std::sync::Arc;

use quaver_core::journal::Journal;
use quaver_core::schema::Database;
use quaver_core::snowflake::SnowflakeGen;
use quaver_core::store::MediaStore;
use tokio::sync::Mutex;

use crate::clients::{Fetcher, HttpFetcher, SpotifyCatalog, SpotifyClient, YoutubeCatalog, YoutubeClient};
use crate::config::Config;
use crate::cred::{CredPool, CredRing};
use crate::error::PipelineResult;

/// Everything a pass can touch. One per run, shared by `Arc`.
///
/// The database sits behind an async mutex because SQLite has one writer;
/// passes hold the lock for a transaction at a time and do their network
/// and decode work outside it.
#[derive(Debug)]
pub struct PassContext {
    pub db: Arc<Mutex<Database>>,
    pub journal: Journal,
    pub store: MediaStore,
    pub alloc: SnowflakeGen,
    pub spotify: Arc<dyn SpotifyCatalog>,
    pub youtube: Arc<dyn YoutubeCatalog>,
    pub fetcher: Arc<dyn Fetcher>,
}

impl PassContext {
    /// Wire up the full production context from config: database, media
    /// store, journal, HTTP clients, credential ring and pool.
    pub async fn from_config(config: &Config) -> PipelineResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Arc::new(Mutex::new(Database::open(config.database_path())?));
        let journal = Journal::open(&config.data_dir)?;
        let store = MediaStore::open(&config.data_dir)?;

        let http = crate::clients::http_client()?;
        let ring = CredRing::load(&config.spotify_creds_path())?;
        let spotify = SpotifyClient::new(http.clone(), ring);

        let pool = CredPool::new(Arc::clone(&db), "youtube_api_key");
        pool.seed_from_file(&config.youtube_keys_path()).await?;
        let youtube = YoutubeClient::new(http, pool);

        Ok(Self {
            db,
            journal,
            store,
            alloc: SnowflakeGen::new(),
            spotify,
            youtube,
            fetcher: Arc::new(HttpFetcher::new()?),
        })
    }
}
