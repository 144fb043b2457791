//! `source.download.spotify_preview` — fetch 30-second preview clips.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::queue::{self, PassId, Payload, QueueEntry};
use quaver_core::schema::entities;

use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::util::run_with_concurrency_limit;
use crate::HOUR_MS;

/// Concurrent preview fetches per batch.
const DOWNLOAD_LIMIT: usize = 8;

/// Spotify previews are 96 kbit/s MP3.
pub const PREVIEW_BITRATE: u32 = 96;

#[derive(Debug)]
pub struct SpotifyPreviewPass;

#[async_trait]
impl Pass for SpotifyPreviewPass {
    fn id(&self) -> PassId {
        PassId::SpotifyPreview
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        let cx = Arc::clone(cx);
        run_with_concurrency_limit(batch, DOWNLOAD_LIMIT, move |entry| {
            let cx = Arc::clone(&cx);
            async move { fetch_one(&cx, &entry).await }
        })
        .await
    }
}

async fn fetch_one(cx: &PassContext, entry: &QueueEntry) -> PipelineResult<()> {
    let Payload::SpotifyPreview { track, url } = &entry.payload else {
        return Err(PipelineError::Catalog {
            catalog: "spotify",
            message: format!("unexpected payload for {}", entry.payload.pass()),
        });
    };

    {
        let db = cx.db.lock().await;
        // a source at preview bitrate or better makes this fetch pointless
        if entities::has_preferable_source(db.conn(), *track, PREVIEW_BITRATE)? {
            queue::complete(db.conn(), entry.id)?;
            return Ok(());
        }
    }

    let bytes = match cx.fetcher.fetch(url).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_stop() => return Err(e),
        Err(e) => {
            let db = cx.db.lock().await;
            queue::retry_failed(db.conn(), &cx.journal, entry, HOUR_MS, &e.to_string())?;
            return Ok(());
        }
    };

    let media_ref = cx.store.new_ref(&cx.alloc, "mp3");
    cx.store.write(&media_ref, &bytes)?;

    let mut db = cx.db.lock().await;
    let tx = db.transaction().map_err(quaver_core::Error::from)?;
    entities::insert_source(&tx, &media_ref, *track, PREVIEW_BITRATE)?;
    queue::dispatch_immediate(
        &tx,
        &Payload::Fingerprint {
            track: *track,
            media_ref: media_ref.clone(),
        },
        None,
    )?;
    queue::complete(&tx, entry.id)?;
    tx.commit().map_err(quaver_core::Error::from)?;
    Ok(())
}
