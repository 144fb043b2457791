//! `source.classify.fingerprint` — fingerprint downloaded previews.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::queue::{self, PassId, Payload, QueueEntry};
use quaver_core::schema::entities;

use crate::audio::fingerprint_media;
use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::util::run_with_concurrency_limit;
use crate::HOUR_MS;

/// Concurrent decodes per batch. Decoding is CPU-bound and runs on the
/// blocking pool, so this caps pool pressure rather than I/O.
const DECODE_LIMIT: usize = 4;

/// Clips shorter than this never produce a fingerprint worth matching on.
const MIN_DURATION_S: f64 = 25.0;

/// Minimum distinct fingerprint items; silence and drones fall below it
/// and would cross-match everything.
const MIN_UNIQUE_ITEMS: usize = 80;

#[derive(Debug)]
pub struct FingerprintPass;

#[async_trait]
impl Pass for FingerprintPass {
    fn id(&self) -> PassId {
        PassId::Fingerprint
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        let cx = Arc::clone(cx);
        run_with_concurrency_limit(batch, DECODE_LIMIT, move |entry| {
            let cx = Arc::clone(&cx);
            async move { fingerprint_one(&cx, &entry).await }
        })
        .await
    }
}

async fn fingerprint_one(cx: &PassContext, entry: &QueueEntry) -> PipelineResult<()> {
    // the track id rides along for operators reading the queue; the work
    // itself keys on the ref
    let Payload::Fingerprint { track: _, media_ref } = &entry.payload else {
        return Err(PipelineError::Catalog {
            catalog: "fingerprint",
            message: format!("unexpected payload for {}", entry.payload.pass()),
        });
    };

    if !cx.store.exists_nonempty(media_ref)? {
        let db = cx.db.lock().await;
        queue::retry_failed(
            db.conn(),
            &cx.journal,
            entry,
            HOUR_MS,
            &format!("media {media_ref} is missing or empty"),
        )?;
        return Ok(());
    }

    let bytes = cx.store.read(media_ref)?;
    let ext = media_ref.rsplit('.').next().unwrap_or("").to_owned();
    let decoded = tokio::task::spawn_blocking(move || fingerprint_media(bytes, &ext)).await?;

    let fp = match decoded {
        Ok(fp) => fp,
        Err(e) => {
            let db = cx.db.lock().await;
            queue::retry_failed(db.conn(), &cx.journal, entry, HOUR_MS, &e.to_string())?;
            return Ok(());
        }
    };

    let db = cx.db.lock().await;
    // too short or too uniform to ever match safely; done, but store nothing
    if fp.duration_s < MIN_DURATION_S {
        log::debug!("{media_ref}: clip too short ({:.1}s), skipping", fp.duration_s);
        queue::complete(db.conn(), entry.id)?;
        return Ok(());
    }
    if fp.unique_items() < MIN_UNIQUE_ITEMS {
        log::debug!(
            "{media_ref}: low diversity ({} unique items), skipping",
            fp.unique_items()
        );
        queue::complete(db.conn(), entry.id)?;
        return Ok(());
    }

    entities::set_source_fingerprint(db.conn(), media_ref, &fp.to_bytes(), fp.duration_s)?;
    queue::complete(db.conn(), entry.id)?;
    Ok(())
}
