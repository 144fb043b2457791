//! `image.download.image_url` — fetch catalog images into the media store.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::queue::{self, PassId, Payload, QueueEntry};
use quaver_core::schema::entities;

use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::util::run_with_concurrency_limit;
use crate::HOUR_MS;

/// Concurrent image fetches per batch.
const DOWNLOAD_LIMIT: usize = 4;

/// File extension from a URL path, falling back to `jpg` (catalog CDNs
/// mostly serve extensionless JPEG urls).
fn ext_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty() && ext.len() <= 4 && ext.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => "jpg",
    }
}

#[derive(Debug)]
pub struct ImageUrlPass;

#[async_trait]
impl Pass for ImageUrlPass {
    fn id(&self) -> PassId {
        PassId::ImageUrl
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
    let Payload::ImageUrl {
        ident,
        kind,
        url,
        width,
        height,
        preferred,
    } = &entry.payload
    else {
        return Err(PipelineError::Catalog {
            catalog: "image",
            message: format!("unexpected payload for {}", entry.payload.pass()),
        });
    };

    {
        let db = cx.db.lock().await;
        if entities::image_exists(db.conn(), url)? {
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

    let media_ref = cx.store.new_ref(&cx.alloc, ext_of(url));
    cx.store.write(&media_ref, &bytes)?;

    let db = cx.db.lock().await;
    entities::insert_image(
        db.conn(),
        &media_ref,
        ident,
        *kind,
        *preferred,
        *width,
        *height,
        Some(url),
    )?;
    queue::complete(db.conn(), entry.id)?;
    Ok(())
}
