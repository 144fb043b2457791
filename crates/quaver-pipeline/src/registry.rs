//! The pass trait and the fixed registry.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::model::ArticleKind;
use quaver_core::queue::{PassId, QueueEntry};

use crate::context::PassContext;
use crate::error::PipelineResult;
use crate::passes;

/// One unit of pipeline behavior, keyed by its [`PassId`].
///
/// The driver pops every ready entry for the pass and hands the batch over;
/// the pass is responsible for completing, retrying, or failing each entry.
/// An `Err` return aborts the whole run (use queue retries for per-entry
/// failures), except [`crate::PipelineError::Stop`] which ends it cleanly.
#[async_trait]
pub trait Pass: Send + Sync {
    fn id(&self) -> PassId;

    /// If set, the pass only runs while this article-kind bucket has no
    /// ready entries — it consumes what the bucket's passes produce.
    fn settled_on(&self) -> Option<ArticleKind> {
        None
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()>;
}

/// The registry, in sweep order. Producers before consumers so a trip
/// tends to finish fan-out work it started.
#[must_use]
pub fn registry() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(passes::spotify::SpotifyTrackPass),
        Box::new(passes::spotify::SpotifyAlbumPass),
        Box::new(passes::spotify::SpotifyArtistPass),
        Box::new(passes::youtube::YoutubeVideoPass),
        Box::new(passes::youtube::YoutubeChannelPass),
        Box::new(passes::assign::AssignTrackArtistPass),
        Box::new(passes::assign::AssignAlbumTrackPass),
        Box::new(passes::image::ImageUrlPass),
        Box::new(passes::download::SpotifyPreviewPass),
        Box::new(passes::fingerprint::FingerprintPass),
    ]
}
