//! Relation assignment passes.
//!
//! Attribution entries are queued alongside the catalog fan-out, but the
//! mapping rows they resolve through may not exist yet. Both passes are
//! gated on the producing bucket settling, and push individual entries
//! back when a mapping is still missing (a channel that never resolves,
//! for instance, keeps its entry parked rather than failing the run).

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::model::{ArticleKind, ArtistId, EntityKey, TrackId};
use quaver_core::queue::{self, PassId, Payload, QueueEntry};
use quaver_core::schema::entities::{self, ForeignTable};
use rusqlite::Connection;

use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::HOUR_MS;

/// Outcome of resolving every foreign id an entry references.
enum Resolved<T> {
    All(Vec<T>),
    Missing(String),
}

fn resolve_keys<T, I>(
    conn: &Connection,
    refs: I,
    make: impl Fn(i64) -> T,
) -> PipelineResult<Resolved<T>>
where
    I: Iterator<Item = (ForeignTable, String)>,
{
    let mut keys = Vec::new();
    for (table, foreign_id) in refs {
        match entities::get_ident(conn, table, &foreign_id) {
            Ok((_, key)) => keys.push(make(key)),
            Err(quaver_core::Error::Unmapped { .. }) => {
                return Ok(Resolved::Missing(format!(
                    "{} {foreign_id}",
                    table.table()
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Resolved::All(keys))
}

/// `aux.assign_track_artist` — attach artists to a track once the artist
/// passes have produced the mapping rows.
#[derive(Debug)]
pub struct AssignTrackArtistPass;

#[async_trait]
impl Pass for AssignTrackArtistPass {
    fn id(&self) -> PassId {
        PassId::AssignTrackArtist
    }

    fn settled_on(&self) -> Option<ArticleKind> {
        Some(ArticleKind::Artist)
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        let mut db = cx.db.lock().await;
        let tx = db.transaction().map_err(quaver_core::Error::from)?;
        for entry in &batch {
            let Payload::AssignTrackArtist { track, artists } = &entry.payload else {
                return Err(PipelineError::Catalog {
                    catalog: "assign",
                    message: format!("unexpected payload for {}", entry.payload.pass()),
                });
            };
            let refs = artists.iter().map(|a| (a.table(), a.id.clone()));
            match resolve_keys(&tx, refs, ArtistId::from_key)? {
                Resolved::All(artist_ids) => {
                    entities::insert_track_artist(&tx, *track, &artist_ids)?;
                    queue::complete(&tx, entry.id)?;
                }
                Resolved::Missing(what) => {
                    log::debug!("assign_track_artist: {what} not mapped yet");
                    queue::retry_later(&tx, entry.id, HOUR_MS)?;
                }
            }
        }
        tx.commit().map_err(quaver_core::Error::from)?;
        Ok(())
    }
}

/// `aux.assign_album_track` — place tracks on an album once the track
/// passes have produced the mapping rows.
#[derive(Debug)]
pub struct AssignAlbumTrackPass;

#[async_trait]
impl Pass for AssignAlbumTrackPass {
    fn id(&self) -> PassId {
        PassId::AssignAlbumTrack
    }

    fn settled_on(&self) -> Option<ArticleKind> {
        Some(ArticleKind::Track)
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        let mut db = cx.db.lock().await;
        let tx = db.transaction().map_err(quaver_core::Error::from)?;
        for entry in &batch {
            let Payload::AssignAlbumTrack { album, tracks } = &entry.payload else {
                return Err(PipelineError::Catalog {
                    catalog: "assign",
                    message: format!("unexpected payload for {}", entry.payload.pass()),
                });
            };
            let refs = tracks
                .iter()
                .map(|id| (ForeignTable::SpotifyTrack, id.clone()));
            match resolve_keys(&tx, refs, TrackId::from_key)? {
                Resolved::All(track_ids) => {
                    entities::insert_album_track(&tx, *album, &track_ids)?;
                    queue::complete(&tx, entry.id)?;
                }
                Resolved::Missing(what) => {
                    log::debug!("assign_album_track: {what} not mapped yet");
                    queue::retry_later(&tx, entry.id, HOUR_MS)?;
                }
            }
        }
        tx.commit().map_err(quaver_core::Error::from)?;
        Ok(())
    }
}
