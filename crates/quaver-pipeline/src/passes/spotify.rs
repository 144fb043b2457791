//! Spotify catalog normalization passes.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::model::{
    AlbumId, EntityAttrs, EntityKey, ImageKind, LocaleDesc, LocaleEntry, TrackId,
};
use quaver_core::queue::{self, ArtistRef, PassId, Payload, QueueEntry};
use quaver_core::schema::entities::{self, ForeignTable};
use rusqlite::Connection;

use crate::clients::spotify::{
    SpotifyAlbum, SpotifyArtist, SpotifyTrack, ALBUM_BATCH, ARTIST_BATCH, TRACK_BATCH,
};
use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::util::run_batched;
use crate::DAY_MS;

use super::{dispatch_image, foreign_id_mapped};

fn payload_id(entry: &QueueEntry) -> PipelineResult<&str> {
    match &entry.payload {
        Payload::SpotifyTrack { id }
        | Payload::SpotifyAlbum { id }
        | Payload::SpotifyArtist { id } => Ok(id),
        other => Err(PipelineError::Catalog {
            catalog: "spotify",
            message: format!("unexpected payload for {}", other.pass()),
        }),
    }
}

fn expect_zipped<T>(entries: &[QueueEntry], results: &[T]) -> PipelineResult<()> {
    if entries.len() == results.len() {
        Ok(())
    } else {
        Err(PipelineError::Catalog {
            catalog: "spotify",
            message: format!(
                "asked for {} ids, got {} results",
                entries.len(),
                results.len()
            ),
        })
    }
}

/// `track.new.spotify_track` — normalize one catalog track into the
/// entity graph and fan out album, artist, attribution, and preview work.
#[derive(Debug)]
pub struct SpotifyTrackPass;

#[async_trait]
impl Pass for SpotifyTrackPass {
    fn id(&self) -> PassId {
        PassId::SpotifyTrack
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        run_batched(batch, TRACK_BATCH, |entries| async move {
            let ids: Vec<String> = entries
                .iter()
                .map(|e| payload_id(e).map(str::to_owned))
                .collect::<PipelineResult<_>>()?;
            let tracks = cx.spotify.tracks(&ids).await?;
            expect_zipped(&entries, &tracks)?;

            let mut db = cx.db.lock().await;
            for (entry, track) in entries.iter().zip(tracks) {
                match track {
                    None => queue::retry_failed(
                        db.conn(),
                        &cx.journal,
                        entry,
                        DAY_MS,
                        "track not found",
                    )?,
                    Some(track) => {
                        let tx = db.transaction().map_err(quaver_core::Error::from)?;
                        ingest_track(&tx, cx, entry, &track)?;
                        tx.commit().map_err(quaver_core::Error::from)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

fn ingest_track(
    conn: &Connection,
    cx: &PassContext,
    entry: &QueueEntry,
    track: &SpotifyTrack,
) -> PipelineResult<()> {
    let known_id = payload_id(entry)?;
    let (ident, key) = entities::get_or_create(
        conn,
        &cx.alloc,
        ForeignTable::SpotifyTrack,
        known_id,
        entry.preferred_time,
        &EntityAttrs::isrc(track.isrc.clone()),
    )?;
    let track_id = TrackId::from_key(key);

    entities::locale_insert(
        conn,
        &[LocaleEntry {
            ident,
            locale: None,
            preferred: true,
            desc: LocaleDesc::Name,
            text: track.name.clone(),
        }],
    )?;

    if !foreign_id_mapped(conn, ForeignTable::SpotifyAlbum, &track.album_id)? {
        queue::dispatch_immediate(
            conn,
            &Payload::SpotifyAlbum {
                id: track.album_id.clone(),
            },
            entry.preferred_time,
        )?;
    }
    for artist_id in &track.artist_ids {
        queue::dispatch_immediate(
            conn,
            &Payload::SpotifyArtist {
                id: artist_id.clone(),
            },
            entry.preferred_time,
        )?;
    }
    queue::dispatch_immediate(
        conn,
        &Payload::AssignTrackArtist {
            track: track_id,
            artists: track.artist_ids.iter().map(ArtistRef::spotify).collect(),
        },
        None,
    )?;

    entities::insert_canonical(
        conn,
        ForeignTable::SpotifyTrack,
        &track.id,
        known_id,
        key,
        track.preview_url.as_deref(),
    )?;

    if let Some(url) = &track.preview_url {
        queue::dispatch_immediate(
            conn,
            &Payload::SpotifyPreview {
                track: track_id,
                url: url.clone(),
            },
            None,
        )?;
    }

    queue::complete(conn, entry.id)?;
    Ok(())
}

/// `album.new.spotify_album` — normalize an album, page through its full
/// track list, and fan out track and placement work.
#[derive(Debug)]
pub struct SpotifyAlbumPass;

#[async_trait]
impl Pass for SpotifyAlbumPass {
    fn id(&self) -> PassId {
        PassId::SpotifyAlbum
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        run_batched(batch, ALBUM_BATCH, |entries| async move {
            let ids: Vec<String> = entries
                .iter()
                .map(|e| payload_id(e).map(str::to_owned))
                .collect::<PipelineResult<_>>()?;
            let albums = cx.spotify.albums(&ids).await?;
            expect_zipped(&entries, &albums)?;

            for (entry, album) in entries.iter().zip(albums) {
                let Some(mut album) = album else {
                    let db = cx.db.lock().await;
                    queue::retry_failed(db.conn(), &cx.journal, entry, DAY_MS, "album not found")?;
                    continue;
                };

                // the album response carries the first 50 tracks; page in
                // the rest before touching the database
                while album.track_ids.len() < album.total_tracks {
                    let page = cx
                        .spotify
                        .album_tracks(&album.id, album.track_ids.len())
                        .await?;
                    if page.is_empty() {
                        break;
                    }
                    log::debug!(
                        "album {}: fetched {} tracks ({} / {})",
                        album.id,
                        page.len(),
                        album.track_ids.len() + page.len(),
                        album.total_tracks
                    );
                    album.track_ids.extend(page);
                }

                let mut db = cx.db.lock().await;
                let tx = db.transaction().map_err(quaver_core::Error::from)?;
                ingest_album(&tx, cx, entry, &album)?;
                tx.commit().map_err(quaver_core::Error::from)?;
            }
            Ok(())
        })
        .await
    }
}

fn ingest_album(
    conn: &Connection,
    cx: &PassContext,
    entry: &QueueEntry,
    album: &SpotifyAlbum,
) -> PipelineResult<()> {
    let known_id = payload_id(entry)?;
    let (ident, key) = entities::get_or_create(
        conn,
        &cx.alloc,
        ForeignTable::SpotifyAlbum,
        known_id,
        entry.preferred_time,
        &EntityAttrs::default(),
    )?;
    let album_id = AlbumId::from_key(key);

    for track_id in &album.track_ids {
        if !foreign_id_mapped(conn, ForeignTable::SpotifyTrack, track_id)? {
            queue::dispatch_immediate(
                conn,
                &Payload::SpotifyTrack {
                    id: track_id.clone(),
                },
                entry.preferred_time,
            )?;
        }
    }
    queue::dispatch_immediate(
        conn,
        &Payload::AssignAlbumTrack {
            album: album_id,
            tracks: album.track_ids.clone(),
        },
        None,
    )?;

    for artist_id in &album.artist_ids {
        if !foreign_id_mapped(conn, ForeignTable::SpotifyArtist, artist_id)? {
            queue::dispatch_immediate(
                conn,
                &Payload::SpotifyArtist {
                    id: artist_id.clone(),
                },
                entry.preferred_time,
            )?;
        }
    }

    entities::locale_insert(
        conn,
        &[LocaleEntry {
            ident: ident.clone(),
            locale: None,
            preferred: true,
            desc: LocaleDesc::Name,
            text: album.name.clone(),
        }],
    )?;

    if let Some((url, width, height)) = &album.cover_art {
        dispatch_image(conn, &ident, ImageKind::CoverArt, url, *width, *height, true)?;
    }

    entities::insert_canonical(conn, ForeignTable::SpotifyAlbum, &album.id, known_id, key, None)?;
    queue::complete(conn, entry.id)?;
    Ok(())
}

/// `artist.new.spotify_artist` — normalize an artist. The entry is pushed
/// back a day instead of completed, so artist metadata refreshes on
/// long-running deployments.
#[derive(Debug)]
pub struct SpotifyArtistPass;

#[async_trait]
impl Pass for SpotifyArtistPass {
    fn id(&self) -> PassId {
        PassId::SpotifyArtist
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        run_batched(batch, ARTIST_BATCH, |entries| async move {
            let ids: Vec<String> = entries
                .iter()
                .map(|e| payload_id(e).map(str::to_owned))
                .collect::<PipelineResult<_>>()?;
            let artists = cx.spotify.artists(&ids).await?;
            expect_zipped(&entries, &artists)?;

            let mut db = cx.db.lock().await;
            for (entry, artist) in entries.iter().zip(artists) {
                match artist {
                    None => queue::retry_failed(
                        db.conn(),
                        &cx.journal,
                        entry,
                        DAY_MS,
                        "artist not found",
                    )?,
                    Some(artist) => {
                        let tx = db.transaction().map_err(quaver_core::Error::from)?;
                        ingest_artist(&tx, cx, entry, &artist)?;
                        tx.commit().map_err(quaver_core::Error::from)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

fn ingest_artist(
    conn: &Connection,
    cx: &PassContext,
    entry: &QueueEntry,
    artist: &SpotifyArtist,
) -> PipelineResult<()> {
    let known_id = payload_id(entry)?;
    let (ident, key) = entities::get_or_create(
        conn,
        &cx.alloc,
        ForeignTable::SpotifyArtist,
        known_id,
        entry.preferred_time,
        &EntityAttrs::default(),
    )?;

    entities::locale_insert(
        conn,
        &[LocaleEntry {
            ident: ident.clone(),
            locale: None,
            preferred: true,
            desc: LocaleDesc::Name,
            text: artist.name.clone(),
        }],
    )?;

    if let Some((url, width, height)) = &artist.profile_art {
        dispatch_image(conn, &ident, ImageKind::ProfileArt, url, *width, *height, true)?;
    }

    entities::insert_canonical(conn, ForeignTable::SpotifyArtist, &artist.id, known_id, key, None)?;

    // refresh tomorrow rather than complete; the artist bucket still
    // settles because the entry is no longer ready
    queue::retry_later(conn, entry.id, DAY_MS)?;
    Ok(())
}
