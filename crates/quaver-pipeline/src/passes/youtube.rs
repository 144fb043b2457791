//! YouTube ingestion passes.
//!
//! Videos map to tracks and channels to artists. YouTube carries localized
//! metadata, so these passes fan the localization map out into locale rows;
//! video titles are inserted non-preferred because the Spotify name, when
//! one exists, is the cleaner display title.

use std::sync::Arc;

use async_trait::async_trait;
use quaver_core::model::{
    EntityAttrs, EntityKey, Ident, ImageKind, Locale, LocaleDesc, LocaleEntry, TrackId,
};
use quaver_core::queue::{self, ArtistRef, PassId, Payload, QueueEntry};
use quaver_core::schema::entities::{self, ForeignTable};
use rusqlite::Connection;

use crate::clients::youtube::{YoutubeChannel, YoutubeVideo, CHANNEL_BATCH, VIDEO_BATCH};
use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::Pass;
use crate::util::run_batched;
use crate::DAY_MS;

use super::{dispatch_image, foreign_id_mapped, links_from_text};

fn payload_id(entry: &QueueEntry) -> PipelineResult<&str> {
    match &entry.payload {
        Payload::YoutubeVideo { id } | Payload::YoutubeChannel { id } => Ok(id),
        other => Err(PipelineError::Catalog {
            catalog: "youtube",
            message: format!("unexpected payload for {}", other.pass()),
        }),
    }
}

/// Build locale rows out of the default title/description plus the
/// localization map. Names are never preferred; descriptions are.
fn locale_rows(
    ident: &Ident,
    default_language: Option<&str>,
    title: &str,
    description: &str,
    localizations: impl Iterator<Item = (String, Option<String>, Option<String>)>,
) -> Vec<LocaleEntry> {
    let default_locale = default_language.and_then(Locale::from_bcp47);
    let mut rows = vec![LocaleEntry {
        ident: ident.clone(),
        locale: default_locale.clone(),
        preferred: false,
        desc: LocaleDesc::Name,
        text: title.to_owned(),
    }];
    if !description.is_empty() {
        rows.push(LocaleEntry {
            ident: ident.clone(),
            locale: default_locale,
            preferred: true,
            desc: LocaleDesc::Description,
            text: description.to_owned(),
        });
    }

    for (tag, loc_title, loc_description) in localizations {
        let Some(locale) = Locale::from_bcp47(&tag) else {
            continue;
        };
        if let Some(text) = loc_title.filter(|t| !t.is_empty()) {
            rows.push(LocaleEntry {
                ident: ident.clone(),
                locale: Some(locale.clone()),
                preferred: false,
                desc: LocaleDesc::Name,
                text,
            });
        }
        if let Some(text) = loc_description.filter(|d| !d.is_empty()) {
            rows.push(LocaleEntry {
                ident: ident.clone(),
                locale: Some(locale),
                preferred: true,
                desc: LocaleDesc::Description,
                text,
            });
        }
    }
    rows
}

/// `track.new.youtube_video` — normalize one video into a track, harvest
/// description links, and attribute it to its channel.
#[derive(Debug)]
pub struct YoutubeVideoPass;

#[async_trait]
impl Pass for YoutubeVideoPass {
    fn id(&self) -> PassId {
        PassId::YoutubeVideo
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        run_batched(batch, VIDEO_BATCH, |entries| async move {
            let ids: Vec<String> = entries
                .iter()
                .map(|e| payload_id(e).map(str::to_owned))
                .collect::<PipelineResult<_>>()?;
            let videos = cx.youtube.videos(&ids).await?;

            let mut db = cx.db.lock().await;
            for (entry, video) in entries.iter().zip(videos) {
                match video {
                    None => queue::retry_failed(
                        db.conn(),
                        &cx.journal,
                        entry,
                        DAY_MS,
                        "video not found",
                    )?,
                    Some(video) => {
                        let tx = db.transaction().map_err(quaver_core::Error::from)?;
                        ingest_video(&tx, cx, entry, &video)?;
                        tx.commit().map_err(quaver_core::Error::from)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

fn ingest_video(
    conn: &Connection,
    cx: &PassContext,
    entry: &QueueEntry,
    video: &YoutubeVideo,
) -> PipelineResult<()> {
    let known_id = payload_id(entry)?;
    let (ident, key) = entities::get_or_create(
        conn,
        &cx.alloc,
        ForeignTable::YoutubeVideo,
        known_id,
        entry.preferred_time,
        &EntityAttrs::default(),
    )?;
    let track_id = TrackId::from_key(key);

    entities::locale_insert(
        conn,
        &locale_rows(
            &ident,
            video.default_language.as_deref(),
            &video.title,
            &video.description,
            video
                .localizations
                .iter()
                .map(|(tag, loc)| (tag.clone(), loc.title.clone(), loc.description.clone())),
        ),
    )?;
    entities::link_insert(conn, &links_from_text(&ident, &video.description))?;

    if let Some((url, width, height)) = &video.thumbnail {
        dispatch_image(
            conn,
            &ident,
            ImageKind::YtThumbnail,
            url,
            *width,
            *height,
            false,
        )?;
    }

    if !foreign_id_mapped(conn, ForeignTable::YoutubeChannel, &video.channel_id)? {
        queue::dispatch_immediate(
            conn,
            &Payload::YoutubeChannel {
                id: video.channel_id.clone(),
            },
            entry.preferred_time,
        )?;
    }
    queue::dispatch_immediate(
        conn,
        &Payload::AssignTrackArtist {
            track: track_id,
            artists: vec![ArtistRef::youtube(&video.channel_id)],
        },
        None,
    )?;

    entities::insert_canonical(
        conn,
        ForeignTable::YoutubeVideo,
        &video.id,
        known_id,
        key,
        Some(video.channel_id.as_str()),
    )?;
    queue::complete(conn, entry.id)?;
    Ok(())
}

/// `artist.new.youtube_channel` — normalize a channel into an artist with
/// its avatar, banner, handle, and description links.
#[derive(Debug)]
pub struct YoutubeChannelPass;

#[async_trait]
impl Pass for YoutubeChannelPass {
    fn id(&self) -> PassId {
        PassId::YoutubeChannel
    }

    async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
        run_batched(batch, CHANNEL_BATCH, |entries| async move {
            let ids: Vec<String> = entries
                .iter()
                .map(|e| payload_id(e).map(str::to_owned))
                .collect::<PipelineResult<_>>()?;
            let channels = cx.youtube.channels(&ids).await?;

            let mut db = cx.db.lock().await;
            for (entry, channel) in entries.iter().zip(channels) {
                match channel {
                    None => queue::retry_failed(
                        db.conn(),
                        &cx.journal,
                        entry,
                        DAY_MS,
                        "channel not found",
                    )?,
                    Some(channel) => {
                        let tx = db.transaction().map_err(quaver_core::Error::from)?;
                        ingest_channel(&tx, cx, entry, &channel)?;
                        tx.commit().map_err(quaver_core::Error::from)?;
                    }
                }
            }
            Ok(())
        })
        .await
    }
}

fn ingest_channel(
    conn: &Connection,
    cx: &PassContext,
    entry: &QueueEntry,
    channel: &YoutubeChannel,
) -> PipelineResult<()> {
    let known_id = payload_id(entry)?;
    let (ident, key) = entities::get_or_create(
        conn,
        &cx.alloc,
        ForeignTable::YoutubeChannel,
        known_id,
        entry.preferred_time,
        &EntityAttrs::default(),
    )?;

    entities::locale_insert(
        conn,
        &locale_rows(
            &ident,
            None,
            &channel.title,
            &channel.description,
            std::iter::empty(),
        ),
    )?;
    entities::link_insert(conn, &links_from_text(&ident, &channel.description))?;

    if let Some((url, width, height)) = &channel.avatar {
        dispatch_image(
            conn,
            &ident,
            ImageKind::ProfileArt,
            url,
            *width,
            *height,
            false,
        )?;
    }
    if let Some((url, width, height)) = &channel.banner {
        dispatch_image(
            conn,
            &ident,
            ImageKind::YtBanner,
            url,
            *width,
            *height,
            true,
        )?;
    }

    entities::insert_canonical(
        conn,
        ForeignTable::YoutubeChannel,
        &channel.id,
        known_id,
        key,
        channel.handle.as_deref(),
    )?;
    queue::complete(conn, entry.id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quaver_core::model::ArticleKind;

    fn ident() -> Ident {
        Ident::new(ArticleKind::Track, 7).unwrap()
    }

    #[test]
    fn default_text_lands_under_default_language() {
        let rows = locale_rows(&ident(), Some("ja-JP"), "タイトル", "説明", std::iter::empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].locale.as_ref().map(Locale::as_str), Some("ja"));
        assert!(!rows[0].preferred);
        assert_eq!(rows[1].desc, LocaleDesc::Description);
        assert!(rows[1].preferred);
    }

    #[test]
    fn localizations_become_extra_rows() {
        let locs = vec![(
            "en-US".to_owned(),
            Some("Title".to_owned()),
            None,
        )];
        let rows = locale_rows(&ident(), None, "default", "", locs.into_iter());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].locale, None);
        assert_eq!(rows[1].locale.as_ref().map(Locale::as_str), Some("en"));
        assert_eq!(rows[1].text, "Title");
    }

    #[test]
    fn empty_localized_text_is_skipped() {
        let locs = vec![("en".to_owned(), Some(String::new()), Some(String::new()))];
        let rows = locale_rows(&ident(), None, "name", "", locs.into_iter());
        assert_eq!(rows.len(), 1);
    }
}
