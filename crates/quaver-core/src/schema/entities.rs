//! Entity-graph operations: idempotent get-or-create against the
//! third-party mapping tables, canonical-id substitution, and the upsert
//! helpers passes use to write relations, locale text, links, images, and
//! sources.
//!
//! Everything here takes a bare [`rusqlite::Connection`] so the same helper
//! works inside or outside an explicit transaction.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::model::{
    AlbumId, ArticleKind, ArtistId, EntityAttrs, EntityKey, Ident, LinkEntry, LinkKind,
    LocaleEntry, TrackId,
};
use crate::snowflake::{Snowflake, SnowflakeGen};

/// The third-party mapping tables. One row per foreign catalog id, linking
/// an external identity to one internal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignTable {
    SpotifyTrack,
    SpotifyAlbum,
    SpotifyArtist,
    YoutubeVideo,
    YoutubeChannel,
}

impl ForeignTable {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::SpotifyTrack => "spotify_track",
            Self::SpotifyAlbum => "spotify_album",
            Self::SpotifyArtist => "spotify_artist",
            Self::YoutubeVideo => "youtube_video",
            Self::YoutubeChannel => "youtube_channel",
        }
    }

    #[must_use]
    pub const fn entity_column(self) -> &'static str {
        match self {
            Self::SpotifyTrack | Self::YoutubeVideo => "track_id",
            Self::SpotifyAlbum => "album_id",
            Self::SpotifyArtist | Self::YoutubeChannel => "artist_id",
        }
    }

    #[must_use]
    pub const fn kind(self) -> ArticleKind {
        match self {
            Self::SpotifyTrack | Self::YoutubeVideo => ArticleKind::Track,
            Self::SpotifyAlbum => ArticleKind::Album,
            Self::SpotifyArtist | Self::YoutubeChannel => ArticleKind::Artist,
        }
    }

    /// Source-specific attribute column, if the table has one.
    #[must_use]
    pub const fn extra_column(self) -> Option<&'static str> {
        match self {
            Self::SpotifyTrack => Some("preview_url"),
            Self::YoutubeVideo => Some("channel_id"),
            Self::YoutubeChannel => Some("handle"),
            Self::SpotifyAlbum | Self::SpotifyArtist => None,
        }
    }

    /// Other columns holding this table's foreign ids as values, which a
    /// canonical substitution must rewrite too.
    #[must_use]
    pub const fn referencing(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::YoutubeChannel => &[("youtube_video", "channel_id")],
            _ => &[],
        }
    }
}

/// Does any entity of any kind already hold this key?
///
/// Short-circuiting CASE beats a UNION here; backdated allocation calls
/// this in a loop.
fn id_exists(conn: &Connection, id: Snowflake) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT CASE
            WHEN EXISTS (SELECT 1 FROM track WHERE id = ?1) THEN 1
            WHEN EXISTS (SELECT 1 FROM album WHERE id = ?1) THEN 1
            WHEN EXISTS (SELECT 1 FROM artist WHERE id = ?1) THEN 1
            ELSE 0
        END",
        [id],
        |r| r.get(0),
    )?;
    Ok(found == 1)
}

/// Look up the entity behind a foreign catalog id, creating it if absent.
///
/// Idempotent: calling twice for the same foreign id returns the same key.
/// With `preferred_time` set, a fresh entity is backdated so it sorts at
/// that time, retrying the allocation with an incrementing sequence until a
/// free key is found. Provided non-null attributes are upserted onto the
/// entity row without clobbering existing values with null.
pub fn get_or_create(
    conn: &Connection,
    alloc: &SnowflakeGen,
    table: ForeignTable,
    foreign_id: &str,
    preferred_time: Option<i64>,
    attrs: &EntityAttrs,
) -> Result<(Ident, Snowflake)> {
    let existing: Option<Snowflake> = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                table.entity_column(),
                table.table()
            ),
            [foreign_id],
            |r| r.get(0),
        )
        .optional()?;

    let key = match existing {
        Some(key) => key,
        None => match preferred_time {
            Some(at) => {
                let mut seq = 0;
                loop {
                    let id = alloc.with_timestamp(at, seq);
                    if !id_exists(conn, id)? {
                        break id;
                    }
                    seq += 1;
                    log::debug!("get_or_create: backdated key taken, retrying (seq {seq})");
                }
            }
            None => alloc.next_id(),
        },
    };

    match table.kind() {
        ArticleKind::Track => {
            conn.execute(
                "INSERT INTO track (id, isrc) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET isrc = coalesce(excluded.isrc, track.isrc)",
                params![key, attrs.isrc],
            )?;
        }
        ArticleKind::Album => {
            conn.execute("INSERT OR IGNORE INTO album (id) VALUES (?1)", [key])?;
        }
        ArticleKind::Artist => {
            conn.execute("INSERT OR IGNORE INTO artist (id) VALUES (?1)", [key])?;
        }
        _ => unreachable!("mapping tables only target entity kinds"),
    }

    conn.execute(
        &format!(
            "INSERT INTO {t} (id, {c}) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET {c} = excluded.{c}",
            t = table.table(),
            c = table.entity_column()
        ),
        params![foreign_id, key],
    )?;

    // entity kinds always carry an ident prefix
    let ident = Ident::new(table.kind(), key).unwrap_or_else(|| unreachable!());
    Ok((ident, key))
}

/// Look up the entity behind a foreign catalog id; error if unmapped.
pub fn get_ident(
    conn: &Connection,
    table: ForeignTable,
    foreign_id: &str,
) -> Result<(Ident, Snowflake)> {
    let key: Option<Snowflake> = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                table.entity_column(),
                table.table()
            ),
            [foreign_id],
            |r| r.get(0),
        )
        .optional()?;

    let key = key.ok_or_else(|| Error::Unmapped {
        table: table.table(),
        foreign_id: foreign_id.to_owned(),
    })?;
    let ident = Ident::new(table.kind(), key).unwrap_or_else(|| unreachable!());
    Ok((ident, key))
}

/// Replace a stale foreign id with the canonical one the catalog now
/// reports, keeping the internal entity key.
///
/// Any row already stored under the canonical id is removed first (it would
/// otherwise collide), the known row is rewritten in place, and columns
/// elsewhere holding the stale id as a value are rewritten too. Finally the
/// mapping's attribute columns are refreshed.
pub fn insert_canonical(
    conn: &Connection,
    table: ForeignTable,
    canonical: &str,
    known: &str,
    entity: Snowflake,
    extra: Option<&str>,
) -> Result<()> {
    if canonical != known {
        log::info!("insert_canonical: {} {known} -> {canonical}", table.table());
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table.table()),
            [canonical],
        )?;
        conn.execute(
            &format!("UPDATE {} SET id = ?1 WHERE id = ?2", table.table()),
            [canonical, known],
        )?;
        for (ref_table, ref_column) in table.referencing() {
            conn.execute(
                &format!("UPDATE {ref_table} SET {ref_column} = ?1 WHERE {ref_column} = ?2"),
                [canonical, known],
            )?;
        }
    }

    match table.extra_column() {
        Some(col) => conn.execute(
            &format!(
                "INSERT INTO {t} (id, {c}, {col}) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET {c} = excluded.{c}, {col} = excluded.{col}",
                t = table.table(),
                c = table.entity_column()
            ),
            params![canonical, entity, extra],
        )?,
        None => conn.execute(
            &format!(
                "INSERT INTO {t} (id, {c}) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET {c} = excluded.{c}",
                t = table.table(),
                c = table.entity_column()
            ),
            params![canonical, entity],
        )?,
    };

    Ok(())
}

/// Attribute artists to a track, preserving insertion order. Duplicate
/// pairings are ignored.
pub fn insert_track_artist(conn: &Connection, track: TrackId, artists: &[ArtistId]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO track_artist (track_id, artist_id) VALUES (?1, ?2)",
    )?;
    for artist in artists {
        stmt.execute(params![track, artist])?;
    }
    Ok(())
}

/// Place tracks on an album, preserving insertion order.
pub fn insert_album_track(conn: &Connection, album: AlbumId, tracks: &[TrackId]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO album_track (album_id, track_id) VALUES (?1, ?2)")?;
    for track in tracks {
        stmt.execute(params![album, track])?;
    }
    Ok(())
}

/// Insert locale text rows. On conflict the preferred flag is unioned so a
/// later preferred insert upgrades an existing row but never downgrades it.
pub fn locale_insert(conn: &Connection, entries: &[LocaleEntry]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO locale (ident, locale, preferred, \"desc\", text) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(ident, locale, \"desc\", text)
         DO UPDATE SET preferred = max(locale.preferred, excluded.preferred)",
    )?;
    for entry in entries {
        stmt.execute(params![
            entry.ident,
            entry.locale,
            entry.preferred,
            entry.desc,
            entry.text
        ])?;
    }
    Ok(())
}

/// All names stored for an ident, preferred first.
pub fn locale_names(conn: &Connection, ident: &Ident) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT text FROM locale WHERE ident = ?1 AND \"desc\" = 0
         ORDER BY preferred DESC, rowid",
    )?;
    let names = stmt
        .query_map([ident], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Insert external links, ignoring duplicates. Scheme-less URLs of unknown
/// kind get an `https://` prefix — people paste links without one.
pub fn link_insert(conn: &Connection, links: &[LinkEntry]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO external_link (ident, kind, data) VALUES (?1, ?2, ?3)",
    )?;
    for link in links {
        let data = if link.kind == LinkKind::UnknownUrl
            && !link.data.starts_with("http://")
            && !link.data.starts_with("https://")
        {
            format!("https://{}", link.data)
        } else {
            link.data.clone()
        };
        stmt.execute(params![link.ident, link.kind, data])?;
    }
    Ok(())
}

/// Mark a link dead without deleting it, so it is never re-harvested.
pub fn link_mark_dead(conn: &Connection, ident: &Ident, kind: LinkKind, data: &str) -> Result<()> {
    conn.execute(
        "UPDATE external_link SET dead = 1 WHERE ident = ?1 AND kind = ?2 AND data = ?3",
        params![ident, kind, data],
    )?;
    Ok(())
}

/// Record a downloaded image blob. Repeat downloads of the same immutable
/// URL are ignored.
pub fn insert_image(
    conn: &Connection,
    media_ref: &str,
    ident: &Ident,
    kind: crate::model::ImageKind,
    preferred: bool,
    width: u32,
    height: u32,
    immutable_url: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO image (ref, ident, kind, preferred, width, height, immutable_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![media_ref, ident, kind, preferred, width, height, immutable_url],
    )?;
    Ok(())
}

/// Has an image from this immutable URL already been stored?
pub fn image_exists(conn: &Connection, immutable_url: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM image WHERE immutable_url = ?1",
            [immutable_url],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record a downloaded audio source for a track.
pub fn insert_source(conn: &Connection, media_ref: &str, track: TrackId, bitrate: u32) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO source (ref, track_id, bitrate) VALUES (?1, ?2, ?3)",
        params![media_ref, track, bitrate],
    )?;
    Ok(())
}

/// Attach an acoustic fingerprint and measured duration to a source.
pub fn set_source_fingerprint(
    conn: &Connection,
    media_ref: &str,
    fingerprint: &[u8],
    duration_s: f64,
) -> Result<()> {
    conn.execute(
        "UPDATE source SET fingerprint = ?1, duration_s = ?2 WHERE ref = ?3",
        params![fingerprint, duration_s, media_ref],
    )?;
    Ok(())
}

/// Does the track already have a source at or above this bitrate?
pub fn has_preferable_source(conn: &Connection, track: TrackId, bitrate: u32) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM source WHERE track_id = ?1 AND bitrate >= ?2",
            params![track, bitrate],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Persistent key/value store (current locale, cached credentials).
pub fn kv_get<T: serde::de::DeserializeOwned>(conn: &Connection, kind: &str) -> Result<Option<T>> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM kv_store WHERE kind = ?1", [kind], |r| {
            r.get(0)
        })
        .optional()?;
    match data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

pub fn kv_set<T: serde::Serialize>(conn: &Connection, kind: &str, value: &T) -> Result<()> {
    let data = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv_store (kind, data) VALUES (?1, ?2)
         ON CONFLICT(kind) DO UPDATE SET data = excluded.data",
        params![kind, data],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;

    fn setup() -> (Database, SnowflakeGen) {
        (Database::open_in_memory().unwrap(), SnowflakeGen::new())
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let (db, alloc) = setup();
        let attrs = EntityAttrs::default();
        let (ident1, key1) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "abc123",
            None,
            &attrs,
        )
        .unwrap();
        let (ident2, key2) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "abc123",
            None,
            &attrs,
        )
        .unwrap();
        assert_eq!(key1, key2);
        assert_eq!(ident1, ident2);

        let rows: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM track", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn attrs_do_not_clobber_with_null() {
        let (db, alloc) = setup();
        let (_, key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "t1",
            None,
            &EntityAttrs::isrc(Some("JPQ250000001")),
        )
        .unwrap();
        // second discovery of the same track without an ISRC
        get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "t1",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        let isrc: Option<String> = db
            .conn()
            .query_row("SELECT isrc FROM track WHERE id = ?1", [key], |r| r.get(0))
            .unwrap();
        assert_eq!(isrc.as_deref(), Some("JPQ250000001"));
    }

    #[test]
    fn backdated_creation_sorts_early() {
        let (db, alloc) = setup();
        let (_, now_key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "recent",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        let (_, old_key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::YoutubeVideo,
            "ancient",
            Some(1_000_000_000),
            &EntityAttrs::default(),
        )
        .unwrap();
        assert!(old_key < now_key);
        assert_eq!(crate::snowflake::timestamp_of(old_key), 1_000_000_000);
    }

    #[test]
    fn backdated_creation_skips_taken_keys() {
        let (db, alloc) = setup();
        let at = 5_000_000;
        let (_, first) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "a",
            Some(at),
            &EntityAttrs::default(),
        )
        .unwrap();
        let (_, second) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "b",
            Some(at),
            &EntityAttrs::default(),
        )
        .unwrap();
        assert_ne!(first, second);
        assert_eq!(second, first + 1);
    }

    #[test]
    fn canonical_substitution_moves_the_row() {
        let (db, alloc) = setup();
        let (_, key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "old",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();

        insert_canonical(
            db.conn(),
            ForeignTable::SpotifyTrack,
            "new",
            "old",
            key,
            Some("https://p.scdn.co/mp3-preview/x"),
        )
        .unwrap();

        let (_, mapped) = get_ident(db.conn(), ForeignTable::SpotifyTrack, "new").unwrap();
        assert_eq!(mapped, key);
        assert!(get_ident(db.conn(), ForeignTable::SpotifyTrack, "old").is_err());
        let rows: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM spotify_track", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn canonical_substitution_rewrites_references() {
        let (db, alloc) = setup();
        let (_, artist_key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::YoutubeChannel,
            "UCold",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        let (_, video_track) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::YoutubeVideo,
            "vid1",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        db.conn()
            .execute(
                "UPDATE youtube_video SET channel_id = 'UCold' WHERE id = 'vid1'",
                [],
            )
            .unwrap();

        insert_canonical(
            db.conn(),
            ForeignTable::YoutubeChannel,
            "UCnew",
            "UCold",
            artist_key,
            None,
        )
        .unwrap();

        let channel: String = db
            .conn()
            .query_row("SELECT channel_id FROM youtube_video WHERE id = 'vid1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(channel, "UCnew");
        // video's own mapping untouched
        let (_, still) = get_ident(db.conn(), ForeignTable::YoutubeVideo, "vid1").unwrap();
        assert_eq!(still, video_track);
    }

    #[test]
    fn locale_preferred_unions_upward() {
        let (db, alloc) = setup();
        let (ident, _) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "t",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();

        let mut entry = LocaleEntry {
            ident: ident.clone(),
            locale: crate::model::Locale::from_bcp47("en"),
            preferred: false,
            desc: crate::model::LocaleDesc::Name,
            text: "Song".to_owned(),
        };
        locale_insert(db.conn(), std::slice::from_ref(&entry)).unwrap();
        entry.preferred = true;
        locale_insert(db.conn(), std::slice::from_ref(&entry)).unwrap();
        entry.preferred = false;
        locale_insert(db.conn(), std::slice::from_ref(&entry)).unwrap();

        let (rows, preferred): (i64, i64) = db
            .conn()
            .query_row(
                "SELECT count(*), sum(preferred) FROM locale WHERE ident = ?1",
                [&ident],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(preferred, 1);
    }

    #[test]
    fn link_insert_fixes_bare_urls() {
        let (db, alloc) = setup();
        let (ident, _) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyArtist,
            "a",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        link_insert(
            db.conn(),
            &[LinkEntry::new(
                ident.clone(),
                LinkKind::UnknownUrl,
                "example.com/artist",
            )],
        )
        .unwrap();
        let data: String = db
            .conn()
            .query_row(
                "SELECT data FROM external_link WHERE ident = ?1",
                [&ident],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(data, "https://example.com/artist");
    }

    #[test]
    fn source_bitrate_preference() {
        let (db, alloc) = setup();
        let (_, key) = get_or_create(
            db.conn(),
            &alloc,
            ForeignTable::SpotifyTrack,
            "t",
            None,
            &EntityAttrs::default(),
        )
        .unwrap();
        let track = TrackId::from_key(key);
        insert_source(db.conn(), "aa00bb.ogg", track, 96).unwrap();
        assert!(has_preferable_source(db.conn(), track, 96).unwrap());
        assert!(!has_preferable_source(db.conn(), track, 160).unwrap());
    }

    #[test]
    fn kv_round_trip() {
        let (db, _) = setup();
        kv_set(db.conn(), "locale", &"en").unwrap();
        let got: Option<String> = kv_get(db.conn(), "locale").unwrap();
        assert_eq!(got.as_deref(), Some("en"));
        let missing: Option<String> = kv_get(db.conn(), "nope").unwrap();
        assert!(missing.is_none());
    }
}
