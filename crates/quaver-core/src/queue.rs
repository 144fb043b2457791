//! Durable FIFO work queue over the `queue` table.
//!
//! Every unit of pipeline work is a row: a pass identifier, a canonical
//! JSON payload, and an expiry. Zero expiry means ready now; popping leases
//! an entry by pushing its expiry forward, completion deletes it, and a
//! crash simply leaves the lease to lapse. The `(kind, pass, payload)`
//! uniqueness constraint is what makes dispatch idempotent.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::model::{AlbumId, ArticleKind, Ident, ImageKind, TrackId};
use crate::now_millis;

/// How long a popped entry stays invisible before it is re-delivered.
pub const LEASE_MS: i64 = 5 * 60 * 1000;

/// 32-bit FNV-1a. The pass-name hash is part of the schema, so it must be
/// stable across builds; a const fn over the name gives us that without
/// maintaining a hand-numbered registry.
#[must_use]
pub const fn fnv1a32(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut hash = 0x811c_9dc5_u32;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// The fixed set of passes. Stored in the queue as the explicit column pair
/// `(kind index, FNV-1a 32 of the name)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    SpotifyTrack,
    SpotifyAlbum,
    SpotifyArtist,
    YoutubeVideo,
    YoutubeChannel,
    AssignTrackArtist,
    AssignAlbumTrack,
    ImageUrl,
    SpotifyPreview,
    Fingerprint,
}

impl PassId {
    pub const ALL: &'static [Self] = &[
        Self::SpotifyTrack,
        Self::SpotifyAlbum,
        Self::SpotifyArtist,
        Self::YoutubeVideo,
        Self::YoutubeChannel,
        Self::AssignTrackArtist,
        Self::AssignAlbumTrack,
        Self::ImageUrl,
        Self::SpotifyPreview,
        Self::Fingerprint,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SpotifyTrack => "track.new.spotify_track",
            Self::SpotifyAlbum => "album.new.spotify_album",
            Self::SpotifyArtist => "artist.new.spotify_artist",
            Self::YoutubeVideo => "track.new.youtube_video",
            Self::YoutubeChannel => "artist.new.youtube_channel",
            Self::AssignTrackArtist => "aux.assign_track_artist",
            Self::AssignAlbumTrack => "aux.assign_album_track",
            Self::ImageUrl => "image.download.image_url",
            Self::SpotifyPreview => "source.download.spotify_preview",
            Self::Fingerprint => "source.classify.fingerprint",
        }
    }

    /// The article-kind bucket this pass settles into.
    #[must_use]
    pub const fn kind(self) -> ArticleKind {
        match self {
            Self::SpotifyTrack | Self::YoutubeVideo => ArticleKind::Track,
            Self::SpotifyAlbum => ArticleKind::Album,
            Self::SpotifyArtist | Self::YoutubeChannel => ArticleKind::Artist,
            Self::AssignTrackArtist | Self::AssignAlbumTrack => ArticleKind::Aux,
            Self::ImageUrl => ArticleKind::Image,
            Self::SpotifyPreview | Self::Fingerprint => ArticleKind::Source,
        }
    }

    #[must_use]
    pub const fn name_hash(self) -> u32 {
        fnv1a32(self.name())
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    fn from_columns(kind: i64, hash: i64) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.kind().index() == kind && i64::from(p.name_hash()) == hash)
    }
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which catalog a foreign artist id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtistCatalog {
    Spotify,
    Youtube,
}

/// A foreign artist id plus the catalog that issued it, so attribution
/// work can resolve it through the right mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub catalog: ArtistCatalog,
    pub id: String,
}

impl ArtistRef {
    #[must_use]
    pub fn spotify(id: impl Into<String>) -> Self {
        Self {
            catalog: ArtistCatalog::Spotify,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn youtube(id: impl Into<String>) -> Self {
        Self {
            catalog: ArtistCatalog::Youtube,
            id: id.into(),
        }
    }

    #[must_use]
    pub const fn table(&self) -> crate::schema::entities::ForeignTable {
        match self.catalog {
            ArtistCatalog::Spotify => crate::schema::entities::ForeignTable::SpotifyArtist,
            ArtistCatalog::Youtube => crate::schema::entities::ForeignTable::YoutubeChannel,
        }
    }
}

/// Work-queue payloads, one variant per pass.
///
/// A tagged union rather than free-form JSON: dispatch cannot name a pass
/// without constructing its payload shape, and the serialized form is
/// canonical (serde writes fields in declaration order), which the queue's
/// uniqueness constraint depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Payload {
    SpotifyTrack {
        id: String,
    },
    SpotifyAlbum {
        id: String,
    },
    SpotifyArtist {
        id: String,
    },
    YoutubeVideo {
        id: String,
    },
    YoutubeChannel {
        id: String,
    },
    /// Attribute artists (by foreign id, resolved at run time) to a track.
    AssignTrackArtist {
        track: TrackId,
        artists: Vec<ArtistRef>,
    },
    /// Place tracks (by foreign id) onto an album.
    AssignAlbumTrack {
        album: AlbumId,
        tracks: Vec<String>,
    },
    ImageUrl {
        ident: Ident,
        kind: ImageKind,
        url: String,
        width: u32,
        height: u32,
        preferred: bool,
    },
    SpotifyPreview {
        track: TrackId,
        url: String,
    },
    Fingerprint {
        track: TrackId,
        media_ref: String,
    },
}

impl Payload {
    /// Which pass consumes this payload. Exhaustive: adding a variant
    /// without routing it will not compile.
    #[must_use]
    pub const fn pass(&self) -> PassId {
        match self {
            Self::SpotifyTrack { .. } => PassId::SpotifyTrack,
            Self::SpotifyAlbum { .. } => PassId::SpotifyAlbum,
            Self::SpotifyArtist { .. } => PassId::SpotifyArtist,
            Self::YoutubeVideo { .. } => PassId::YoutubeVideo,
            Self::YoutubeChannel { .. } => PassId::YoutubeChannel,
            Self::AssignTrackArtist { .. } => PassId::AssignTrackArtist,
            Self::AssignAlbumTrack { .. } => PassId::AssignAlbumTrack,
            Self::ImageUrl { .. } => PassId::ImageUrl,
            Self::SpotifyPreview { .. } => PassId::SpotifyPreview,
            Self::Fingerprint { .. } => PassId::Fingerprint,
        }
    }

    /// Build a payload from a seed-file line. Catalog passes take a bare
    /// foreign id; the rest take the payload's JSON form.
    pub fn from_seed(pass: PassId, line: &str) -> Result<Self> {
        let id = line.trim().to_owned();
        let payload = match pass {
            PassId::SpotifyTrack => Self::SpotifyTrack { id },
            PassId::SpotifyAlbum => Self::SpotifyAlbum { id },
            PassId::SpotifyArtist => Self::SpotifyArtist { id },
            PassId::YoutubeVideo => Self::YoutubeVideo { id },
            PassId::YoutubeChannel => Self::YoutubeChannel { id },
            _ => {
                let payload: Self = serde_json::from_str(line)?;
                if payload.pass() != pass {
                    return Err(Error::SeedMismatch {
                        found: payload.pass().to_string(),
                        expected: pass.to_string(),
                    });
                }
                payload
            }
        };
        Ok(payload)
    }

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A popped queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub pass: PassId,
    pub payload: Payload,
    pub preferred_time: Option<i64>,
    pub try_count: u32,
}

/// Enqueue ready-now, resetting expiry and try count if the same work is
/// already queued (a re-discovery restarts any backoff).
pub fn dispatch_immediate(
    conn: &Connection,
    payload: &Payload,
    preferred_time: Option<i64>,
) -> Result<()> {
    let pass = payload.pass();
    conn.execute(
        "INSERT INTO queue (kind, pass, payload, preferred_time)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(kind, pass, payload)
         DO UPDATE SET expiry = 0, try_count = 0",
        params![
            pass.kind().index(),
            pass.name_hash(),
            payload.to_json()?,
            preferred_time
        ],
    )?;
    Ok(())
}

/// Enqueue unless the same work is already queued. Seeding never disturbs
/// an entry that is mid-backoff or in flight.
pub fn dispatch_seed(
    conn: &Connection,
    payload: &Payload,
    preferred_time: Option<i64>,
) -> Result<bool> {
    let pass = payload.pass();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO queue (kind, pass, payload, preferred_time)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            pass.kind().index(),
            pass.name_hash(),
            payload.to_json()?,
            preferred_time
        ],
    )?;
    Ok(inserted > 0)
}

/// Enqueue with a delay before the entry becomes ready.
pub fn dispatch_later(
    conn: &Connection,
    payload: &Payload,
    preferred_time: Option<i64>,
    delay_ms: i64,
) -> Result<()> {
    let pass = payload.pass();
    conn.execute(
        "INSERT INTO queue (kind, pass, payload, preferred_time, expiry)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(kind, pass, payload)
         DO UPDATE SET expiry = excluded.expiry, try_count = 0",
        params![
            pass.kind().index(),
            pass.name_hash(),
            payload.to_json()?,
            preferred_time,
            now_millis() + delay_ms
        ],
    )?;
    Ok(())
}

/// Pop up to `limit` ready entries for a pass, oldest first, leasing each
/// for [`LEASE_MS`] so it is not re-delivered while in flight.
pub fn pop_ready(conn: &Connection, pass: PassId, limit: usize) -> Result<Vec<QueueEntry>> {
    let now = now_millis();
    let mut stmt = conn.prepare_cached(
        "SELECT id, payload, preferred_time, try_count FROM queue
         WHERE kind = ?1 AND pass = ?2 AND expiry <= ?3
         ORDER BY expiry, id
         LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        params![
            pass.kind().index(),
            pass.name_hash(),
            now,
            limit as i64
        ],
        |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, u32>(3)?,
            ))
        },
    )?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, payload, preferred_time, try_count) = row?;
        entries.push(QueueEntry {
            id,
            pass,
            payload: serde_json::from_str(&payload)?,
            preferred_time,
            try_count,
        });
    }
    drop(stmt);

    let mut lease = conn.prepare_cached("UPDATE queue SET expiry = ?1 WHERE id = ?2")?;
    for entry in &entries {
        lease.execute(params![now + LEASE_MS, entry.id])?;
    }
    Ok(entries)
}

/// Delete a finished entry.
pub fn complete(conn: &Connection, entry_id: i64) -> Result<()> {
    conn.execute("DELETE FROM queue WHERE id = ?1", [entry_id])?;
    Ok(())
}

/// Push an entry back without counting it as a failure (a dependency it
/// needs has not been produced yet).
pub fn retry_later(conn: &Connection, entry_id: i64, delay_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE queue SET expiry = ?1 WHERE id = ?2",
        params![now_millis() + delay_ms, entry_id],
    )?;
    Ok(())
}

/// Push a failed entry back with its try count bumped, journaling the
/// failure so it survives the process log.
pub fn retry_failed(
    conn: &Connection,
    journal: &Journal,
    entry: &QueueEntry,
    delay_ms: i64,
    reason: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE queue SET expiry = ?1, try_count = try_count + 1 WHERE id = ?2",
        params![now_millis() + delay_ms, entry.id],
    )?;
    journal.fatal(
        entry.pass.name(),
        &format!("entry {} (try {}): {reason}", entry.id, entry.try_count + 1),
    )?;
    Ok(())
}

/// Is this article-kind bucket settled — no entry of this kind ready now?
/// Leased and backed-off entries do not count; they will get their turn on
/// a later trip.
pub fn settled(conn: &Connection, kind: ArticleKind) -> Result<bool> {
    let pending: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM queue WHERE kind = ?1 AND expiry <= ?2 LIMIT 1",
            params![kind.index(), now_millis()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(pending.is_none())
}

/// Ready/total entry counts per pass, for the operator view.
pub fn counts(conn: &Connection, pass: Option<PassId>) -> Result<Vec<(PassId, i64, i64)>> {
    let now = now_millis();
    let mut stmt = conn.prepare_cached(
        "SELECT kind, pass, sum(expiry <= ?1), count(*) FROM queue GROUP BY kind, pass",
    )?;
    let rows = stmt.query_map([now], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, i64>(3)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (kind, hash, ready, total) = row?;
        let Some(id) = PassId::from_columns(kind, hash) else {
            log::warn!("queue holds rows for unknown pass (kind {kind}, hash {hash})");
            continue;
        };
        if pass.is_none() || pass == Some(id) {
            out.push((id, ready, total));
        }
    }
    Ok(out)
}

/// Force every entry of a pass ready now, cutting short leases and backoff.
pub fn force_expire(conn: &Connection, pass: PassId) -> Result<usize> {
    let n = conn.execute(
        "UPDATE queue SET expiry = 0 WHERE kind = ?1 AND pass = ?2",
        params![pass.kind().index(), pass.name_hash()],
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKey;
    use crate::schema::Database;

    fn payload(id: &str) -> Payload {
        Payload::SpotifyTrack { id: id.to_owned() }
    }

    #[test]
    fn pass_names_hash_distinctly() {
        let mut hashes: Vec<u32> = PassId::ALL.iter().map(|p| p.name_hash()).collect();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), PassId::ALL.len());
    }

    #[test]
    fn from_name_round_trips() {
        for pass in PassId::ALL {
            assert_eq!(PassId::from_name(pass.name()), Some(*pass));
        }
        assert_eq!(PassId::from_name("track.new.nope"), None);
    }

    #[test]
    fn dispatch_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        dispatch_seed(db.conn(), &payload("a"), None).unwrap();
        let total: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM queue", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn immediate_resets_backoff_but_seed_does_not() {
        let db = Database::open_in_memory().unwrap();
        dispatch_later(db.conn(), &payload("a"), None, 60_000).unwrap();
        assert!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().is_empty());

        assert!(!dispatch_seed(db.conn(), &payload("a"), None).unwrap());
        assert!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().is_empty());

        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        assert_eq!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().len(), 1);
    }

    #[test]
    fn pop_orders_fifo_and_leases() {
        let db = Database::open_in_memory().unwrap();
        dispatch_immediate(db.conn(), &payload("first"), None).unwrap();
        dispatch_immediate(db.conn(), &payload("second"), None).unwrap();

        let entries = pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload, payload("first"));
        assert_eq!(entries[1].payload, payload("second"));

        // leased: a second pop sees nothing
        assert!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().is_empty());
    }

    #[test]
    fn complete_deletes_and_retry_defers() {
        let db = Database::open_in_memory().unwrap();
        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        dispatch_immediate(db.conn(), &payload("b"), None).unwrap();
        let entries = pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap();

        complete(db.conn(), entries[0].id).unwrap();
        retry_later(db.conn(), entries[1].id, 60_000).unwrap();

        let total: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM queue", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 1);
        assert!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().is_empty());
    }

    #[test]
    fn retry_failed_bumps_try_count_and_journals() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path()).unwrap();
        let db = Database::open_in_memory().unwrap();
        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        let entry = pop_ready(db.conn(), PassId::SpotifyTrack, 1).unwrap().remove(0);

        retry_failed(db.conn(), &journal, &entry, 60_000, "catalog 500").unwrap();

        let tries: u32 = db
            .conn()
            .query_row("SELECT try_count FROM queue WHERE id = ?1", [entry.id], |r| r.get(0))
            .unwrap();
        assert_eq!(tries, 1);
        let text = std::fs::read_to_string(dir.path().join("journal.log")).unwrap();
        assert!(text.starts_with("fatal+["));
        assert!(text.contains("(track.new.spotify_track): entry"));
        assert!(text.contains("catalog 500"));
    }

    #[test]
    fn settlement_follows_ready_entries() {
        let db = Database::open_in_memory().unwrap();
        assert!(settled(db.conn(), ArticleKind::Track).unwrap());

        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        assert!(!settled(db.conn(), ArticleKind::Track).unwrap());
        assert!(settled(db.conn(), ArticleKind::Album).unwrap());

        let entry = pop_ready(db.conn(), PassId::SpotifyTrack, 1).unwrap().remove(0);
        // leased entries do not block settlement
        assert!(settled(db.conn(), ArticleKind::Track).unwrap());
        complete(db.conn(), entry.id).unwrap();
        assert!(settled(db.conn(), ArticleKind::Track).unwrap());
    }

    #[test]
    fn force_expire_cuts_backoff_short() {
        let db = Database::open_in_memory().unwrap();
        dispatch_later(db.conn(), &payload("a"), None, 3_600_000).unwrap();
        assert_eq!(force_expire(db.conn(), PassId::SpotifyTrack).unwrap(), 1);
        assert_eq!(pop_ready(db.conn(), PassId::SpotifyTrack, 10).unwrap().len(), 1);
    }

    #[test]
    fn counts_split_ready_from_total() {
        let db = Database::open_in_memory().unwrap();
        dispatch_immediate(db.conn(), &payload("a"), None).unwrap();
        dispatch_later(db.conn(), &payload("b"), None, 60_000).unwrap();
        dispatch_immediate(db.conn(), &Payload::SpotifyAlbum { id: "x".into() }, None).unwrap();

        let all = counts(db.conn(), None).unwrap();
        assert_eq!(all.len(), 2);
        let track = all
            .iter()
            .find(|(p, _, _)| *p == PassId::SpotifyTrack)
            .unwrap();
        assert_eq!((track.1, track.2), (1, 2));

        let only = counts(db.conn(), Some(PassId::SpotifyAlbum)).unwrap();
        assert_eq!(only, vec![(PassId::SpotifyAlbum, 1, 1)]);
    }

    #[test]
    fn seed_parsing_catalog_and_json() {
        let p = Payload::from_seed(PassId::SpotifyTrack, "4uLU6hMCjMI75M1A2tKUQC").unwrap();
        assert_eq!(
            p,
            Payload::SpotifyTrack {
                id: "4uLU6hMCjMI75M1A2tKUQC".into()
            }
        );

        let json = serde_json::to_string(&Payload::SpotifyPreview {
            track: TrackId::from_key(42),
            url: "https://p.scdn.co/mp3-preview/x".into(),
        })
        .unwrap();
        let p = Payload::from_seed(PassId::SpotifyPreview, &json).unwrap();
        assert_eq!(p.pass(), PassId::SpotifyPreview);

        // JSON for the wrong pass is rejected
        assert!(Payload::from_seed(PassId::Fingerprint, &json).is_err());
    }
}
