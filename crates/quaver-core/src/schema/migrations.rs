/// A schema migration.
#[derive(Debug)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATION_001: &str = r#"
-- Entities. Keys are 53-bit snowflakes allocated in-process; attribute
-- columns are nullable and filled in as richer data arrives.
CREATE TABLE IF NOT EXISTS track (
    id INTEGER PRIMARY KEY,
    isrc TEXT
);

CREATE INDEX IF NOT EXISTS idx_track_isrc ON track(isrc);

CREATE TABLE IF NOT EXISTS album (
    id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS artist (
    id INTEGER PRIMARY KEY
);

-- Relations. The autoincrement rowid preserves insertion order, which for
-- track_artist is the displayed collaborator order.
CREATE TABLE IF NOT EXISTS track_artist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id INTEGER NOT NULL,
    artist_id INTEGER NOT NULL,
    UNIQUE (track_id, artist_id)
);

CREATE INDEX IF NOT EXISTS idx_track_artist ON track_artist(track_id, id, artist_id);

CREATE TABLE IF NOT EXISTS album_track (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id INTEGER NOT NULL,
    track_id INTEGER NOT NULL,
    UNIQUE (album_id, track_id)
);

CREATE INDEX IF NOT EXISTS idx_album_track ON album_track(album_id, id, track_id);

-- Third-party mappings, one row per foreign catalog id. The foreign id is
-- the primary key; canonical substitution rewrites it in place.
CREATE TABLE IF NOT EXISTS spotify_track (
    id TEXT PRIMARY KEY,
    track_id INTEGER NOT NULL,
    preview_url TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS spotify_album (
    id TEXT PRIMARY KEY,
    album_id INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS spotify_artist (
    id TEXT PRIMARY KEY,
    artist_id INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS youtube_video (
    id TEXT PRIMARY KEY,
    track_id INTEGER NOT NULL,
    channel_id TEXT
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS youtube_channel (
    id TEXT PRIMARY KEY,
    artist_id INTEGER NOT NULL,
    handle TEXT
) WITHOUT ROWID;

-- Cross-cutting tables keyed by ident rather than per-kind columns.
CREATE TABLE IF NOT EXISTS external_link (
    ident TEXT NOT NULL,
    kind INTEGER NOT NULL,
    data TEXT NOT NULL,
    dead INTEGER NOT NULL DEFAULT 0,
    UNIQUE (kind, ident, data)
);

CREATE INDEX IF NOT EXISTS idx_external_link_ident ON external_link(ident, kind, data);

CREATE TABLE IF NOT EXISTS locale (
    ident TEXT NOT NULL,
    locale TEXT,
    preferred INTEGER NOT NULL,
    "desc" INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE (ident, locale, "desc", text)
);

CREATE INDEX IF NOT EXISTS idx_locale_search ON locale(ident, text, "desc");

CREATE TABLE IF NOT EXISTS image (
    ref TEXT PRIMARY KEY,
    ident TEXT NOT NULL,
    kind INTEGER NOT NULL,
    preferred INTEGER NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    immutable_url TEXT UNIQUE
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_image_ident ON image(ident, ref);

-- A source is a downloaded audio asset. The fingerprint blob is a raw
-- little-endian u32 chromaprint, usually covering the first ~120 seconds.
CREATE TABLE IF NOT EXISTS source (
    ref TEXT PRIMARY KEY,
    track_id INTEGER NOT NULL,
    bitrate INTEGER NOT NULL,
    fingerprint BLOB,
    duration_s REAL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_source_fingerprint ON source(duration_s, fingerprint, ref);
CREATE INDEX IF NOT EXISTS idx_source_track ON source(track_id, bitrate);

-- FIFO work queue. Zero expiry means ready now; pop with
-- ORDER BY expiry, id. (kind, pass) is the redesigned two-column pass
-- identifier: article-kind bucket index plus a hash of the pass name.
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind INTEGER NOT NULL,
    pass INTEGER NOT NULL,
    payload TEXT NOT NULL,
    preferred_time INTEGER,
    expiry INTEGER NOT NULL DEFAULT 0,
    try_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (kind, pass, payload)
);

CREATE INDEX IF NOT EXISTS idx_queue_ready ON queue(expiry, kind, pass);

-- Small persistent key/value store (current locale, cached credentials).
CREATE TABLE IF NOT EXISTS kv_store (
    kind TEXT PRIMARY KEY,
    data TEXT NOT NULL
) WITHOUT ROWID;

-- Credential pool with per-credential cooldown, rotated by the pipeline.
CREATE TABLE IF NOT EXISTS cred_pool (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pool TEXT NOT NULL,
    data TEXT NOT NULL,
    cooldown_until INTEGER NOT NULL DEFAULT 0,
    UNIQUE (pool, data)
);
"#;

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial schema",
    sql: MIGRATION_001,
}];
