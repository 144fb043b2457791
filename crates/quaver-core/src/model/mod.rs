//! Domain model: article kinds, idents, typed entity keys, and the row
//! types shared by the cross-cutting attribute tables.

mod ident;
mod ids;
mod locale;

pub use ident::{ArticleKind, Ident};
pub use ids::{AlbumId, ArtistId, EntityKey, TrackId};
pub use locale::{Locale, LocaleDesc, LocaleEntry};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// External link kinds, stored as small integers.
///
/// SQLite has no string interning; integers 0 and 1 even have zero-overhead
/// storage, so the common kinds go first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    UnknownUrl = 0,
    YoutubeVideo = 1,
    YoutubeChannel = 2,
    YoutubePlaylist = 3,
    SpotifyTrack = 4,
    SpotifyAlbum = 5,
    SpotifyArtist = 6,
    AppleMusicAlbum = 7,
    NiconicoVideo = 8,
    NiconicoUser = 9,
    TwitterUser = 10,
    Linkcore = 11,
    Linkfire = 12,
}

impl LinkKind {
    pub(crate) fn from_i64(v: i64) -> Option<Self> {
        Some(match v {
            0 => Self::UnknownUrl,
            1 => Self::YoutubeVideo,
            2 => Self::YoutubeChannel,
            3 => Self::YoutubePlaylist,
            4 => Self::SpotifyTrack,
            5 => Self::SpotifyAlbum,
            6 => Self::SpotifyArtist,
            7 => Self::AppleMusicAlbum,
            8 => Self::NiconicoVideo,
            9 => Self::NiconicoUser,
            10 => Self::TwitterUser,
            11 => Self::Linkcore,
            12 => Self::Linkfire,
            _ => return None,
        })
    }
}

impl ToSql for LinkKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for LinkKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::from_i64(value.as_i64()?).ok_or(FromSqlError::InvalidType)
    }
}

/// What an image depicts, relative to its owning ident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    CoverArt = 0,
    ProfileArt = 1,
    YtThumbnail = 2,
    YtBanner = 3,
}

impl ToSql for ImageKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for ImageKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value.as_i64()? {
            0 => Self::CoverArt,
            1 => Self::ProfileArt,
            2 => Self::YtThumbnail,
            3 => Self::YtBanner,
            _ => return Err(FromSqlError::InvalidType),
        })
    }
}

/// A row destined for the `external_link` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub ident: Ident,
    pub kind: LinkKind,
    pub data: String,
}

impl LinkEntry {
    #[must_use]
    pub fn new(ident: Ident, kind: LinkKind, data: impl Into<String>) -> Self {
        Self {
            ident,
            kind,
            data: data.into(),
        }
    }
}

/// Entity attributes supplied at creation time. Only non-null fields are
/// written; existing non-null values are never clobbered with null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityAttrs {
    /// International Standard Recording Code (tracks only).
    pub isrc: Option<String>,
}

impl EntityAttrs {
    #[must_use]
    pub fn isrc(isrc: Option<impl Into<String>>) -> Self {
        Self {
            isrc: isrc.map(Into::into),
        }
    }
}
