use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ident::{ArticleKind, Ident};
use crate::snowflake::Snowflake;

/// A typed snowflake key for one entity kind.
pub trait EntityKey: Copy + fmt::Debug {
    const KIND: ArticleKind;

    fn from_key(key: Snowflake) -> Self;
    fn key(self) -> Snowflake;

    fn ident(self) -> Ident {
        // entity kinds always carry a prefix
        Ident::new(Self::KIND, self.key()).unwrap_or_else(|| unreachable!())
    }
}

macro_rules! define_key {
    ($name:ident, $kind:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Snowflake);

        impl EntityKey for $name {
            const KIND: ArticleKind = $kind;

            fn from_key(key: Snowflake) -> Self {
                Self(key)
            }

            fn key(self) -> Snowflake {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                Ok(Self(value.as_i64()?))
            }
        }
    };
}

define_key!(TrackId, ArticleKind::Track, "Key of a track entity.");
define_key!(AlbumId, ArticleKind::Album, "Key of an album entity.");
define_key!(ArtistId, ArticleKind::Artist, "Key of an artist entity.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_keys_make_idents() {
        let id = TrackId::from_key(42);
        assert_eq!(id.ident().as_str(), "tr42");
        assert_eq!(ArtistId::from_key(7).ident().as_str(), "ar7");
    }

    #[test]
    fn key_order_is_creation_order() {
        assert!(AlbumId::from_key(1) < AlbumId::from_key(2));
    }
}
