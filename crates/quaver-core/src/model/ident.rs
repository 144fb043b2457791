use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

/// The taxonomy used to bucket pass identifiers for settlement checks.
///
/// Only the first three kinds are entities with rows of their own; the rest
/// exist so passes producing auxiliary data get their own buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArticleKind {
    Track,
    Album,
    Artist,
    Aux,
    Image,
    Source,
    Link,
}

impl ArticleKind {
    pub const ALL: [Self; 7] = [
        Self::Track,
        Self::Album,
        Self::Artist,
        Self::Aux,
        Self::Image,
        Self::Source,
        Self::Link,
    ];

    /// Stable bucket index, stored alongside queue rows.
    #[must_use]
    pub const fn index(self) -> i64 {
        self as i64
    }

    /// Two-letter ident prefix, for the entity kinds that have idents.
    #[must_use]
    pub const fn prefix(self) -> Option<&'static str> {
        match self {
            Self::Track => Some("tr"),
            Self::Album => Some("al"),
            Self::Artist => Some("ar"),
            _ => None,
        }
    }
}

/// Universal string identity: a two-letter article-kind prefix followed by
/// the entity's numeric key, e.g. `tr51034792731`.
///
/// Used as the foreign key into the cross-cutting tables (locale text,
/// external links, images) so those tables need not be partitioned per
/// entity kind. Within one prefix, lexicographic order matches creation
/// order because keys are time-ordered and fixed-width per era.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(String);

impl Ident {
    /// Build an ident for an entity kind. `None` for kinds without idents.
    #[must_use]
    pub fn new(kind: ArticleKind, key: Snowflake) -> Option<Self> {
        kind.prefix().map(|p| Self(format!("{p}{key}")))
    }

    #[must_use]
    pub fn kind(&self) -> Option<ArticleKind> {
        match &self.0[..2] {
            "tr" => Some(ArticleKind::Track),
            "al" => Some(ArticleKind::Album),
            "ar" => Some(ArticleKind::Artist),
            _ => None,
        }
    }

    /// The numeric entity key under the prefix.
    #[must_use]
    pub fn key(&self) -> Snowflake {
        self.0[2..].parse().unwrap_or(0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Ident {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() >= 3
            && matches!(&s[..2], "tr" | "al" | "ar")
            && s[2..].bytes().all(|b| b.is_ascii_digit());
        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(crate::Error::MalformedIdent(s.to_owned()))
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for Ident {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for Ident {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes() {
        assert_eq!(ArticleKind::Track.prefix(), Some("tr"));
        assert_eq!(ArticleKind::Aux.prefix(), None);
    }

    #[test]
    fn round_trip() {
        let ident = Ident::new(ArticleKind::Album, 12345).unwrap();
        assert_eq!(ident.as_str(), "al12345");
        assert_eq!(ident.kind(), Some(ArticleKind::Album));
        assert_eq!(ident.key(), 12345);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("xx123".parse::<Ident>().is_err());
        assert!("tr".parse::<Ident>().is_err());
        assert!("tr12a".parse::<Ident>().is_err());
        assert!("tr123".parse::<Ident>().is_ok());
    }

    #[test]
    fn ident_order_matches_key_order_within_prefix() {
        // same-era keys share a width, so string order is key order
        let a = Ident::new(ArticleKind::Track, 51_000_000_001).unwrap();
        let b = Ident::new(ArticleKind::Track, 51_000_000_002).unwrap();
        assert!(a < b);
    }
}
