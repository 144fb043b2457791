use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use super::Ident;

/// An IETF language tag reduced to language and optional script
/// (e.g. `en`, `ja`, `ja-Latn`). Region and the rest are dropped — catalog
/// localizations never distinguish finer than script in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    /// Parse a BCP 47 tag, keeping only language and script subtags.
    #[must_use]
    pub fn from_bcp47(tag: &str) -> Option<Self> {
        let mut parts = tag.split('-');
        let language = parts.next()?;
        if language.is_empty()
            || language.len() > 3
            || !language.bytes().all(|b| b.is_ascii_alphabetic())
        {
            return None;
        }
        let language = language.to_ascii_lowercase();

        // a script subtag is exactly four letters; anything else (region,
        // variants) is dropped
        let script = parts
            .next()
            .filter(|s| s.len() == 4 && s.bytes().all(|b| b.is_ascii_alphabetic()));

        match script {
            Some(script) => {
                let (head, tail) = script.split_at(1);
                Some(Self(format!(
                    "{language}-{}{}",
                    head.to_ascii_uppercase(),
                    tail.to_ascii_lowercase()
                )))
            }
            None => Some(Self(language)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for Locale {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for Locale {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Self(value.as_str()?.to_owned()))
    }
}

/// Which piece of text a locale row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocaleDesc {
    Name = 0,
    Description = 1,
}

impl ToSql for LocaleDesc {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for LocaleDesc {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value.as_i64()? {
            0 => Self::Name,
            1 => Self::Description,
            _ => return Err(FromSqlError::InvalidType),
        })
    }
}

/// A row destined for the `locale` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleEntry {
    pub ident: Ident,
    pub locale: Option<Locale>,
    pub preferred: bool,
    pub desc: LocaleDesc,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_only() {
        assert_eq!(Locale::from_bcp47("en").unwrap().as_str(), "en");
        assert_eq!(Locale::from_bcp47("JA").unwrap().as_str(), "ja");
    }

    #[test]
    fn language_and_script() {
        assert_eq!(Locale::from_bcp47("ja-Latn").unwrap().as_str(), "ja-Latn");
        assert_eq!(Locale::from_bcp47("ja-latn").unwrap().as_str(), "ja-Latn");
    }

    #[test]
    fn region_is_dropped() {
        assert_eq!(Locale::from_bcp47("en-US").unwrap().as_str(), "en");
        assert_eq!(Locale::from_bcp47("zh-Hant-TW").unwrap().as_str(), "zh-Hant");
    }

    #[test]
    fn garbage_rejected() {
        assert!(Locale::from_bcp47("").is_none());
        assert!(Locale::from_bcp47("-Latn").is_none());
        assert!(Locale::from_bcp47("1234").is_none());
    }
}
