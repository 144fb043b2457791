//! Concrete passes, grouped by the surface they ingest from.

pub mod assign;
pub mod download;
pub mod fingerprint;
pub mod image;
pub mod spotify;
pub mod youtube;

use std::collections::BTreeSet;
use std::sync::OnceLock;

use quaver_core::error::Result;
use quaver_core::model::{Ident, ImageKind, LinkEntry, LinkKind};
use quaver_core::queue::{self, Payload};
use quaver_core::schema::entities::ForeignTable;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};

/// Harvest URLs out of free text (video descriptions, channel blurbs).
///
/// CJK punctuation terminates a URL: descriptions routinely run
/// `...99a7_q9XuZY）←｜→` together, and the closing bracket is not part of
/// the link.
#[must_use]
pub fn links_from_text(ident: &Ident, text: &str) -> Vec<LinkEntry> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>'"、。｡､，．：；‘〈「『〔（［｛｢｣｝］）〕』」〉’｀～…]+"#)
            .expect("static regex")
    });

    let mut seen = BTreeSet::new();
    for found in re.find_iter(text) {
        let url = found.as_str().trim_end_matches(['.', ',', ';', ':']);
        seen.insert(url.to_owned());
    }
    seen.into_iter()
        .map(|url| LinkEntry::new(ident.clone(), LinkKind::UnknownUrl, url))
        .collect()
}

/// Is this foreign catalog id already mapped to an entity? Used to avoid
/// re-queueing fan-out work for ids the pipeline has seen.
pub(crate) fn foreign_id_mapped(
    conn: &Connection,
    table: ForeignTable,
    foreign_id: &str,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", table.table()),
            [foreign_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Enqueue an image download unless the URL was already fetched. Catalog
/// image URLs are immutable, so one successful fetch is final.
pub fn dispatch_image(
    conn: &Connection,
    ident: &Ident,
    kind: ImageKind,
    url: &str,
    width: u32,
    height: u32,
    preferred: bool,
) -> Result<()> {
    if quaver_core::schema::entities::image_exists(conn, url)? {
        return Ok(());
    }
    queue::dispatch_immediate(
        conn,
        &Payload::ImageUrl {
            ident: ident.clone(),
            kind,
            url: url.to_owned(),
            width,
            height,
            preferred,
        },
        None,
    )
}
