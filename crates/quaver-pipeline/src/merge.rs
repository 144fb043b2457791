//! Duplicate-track detection and merging.
//!
//! Two signals identify duplicates: a shared ISRC, and acoustic
//! similarity between downloaded sources. Either way the older entity
//! (lower snowflake) absorbs the newer one, and every row pointing at the
//! loser is rewritten to the winner. Merges are journaled as `link` lines
//! so the entity graph's history stays reconstructible.

use std::collections::{BTreeSet, HashMap};

use quaver_core::journal::Journal;
use quaver_core::model::{EntityKey, TrackId};
use quaver_core::schema::Database;
use rusqlite::{params, Connection};

use crate::audio::RawFingerprint;
use crate::compare::{self, DEFAULT_MAX_OFFSET};
use crate::error::PipelineResult;

/// A fingerprinted source, loaded once for the quadratic scan.
struct Candidate {
    track: TrackId,
    items: Vec<u32>,
    duration_s: f64,
    has_isrc: bool,
}

/// Find duplicate track pairs, ordered `(winner, loser)` by id.
pub fn find_duplicates(conn: &Connection) -> PipelineResult<Vec<(TrackId, TrackId)>> {
    let mut pairs: BTreeSet<(TrackId, TrackId)> = BTreeSet::new();

    let mut stmt = conn
        .prepare(
            "SELECT t1.id, t2.id FROM track t1
             JOIN track t2 ON t2.isrc = t1.isrc AND t2.id > t1.id
             WHERE t1.isrc IS NOT NULL",
        )
        .map_err(quaver_core::Error::from)?;
    let isrc_pairs = stmt
        .query_map([], |r| Ok((r.get::<_, TrackId>(0)?, r.get::<_, TrackId>(1)?)))
        .map_err(quaver_core::Error::from)?;
    for pair in isrc_pairs {
        pairs.insert(pair.map_err(quaver_core::Error::from)?);
    }
    drop(stmt);

    for (a, b) in fuzzy_pairs(conn)? {
        pairs.insert((a.min(b), a.max(b)));
    }

    Ok(pairs.into_iter().collect())
}

/// Acoustic pass: compare every fingerprinted source against every other.
///
/// Pairs where both tracks carry an ISRC are left alone — the authoritative
/// signal already had its say, and a non-match there means versions (live,
/// remaster) that merely sound alike.
fn fuzzy_pairs(conn: &Connection) -> PipelineResult<Vec<(TrackId, TrackId)>> {
    let mut stmt = conn
        .prepare(
            "SELECT s.track_id, s.fingerprint, s.duration_s, t.isrc IS NOT NULL
             FROM source s JOIN track t ON t.id = s.track_id
             WHERE s.fingerprint IS NOT NULL AND s.duration_s IS NOT NULL",
        )
        .map_err(quaver_core::Error::from)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, TrackId>(0)?,
                r.get::<_, Vec<u8>>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, bool>(3)?,
            ))
        })
        .map_err(quaver_core::Error::from)?;

    let mut candidates = Vec::new();
    for row in rows {
        let (track, blob, duration_s, has_isrc) = row.map_err(quaver_core::Error::from)?;
        candidates.push(Candidate {
            track,
            items: RawFingerprint::items_from_bytes(&blob)?,
            duration_s,
            has_isrc,
        });
    }

    let mut out = Vec::new();
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            if a.track == b.track || (a.has_isrc && b.has_isrc) {
                continue;
            }
            if (a.duration_s - b.duration_s).abs() > compare::MAX_DURATION_DELTA_S {
                continue;
            }
            let score = compare::similarity(&a.items, &b.items, DEFAULT_MAX_OFFSET);
            if compare::is_match(score, a.duration_s, b.duration_s) {
                log::info!(
                    "fuzzy match {} ~ {} (score {score:.3})",
                    a.track.ident().as_str(),
                    b.track.ident().as_str()
                );
                out.push((a.track, b.track));
            }
        }
    }
    Ok(out)
}

/// Rewrite every reference from `loser` to `winner`, then delete the loser.
///
/// Caller wraps this in a transaction.
fn merge_pair(conn: &Connection, winner: TrackId, loser: TrackId) -> PipelineResult<()> {
    let w_ident = winner.ident();
    let l_ident = loser.ident();

    // collapse duplicate attributions first, keeping the oldest row per
    // artist so collaborator order stays stable
    conn.execute(
        "DELETE FROM track_artist WHERE track_id IN (?1, ?2) AND id NOT IN (
             SELECT min(id) FROM track_artist WHERE track_id IN (?1, ?2)
             GROUP BY artist_id)",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute(
        "UPDATE track_artist SET track_id = ?1 WHERE track_id = ?2",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;

    conn.execute(
        "UPDATE OR IGNORE album_track SET track_id = ?1 WHERE track_id = ?2",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute(
        "DELETE FROM album_track WHERE track_id = ?1",
        params![loser],
    )
    .map_err(quaver_core::Error::from)?;

    conn.execute(
        "UPDATE source SET track_id = ?1 WHERE track_id = ?2",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute(
        "UPDATE spotify_track SET track_id = ?1 WHERE track_id = ?2",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute(
        "UPDATE youtube_video SET track_id = ?1 WHERE track_id = ?2",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;

    conn.execute(
        "UPDATE OR IGNORE locale SET ident = ?1 WHERE ident = ?2",
        params![w_ident, l_ident],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute("DELETE FROM locale WHERE ident = ?1", params![l_ident])
        .map_err(quaver_core::Error::from)?;

    conn.execute(
        "UPDATE OR IGNORE external_link SET ident = ?1 WHERE ident = ?2",
        params![w_ident, l_ident],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute(
        "DELETE FROM external_link WHERE ident = ?1",
        params![l_ident],
    )
    .map_err(quaver_core::Error::from)?;

    conn.execute(
        "UPDATE image SET ident = ?1 WHERE ident = ?2",
        params![w_ident, l_ident],
    )
    .map_err(quaver_core::Error::from)?;

    // the winner keeps its own attributes, taking the loser's only where
    // it has none
    conn.execute(
        "UPDATE track SET isrc = coalesce(isrc, (SELECT isrc FROM track WHERE id = ?2))
         WHERE id = ?1",
        params![winner, loser],
    )
    .map_err(quaver_core::Error::from)?;
    conn.execute("DELETE FROM track WHERE id = ?1", params![loser])
        .map_err(quaver_core::Error::from)?;

    Ok(())
}

/// Run one full merge sweep. Returns the number of pairs merged.
pub fn run(db: &mut Database, journal: &Journal) -> PipelineResult<usize> {
    let pairs = find_duplicates(db.conn())?;

    // chains like c->b, b->a resolve through the redirect map so every
    // track ends up at the oldest survivor
    let mut redirect: HashMap<TrackId, TrackId> = HashMap::new();
    let resolve = |redirect: &HashMap<TrackId, TrackId>, mut id: TrackId| {
        while let Some(&next) = redirect.get(&id) {
            id = next;
        }
        id
    };

    let mut merged = 0;
    for (a, b) in pairs {
        let a = resolve(&redirect, a);
        let b = resolve(&redirect, b);
        if a == b {
            continue;
        }
        let (winner, loser) = (a.min(b), a.max(b));

        let tx = db.transaction().map_err(quaver_core::Error::from)?;
        merge_pair(&tx, winner, loser)?;
        tx.commit().map_err(quaver_core::Error::from)?;

        journal.link(
            "merge",
            &format!("{} <- {}", winner.ident().as_str(), loser.ident().as_str()),
        )?;
        redirect.insert(loser, winner);
        merged += 1;
    }

    if merged > 0 {
        log::info!("merged {merged} duplicate track pairs");
    }
    Ok(merged)
}
