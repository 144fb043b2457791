use anyhow::Result;
use quaver_core::schema::Database;
use quaver_core::store::MediaStore;
use quaver_pipeline::config::Config;

/// One class of broken reference: a description, a count query, and the
/// matching delete predicate.
struct Probe {
    what: &'static str,
    table: &'static str,
    predicate: &'static str,
}

/// Ident columns hold `tr<id>` / `al<id>` / `ar<id>` strings; this
/// predicate is true when the entity row behind one is gone.
const DANGLING_IDENT: &str = "\
    (ident LIKE 'tr%' AND CAST(substr(ident, 3) AS INTEGER) NOT IN (SELECT id FROM track))
    OR (ident LIKE 'al%' AND CAST(substr(ident, 3) AS INTEGER) NOT IN (SELECT id FROM album))
    OR (ident LIKE 'ar%' AND CAST(substr(ident, 3) AS INTEGER) NOT IN (SELECT id FROM artist))";

const PROBES: &[Probe] = &[
    Probe {
        what: "track_artist rows with a missing track",
        table: "track_artist",
        predicate: "track_id NOT IN (SELECT id FROM track)",
    },
    Probe {
        what: "track_artist rows with a missing artist",
        table: "track_artist",
        predicate: "artist_id NOT IN (SELECT id FROM artist)",
    },
    Probe {
        what: "album_track rows with a missing album",
        table: "album_track",
        predicate: "album_id NOT IN (SELECT id FROM album)",
    },
    Probe {
        what: "album_track rows with a missing track",
        table: "album_track",
        predicate: "track_id NOT IN (SELECT id FROM track)",
    },
    Probe {
        what: "spotify_track mappings to a missing track",
        table: "spotify_track",
        predicate: "track_id NOT IN (SELECT id FROM track)",
    },
    Probe {
        what: "spotify_album mappings to a missing album",
        table: "spotify_album",
        predicate: "album_id NOT IN (SELECT id FROM album)",
    },
    Probe {
        what: "spotify_artist mappings to a missing artist",
        table: "spotify_artist",
        predicate: "artist_id NOT IN (SELECT id FROM artist)",
    },
    Probe {
        what: "youtube_video mappings to a missing track",
        table: "youtube_video",
        predicate: "track_id NOT IN (SELECT id FROM track)",
    },
    Probe {
        what: "youtube_channel mappings to a missing artist",
        table: "youtube_channel",
        predicate: "artist_id NOT IN (SELECT id FROM artist)",
    },
    Probe {
        what: "sources for a missing track",
        table: "source",
        predicate: "track_id NOT IN (SELECT id FROM track)",
    },
    Probe {
        what: "locale rows with a dangling ident",
        table: "locale",
        predicate: DANGLING_IDENT,
    },
    Probe {
        what: "external links with a dangling ident",
        table: "external_link",
        predicate: DANGLING_IDENT,
    },
    Probe {
        what: "images with a dangling ident",
        table: "image",
        predicate: DANGLING_IDENT,
    },
];

pub fn run_check(config: &Config, purge: bool) -> Result<()> {
    let db = Database::open(config.database_path())?;
    let store = MediaStore::open(&config.data_dir)?;

    let mut broken = 0i64;
    for probe in PROBES {
        let n: i64 = db.conn().query_row(
            &format!(
                "SELECT count(*) FROM {} WHERE {}",
                probe.table, probe.predicate
            ),
            [],
            |r| r.get(0),
        )?;
        if n == 0 {
            continue;
        }
        broken += n;
        if purge {
            db.conn().execute(
                &format!("DELETE FROM {} WHERE {}", probe.table, probe.predicate),
                [],
            )?;
            println!("purged {n} {}", probe.what);
        } else {
            println!("found {n} {}", probe.what);
        }
    }

    // media refs whose backing file went missing
    for table in ["image", "source"] {
        let refs: Vec<String> = db
            .conn()
            .prepare(&format!("SELECT ref FROM {table}"))?
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for media_ref in refs {
            if store.exists_nonempty(&media_ref)? {
                continue;
            }
            broken += 1;
            if purge {
                db.conn()
                    .execute(&format!("DELETE FROM {table} WHERE ref = ?1"), [&media_ref])?;
                println!("purged {table} row for missing media {media_ref}");
            } else {
                println!("{table} ref {media_ref} has no media file");
            }
        }
    }

    if broken == 0 {
        println!("no broken references");
    } else if !purge {
        println!("{broken} broken reference(s); re-run with --purge to delete them");
    }

    db.close()?;
    Ok(())
}
