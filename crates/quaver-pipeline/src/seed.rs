//! Seed-file ingestion.
//!
//! Operators drop files named after a pass (`track.new.spotify_track`,
//! `artist.new.youtube_channel`, ...) into a directory; each line is one
//! seed. Catalog passes take bare ids, everything else takes the payload
//! as JSON. Seeding is idempotent: lines already queued are skipped, so a
//! seed directory can be re-applied after edits.

use std::fs;
use std::path::Path;

use quaver_core::queue::{self, PassId, Payload};
use quaver_core::schema::Database;

use crate::error::PipelineResult;

/// Apply every seed file in `dir`. Returns `(pass, lines queued)` per
/// recognized file; files whose names match no pass are ignored.
pub fn apply_dir(db: &mut Database, dir: &Path) -> PipelineResult<Vec<(PassId, usize)>> {
    let mut applied = Vec::new();

    let mut names = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        if dirent.file_type()?.is_file() {
            if let Some(name) = dirent.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();

    for name in names {
        let Some(pass) = PassId::from_name(&name) else {
            continue;
        };
        let text = fs::read_to_string(dir.join(&name))?;
        let queued = apply_file(db, pass, &text)?;
        log::info!("seed {name}: {queued} new entries");
        applied.push((pass, queued));
    }
    Ok(applied)
}

/// Queue one seed file's lines in a single transaction. Blank lines and
/// `#` comments are skipped; the count covers only newly queued entries.
pub fn apply_file(db: &mut Database, pass: PassId, text: &str) -> PipelineResult<usize> {
    let tx = db.transaction().map_err(quaver_core::Error::from)?;
    let mut queued = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let payload = Payload::from_seed(pass, line)?;
        if queue::dispatch_seed(&tx, &payload, None)? {
            queued += 1;
        }
    }
    tx.commit().map_err(quaver_core::Error::from)?;
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_skip_blanks_comments_and_duplicates() {
        let mut db = Database::open_in_memory().unwrap();
        let text = "# catalog dump 2026-08\n\nid_one\nid_two\nid_one\n";
        let queued = apply_file(&mut db, PassId::SpotifyTrack, text).unwrap();
        assert_eq!(queued, 2);

        // a second application queues nothing new
        let queued = apply_file(&mut db, PassId::SpotifyTrack, text).unwrap();
        assert_eq!(queued, 0);
    }

    #[test]
    fn directory_scan_only_touches_pass_named_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("track.new.spotify_track"), "abc\ndef\n").unwrap();
        std::fs::write(dir.path().join("artist.new.youtube_channel"), "UCx\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a seed\n").unwrap();

        let mut db = Database::open_in_memory().unwrap();
        let applied = apply_dir(&mut db, dir.path()).unwrap();
        assert_eq!(
            applied,
            vec![
                (PassId::YoutubeChannel, 1),
                (PassId::SpotifyTrack, 2),
            ]
        );
    }
}
