//! Sharded on-disk store for downloaded media.
//!
//! Refs are minted from the snowflake allocator, rendered as the 16 hex
//! chars of the byte-swapped id plus a dot-extension. Byte-swapping puts
//! the fast-varying low byte first, so the two-char shard prefix spreads
//! uniformly instead of piling into the directory for the current epoch.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::snowflake::SnowflakeGen;

#[derive(Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Open the store rooted at `<root>/media`, creating it if absent.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().join("media");
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Mint a fresh ref with the given extension (`jpg`, `ogg`, ...).
    #[must_use]
    pub fn new_ref(&self, alloc: &SnowflakeGen, ext: &str) -> String {
        #[allow(clippy::cast_sign_loss)] // ids are 53-bit, never negative
        let hex = format!("{:016x}", (alloc.next_id() as u64).swap_bytes());
        format!("{hex}.{ext}")
    }

    /// Absolute path of a ref: `<root>/media/<first two chars>/<ref>`.
    pub fn path_of(&self, media_ref: &str) -> Result<PathBuf> {
        let shard = media_ref
            .get(..2)
            .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| Error::MalformedRef(media_ref.to_owned()))?;
        Ok(self.root.join(shard).join(media_ref))
    }

    /// Write media bytes under a ref. Writes a `.part` file first and
    /// renames, so a crash never leaves a truncated file at the final path.
    pub fn write(&self, media_ref: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(media_ref)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // staging name is the full ref plus .part, so it can never alias
        // another ref sharing the stem
        let part = path.with_file_name(format!("{media_ref}.part"));
        fs::write(&part, bytes)?;
        fs::rename(&part, &path)?;
        Ok(())
    }

    pub fn read(&self, media_ref: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path_of(media_ref)?)?)
    }

    /// Does the ref exist with actual content? Zero-length files count as
    /// missing, so an interrupted download is retried rather than trusted.
    pub fn exists_nonempty(&self, media_ref: &str) -> Result<bool> {
        match fs::metadata(self.path_of(media_ref)?) {
            Ok(meta) => Ok(meta.len() > 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a ref's file, if present.
    pub fn delete(&self, media_ref: &str) -> Result<()> {
        match fs::remove_file(self.path_of(media_ref)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, MediaStore, SnowflakeGen) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::open(dir.path()).unwrap();
        (dir, store, SnowflakeGen::new())
    }

    #[test]
    fn refs_are_hex_with_extension() {
        let (_dir, store, alloc) = setup();
        let r = store.new_ref(&alloc, "ogg");
        let (hex, ext) = r.split_once('.').unwrap();
        assert_eq!(hex.len(), 16);
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(ext, "ogg");
    }

    #[test]
    fn shard_is_the_fast_varying_byte() {
        let (_dir, store, alloc) = setup();
        // sequential ids land in different shards thanks to the byte swap
        let shards: std::collections::HashSet<String> = (0..8)
            .map(|_| store.new_ref(&alloc, "jpg")[..2].to_owned())
            .collect();
        assert!(shards.len() > 1);
    }

    #[test]
    fn write_read_delete_round_trip() {
        let (dir, store, alloc) = setup();
        let r = store.new_ref(&alloc, "jpg");

        assert!(!store.exists_nonempty(&r).unwrap());
        store.write(&r, b"jfif").unwrap();
        assert!(store.exists_nonempty(&r).unwrap());
        assert_eq!(store.read(&r).unwrap(), b"jfif");

        let path = store.path_of(&r).unwrap();
        assert!(path.starts_with(dir.path().join("media")));
        assert_eq!(path.parent().unwrap().file_name().unwrap().len(), 2);

        store.delete(&r).unwrap();
        assert!(!store.exists_nonempty(&r).unwrap());
        store.delete(&r).unwrap(); // idempotent
    }

    #[test]
    fn empty_file_counts_as_missing() {
        let (_dir, store, alloc) = setup();
        let r = store.new_ref(&alloc, "ogg");
        store.write(&r, b"").unwrap();
        assert!(!store.exists_nonempty(&r).unwrap());
    }

    #[test]
    fn staging_file_is_scoped_to_the_whole_ref() {
        let (_dir, store, alloc) = setup();
        let r = store.new_ref(&alloc, "ogg");
        let path = store.path_of(&r).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        // a sibling sharing the stem must survive a write of this ref
        let sibling = path.with_extension("part");
        fs::write(&sibling, b"other").unwrap();
        store.write(&r, b"audio").unwrap();
        assert_eq!(fs::read(&sibling).unwrap(), b"other");
        assert_eq!(store.read(&r).unwrap(), b"audio");
    }

    #[test]
    fn malformed_ref_rejected() {
        let (_dir, store, _) = setup();
        assert!(store.path_of("x").is_err());
        assert!(store.path_of("../../etc/passwd").is_err());
    }
}
