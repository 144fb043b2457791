//! Credential rotation.
//!
//! Two flavors: a file-loaded ring for API credentials that live in config
//! territory, and a database-backed pool for keys that get banned at run
//! time and need their cooldowns to survive restarts.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use quaver_core::now_millis;
use quaver_core::schema::Database;
use rusqlite::{params, OptionalExtension};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug)]
struct RingState {
    cursor: usize,
    cooldown_until: Vec<Option<Instant>>,
}

/// Round-robin ring over credentials loaded from a JSON file.
///
/// `roll` skips entries on cooldown; when every entry is cooling it hands
/// out the next one anyway, since a stale cooldown beats stopping the run.
#[derive(Debug)]
pub struct CredRing<T> {
    entries: Vec<T>,
    state: Mutex<RingState>,
}

impl<T: serde::de::DeserializeOwned + Clone> CredRing<T> {
    /// Load the ring from a JSON array file. A missing or empty file is a
    /// [`PipelineError::Stop`]: the operator has to provide credentials
    /// before this part of the pipeline can do anything.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Stop(format!("cannot read credential file {}: {e}", path.display()))
        })?;
        let entries: Vec<T> = serde_json::from_str(&text)?;
        if entries.is_empty() {
            return Err(PipelineError::Stop(format!(
                "credential file {} is empty",
                path.display()
            )));
        }
        Ok(Self::from_entries(entries))
    }

    #[must_use]
    pub fn from_entries(entries: Vec<T>) -> Self {
        let cooldown_until = vec![None; entries.len()];
        Self {
            entries,
            state: Mutex::new(RingState {
                cursor: 0,
                cooldown_until,
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Next usable credential and its slot index.
    #[must_use]
    pub fn roll(&self) -> Option<(usize, T)> {
        if self.entries.is_empty() {
            return None;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        for _ in 0..self.entries.len() {
            let slot = state.cursor;
            state.cursor = (state.cursor + 1) % self.entries.len();
            let cooling = state.cooldown_until[slot].is_some_and(|until| until > now);
            if !cooling {
                return Some((slot, self.entries[slot].clone()));
            }
        }

        log::warn!("cred ring: all {} entries cooling down", self.entries.len());
        let slot = state.cursor;
        state.cursor = (state.cursor + 1) % self.entries.len();
        Some((slot, self.entries[slot].clone()))
    }

    /// Put a slot on cooldown.
    pub fn ban(&self, slot: usize, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.cooldown_until.get_mut(slot) {
            *entry = Some(Instant::now() + duration);
        }
    }
}

/// Database-backed credential pool over the `cred_pool` table.
///
/// Entries are plain strings within a named pool; cooldowns are stored as
/// unix-millis so a banned key stays banned across restarts.
#[derive(Debug, Clone)]
pub struct CredPool {
    db: Arc<tokio::sync::Mutex<Database>>,
    pool: &'static str,
}

impl CredPool {
    #[must_use]
    pub fn new(db: Arc<tokio::sync::Mutex<Database>>, pool: &'static str) -> Self {
        Self { db, pool }
    }

    /// Load entries from a JSON string-array file unless the pool already
    /// has rows. Silently does nothing when the file does not exist; the
    /// pool just stays empty and `roll` reports that.
    pub async fn seed_from_file(&self, path: &Path) -> PipelineResult<()> {
        if !path.exists() {
            return Ok(());
        }
        let entries: Vec<String> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let db = self.db.lock().await;
        let existing: i64 = db.conn().query_row(
            "SELECT count(*) FROM cred_pool WHERE pool = ?1",
            [self.pool],
            |r| r.get(0),
        )?;
        if existing > 0 {
            return Ok(());
        }
        for entry in &entries {
            db.conn().execute(
                "INSERT OR IGNORE INTO cred_pool (pool, data) VALUES (?1, ?2)",
                params![self.pool, entry],
            )?;
        }
        log::info!("cred pool {}: seeded {} entries", self.pool, entries.len());
        Ok(())
    }

    /// Least-recently-banned usable entry, or `None` when the pool is
    /// empty or fully cooling.
    pub async fn roll(&self) -> PipelineResult<Option<(i64, String)>> {
        let db = self.db.lock().await;
        let row = db
            .conn()
            .query_row(
                "SELECT id, data FROM cred_pool
                 WHERE pool = ?1 AND cooldown_until <= ?2
                 ORDER BY cooldown_until, id LIMIT 1",
                params![self.pool, now_millis()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub async fn ban(&self, id: i64, cooldown_ms: i64) -> PipelineResult<()> {
        let db = self.db.lock().await;
        db.conn().execute(
            "UPDATE cred_pool SET cooldown_until = ?1 WHERE id = ?2",
            params![now_millis() + cooldown_ms, id],
        )?;
        Ok(())
    }

    /// Remove an entry for good (revoked key, bad credentials).
    pub async fn kill(&self, id: i64) -> PipelineResult<()> {
        let db = self.db.lock().await;
        db.conn()
            .execute("DELETE FROM cred_pool WHERE id = ?1", [id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_rotates_and_skips_cooling() {
        let ring = CredRing::from_entries(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
        let (slot_a, a) = ring.roll().unwrap();
        let (_, b) = ring.roll().unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));

        ring.ban(slot_a, Duration::from_secs(60));
        let (_, c) = ring.roll().unwrap();
        let (_, next) = ring.roll().unwrap();
        assert_eq!(c, "c");
        // "a" is cooling, so the ring wraps past it to "b"
        assert_eq!(next, "b");
    }

    #[test]
    fn fully_cooling_ring_still_serves() {
        let ring = CredRing::from_entries(vec!["only".to_owned()]);
        let (slot, _) = ring.roll().unwrap();
        ring.ban(slot, Duration::from_secs(60));
        assert!(ring.roll().is_some());
    }

    #[test]
    fn missing_file_is_a_stop() {
        let err = CredRing::<String>::load(Path::new("/nonexistent/creds.json")).unwrap_err();
        assert!(err.is_stop());
    }

    #[tokio::test]
    async fn pool_rolls_bans_and_kills() {
        let db = Arc::new(tokio::sync::Mutex::new(
            Database::open_in_memory().unwrap(),
        ));
        let pool = CredPool::new(db, "test");
        {
            let guard = pool.db.lock().await;
            for key in ["k1", "k2"] {
                guard
                    .conn()
                    .execute(
                        "INSERT INTO cred_pool (pool, data) VALUES ('test', ?1)",
                        [key],
                    )
                    .unwrap();
            }
        }

        let (id1, k1) = pool.roll().await.unwrap().unwrap();
        assert_eq!(k1, "k1");
        pool.ban(id1, 60_000).await.unwrap();

        let (id2, k2) = pool.roll().await.unwrap().unwrap();
        assert_eq!(k2, "k2");
        pool.kill(id2).await.unwrap();
        pool.ban(id1, 0).await.unwrap();

        let (_, again) = pool.roll().await.unwrap().unwrap();
        assert_eq!(again, "k1");
    }

    #[tokio::test]
    async fn pool_seed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keys.json");
        std::fs::write(&file, r#"["k1", "k2"]"#).unwrap();

        let db = Arc::new(tokio::sync::Mutex::new(
            Database::open_in_memory().unwrap(),
        ));
        let pool = CredPool::new(db, "yt");
        pool.seed_from_file(&file).await.unwrap();
        pool.seed_from_file(&file).await.unwrap();

        let guard = pool.db.lock().await;
        let count: i64 = guard
            .conn()
            .query_row("SELECT count(*) FROM cred_pool WHERE pool = 'yt'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}
