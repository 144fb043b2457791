//! The pass driver.
//!
//! A *trip* sweeps the registry once, running every pass that has ready
//! entries (and whose settlement gate is open). Passes enqueue work for
//! each other, so the driver keeps tripping until a sweep finds nothing to
//! do. A bounded trip counter catches two passes feeding each other
//! forever.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use quaver_core::queue;

use crate::context::PassContext;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{registry, Pass};

/// Trips per run before the driver declares a feedback loop.
pub const TRIP_MAX: u32 = 20;

/// Entries popped per pass per trip.
const POP_LIMIT: usize = 10_000;

/// Explicit driver state, inspectable after a run.
#[derive(Debug, Default)]
pub struct SchedulerState {
    /// Completed trips so far.
    pub trips: u32,
    running: bool,
}

/// Owns the pass registry and drives it to quiescence.
pub struct Scheduler {
    passes: Vec<Box<dyn Pass>>,
    pub state: SchedulerState,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("passes", &self.passes.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: registry(),
            state: SchedulerState::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_passes(passes: Vec<Box<dyn Pass>>) -> Self {
        Self {
            passes,
            state: SchedulerState::default(),
        }
    }

    /// Drive the queue to quiescence.
    ///
    /// With `uncapped` set the trip limit is waived (operator opt-in for
    /// huge backfills). A [`PipelineError::Stop`] from a pass ends the run
    /// cleanly; other pass errors abort it and propagate.
    pub async fn run(&mut self, cx: &Arc<PassContext>, uncapped: bool) -> PipelineResult<()> {
        if self.state.running {
            return Err(PipelineError::Stop("driver is already running".into()));
        }
        self.state.running = true;
        let result = self.drive(cx, uncapped).await;
        self.state.running = false;

        match result {
            Err(PipelineError::Stop(reason)) => {
                log::warn!("run stopped: {reason}");
                Ok(())
            }
            other => other,
        }
    }

    async fn drive(&mut self, cx: &Arc<PassContext>, uncapped: bool) -> PipelineResult<()> {
        loop {
            let mut changed = false;

            for pass in &self.passes {
                if let Some(kind) = pass.settled_on() {
                    let db = cx.db.lock().await;
                    let open = queue::settled(db.conn(), kind)?;
                    drop(db);
                    if !open {
                        continue;
                    }
                }

                let batch = {
                    let db = cx.db.lock().await;
                    queue::pop_ready(db.conn(), pass.id(), POP_LIMIT)?
                };
                if batch.is_empty() {
                    continue;
                }

                log::info!("before {} ({} entries)", pass.id(), batch.len());
                let started = Instant::now();
                pass.run(cx, batch).await?;
                log::info!(
                    "after {} ({} ms)",
                    pass.id(),
                    started.elapsed().as_millis()
                );
                changed = true;
            }

            self.state.trips += 1;
            if !changed {
                return Ok(());
            }
            if !uncapped && self.state.trips > TRIP_MAX {
                return Err(PipelineError::TripLimit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use quaver_core::journal::Journal;
    use quaver_core::queue::{PassId, Payload, QueueEntry};
    use quaver_core::schema::Database;
    use quaver_core::snowflake::SnowflakeGen;
    use quaver_core::store::MediaStore;
    use tokio::sync::Mutex;

    use crate::clients::{
        Fetcher, SpotifyAlbum, SpotifyArtist, SpotifyCatalog, SpotifyTrack, YoutubeCatalog,
        YoutubeChannel, YoutubeVideo,
    };

    #[derive(Debug)]
    struct NoCatalog;

    #[async_trait]
    impl SpotifyCatalog for NoCatalog {
        async fn tracks(&self, _: &[String]) -> PipelineResult<Vec<Option<SpotifyTrack>>> {
            Ok(Vec::new())
        }
        async fn albums(&self, _: &[String]) -> PipelineResult<Vec<Option<SpotifyAlbum>>> {
            Ok(Vec::new())
        }
        async fn artists(&self, _: &[String]) -> PipelineResult<Vec<Option<SpotifyArtist>>> {
            Ok(Vec::new())
        }
        async fn album_tracks(&self, _: &str, _: usize) -> PipelineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl YoutubeCatalog for NoCatalog {
        async fn videos(&self, _: &[String]) -> PipelineResult<Vec<Option<YoutubeVideo>>> {
            Ok(Vec::new())
        }
        async fn channels(&self, _: &[String]) -> PipelineResult<Vec<Option<YoutubeChannel>>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Fetcher for NoCatalog {
        async fn fetch(&self, _: &str) -> PipelineResult<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn test_cx(dir: &std::path::Path) -> Arc<PassContext> {
        Arc::new(PassContext {
            db: Arc::new(Mutex::new(Database::open_in_memory().unwrap())),
            journal: Journal::open(dir).unwrap(),
            store: MediaStore::open(dir).unwrap(),
            alloc: SnowflakeGen::new(),
            spotify: Arc::new(NoCatalog),
            youtube: Arc::new(NoCatalog),
            fetcher: Arc::new(NoCatalog),
        })
    }

    /// Completes its batch and always queues one more entry.
    #[derive(Debug, Default)]
    struct FeedbackPass {
        n: AtomicU64,
    }

    #[async_trait]
    impl Pass for FeedbackPass {
        fn id(&self) -> PassId {
            PassId::SpotifyTrack
        }

        async fn run(&self, cx: &Arc<PassContext>, batch: Vec<QueueEntry>) -> PipelineResult<()> {
            let db = cx.db.lock().await;
            for entry in &batch {
                queue::complete(db.conn(), entry.id)?;
            }
            let n = self.n.fetch_add(1, Ordering::SeqCst);
            queue::dispatch_immediate(
                db.conn(),
                &Payload::SpotifyTrack {
                    id: format!("again-{n}"),
                },
                None,
            )?;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct StopPass;

    #[async_trait]
    impl Pass for StopPass {
        fn id(&self) -> PassId {
            PassId::SpotifyTrack
        }

        async fn run(&self, _cx: &Arc<PassContext>, _batch: Vec<QueueEntry>) -> PipelineResult<()> {
            Err(PipelineError::Stop("credentials exhausted".into()))
        }
    }

    async fn seed_one(cx: &Arc<PassContext>) {
        let db = cx.db.lock().await;
        queue::dispatch_immediate(
            db.conn(),
            &Payload::SpotifyTrack { id: "seed".into() },
            None,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn feedback_loop_hits_the_trip_limit() {
        let dir = tempfile::tempdir().unwrap();
        let cx = test_cx(dir.path());
        seed_one(&cx).await;

        let mut scheduler = Scheduler::with_passes(vec![Box::new(FeedbackPass::default())]);
        let result = scheduler.run(&cx, false).await;
        assert!(matches!(result, Err(PipelineError::TripLimit)));
        assert_eq!(scheduler.state.trips, TRIP_MAX + 1);
    }

    #[tokio::test]
    async fn stop_ends_the_run_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cx = test_cx(dir.path());
        seed_one(&cx).await;

        let mut scheduler = Scheduler::with_passes(vec![Box::new(StopPass)]);
        scheduler.run(&cx, false).await.unwrap();

        // the entry was leased, not completed
        let db = cx.db.lock().await;
        let total: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM queue", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn empty_queue_quiesces_in_one_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cx = test_cx(dir.path());

        let mut scheduler = Scheduler::with_passes(vec![Box::new(FeedbackPass::default())]);
        scheduler.run(&cx, false).await.unwrap();
        assert_eq!(scheduler.state.trips, 1);
    }
}
