use std::sync::Arc;

use anyhow::Result;
use quaver_pipeline::config::Config;
use quaver_pipeline::{PassContext, Scheduler};

pub async fn run_pipeline(config: &Config, forever: bool) -> Result<()> {
    let cx = Arc::new(PassContext::from_config(config).await?);
    let mut scheduler = Scheduler::new();

    let outcome = tokio::select! {
        outcome = scheduler.run(&cx, forever) => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted, ending run");
            Ok(())
        }
    };

    println!(
        "run finished after {} trip(s)",
        scheduler.state.trips
    );

    // checkpoint on the way out so no -wal file lingers; skipped if a
    // pass task still holds a database handle
    let db = Arc::clone(&cx.db);
    drop(cx);
    drop(scheduler);
    match Arc::try_unwrap(db) {
        Ok(mutex) => mutex.into_inner().close()?,
        Err(_) => log::warn!("database handle still shared, skipping checkpoint"),
    }

    outcome?;
    Ok(())
}
