use std::path::PathBuf;

use anyhow::Result;
use quaver_core::schema::Database;
use quaver_pipeline::config::Config;
use quaver_pipeline::seed;

pub fn run_seed(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.data_dir.join("seeds"));
    if !dir.is_dir() {
        anyhow::bail!("seed directory {} does not exist", dir.display());
    }

    let mut db = Database::open(config.database_path())?;
    let applied = seed::apply_dir(&mut db, &dir)?;
    if applied.is_empty() {
        println!("no seed files found in {}", dir.display());
    }
    for (pass, queued) in applied {
        println!("{pass}: {queued} new entries");
    }
    db.close()?;
    Ok(())
}
