use anyhow::Result;
use quaver_core::journal::Journal;
use quaver_core::schema::Database;
use quaver_pipeline::config::Config;
use quaver_pipeline::merge;

pub fn run_merge(config: &Config) -> Result<()> {
    let mut db = Database::open(config.database_path())?;
    let journal = Journal::open(&config.data_dir)?;

    let merged = merge::run(&mut db, &journal)?;
    println!("merged {merged} duplicate pair(s)");

    db.close()?;
    Ok(())
}
