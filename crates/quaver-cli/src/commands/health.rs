use anyhow::Result;
use quaver_core::schema::Database;
use quaver_pipeline::config::Config;

pub fn show_health(config: &Config) -> Result<()> {
    let db_path = config.database_path();
    let db = Database::open(&db_path)?;

    let integrity: String = db
        .conn()
        .query_row("PRAGMA quick_check", [], |r| r.get(0))?;
    let journal_mode: String = db
        .conn()
        .query_row("PRAGMA journal_mode", [], |r| r.get(0))?;

    println!("database: {}", db_path.display());
    println!("integrity: {integrity}");
    println!("journal mode: {journal_mode}");

    for table in ["track", "album", "artist", "source", "image", "queue"] {
        let n: i64 = db
            .conn()
            .query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
        println!("{table}: {n}");
    }

    db.close()?;
    Ok(())
}
