use anyhow::Result;
use quaver_core::queue::{self, PassId, Payload};
use quaver_core::schema::Database;
use quaver_pipeline::config::Config;

fn parse_pass(name: &str) -> Result<PassId> {
    PassId::from_name(name).ok_or_else(|| {
        let known: Vec<&str> = PassId::ALL.iter().map(|p| p.name()).collect();
        anyhow::anyhow!("unknown pass {name:?}; known passes: {}", known.join(", "))
    })
}

pub fn run_dispatch(config: &Config, pass: &str, payload: &str) -> Result<()> {
    let pass = parse_pass(pass)?;
    let payload = Payload::from_seed(pass, payload)?;

    let db = Database::open(config.database_path())?;
    queue::dispatch_immediate(db.conn(), &payload, None)?;
    println!("queued for {pass}");
    db.close()?;
    Ok(())
}

pub fn show_inflight(config: &Config, pass: Option<&str>) -> Result<()> {
    let filter = pass.map(parse_pass).transpose()?;

    let db = Database::open(config.database_path())?;
    let counts = queue::counts(db.conn(), filter)?;
    if counts.is_empty() {
        println!("queue is empty");
    }
    for (pass, ready, total) in counts {
        println!("{pass}: {ready} ready / {total} total");
    }
    db.close()?;
    Ok(())
}

pub fn run_expire(config: &Config, pass: &str) -> Result<()> {
    let pass = parse_pass(pass)?;

    let db = Database::open(config.database_path())?;
    let n = queue::force_expire(db.conn(), pass)?;
    println!("{n} entries of {pass} now ready");
    db.close()?;
    Ok(())
}
