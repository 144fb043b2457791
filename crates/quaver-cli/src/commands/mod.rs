pub mod check;
pub mod health;
pub mod merge;
pub mod queue;
pub mod run;
pub mod seed;

pub use check::run_check;
pub use health::show_health;
pub use merge::run_merge;
pub use queue::{run_dispatch, run_expire, show_inflight};
pub use run::run_pipeline;
pub use seed::run_seed;
