pub mod calibration;
pub mod config;
pub mod dataset;
pub mod elo;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod game_log;
pub mod historical_dataset;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod schema;
pub mod synthetic;
pub mod team_fixtures;
pub mod teams;
pub mod trainer;

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `info,rinkcast=debug`. Safe to call more than once.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rinkcast=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
