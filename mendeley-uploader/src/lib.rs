pub mod cli;
pub mod dashboard;
pub mod load_config;
pub mod mendeley;
pub mod oauth;
pub mod telemetry;

pub use cli::{run, Cli, Commands};
