//! `sift` command-line front end.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (search, index, reindex, prune, ...)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, QueryArgs};
pub use commands::{
    explain, init_logging, load_settings, open_engine, prune_estimate, render_job_status,
    render_reindex, render_search, run_index, run_prune, run_reindex, run_remove, run_search,
    show_config, IndexSummary, SearchOutput,
};
