//! sift
//!
//! Faceted full-text search with staged indexing and stale document pruning.
//!
//! # Usage
//!
//! ```bash
//! sift search "open source" --facet Category --params 'aggregation[Category][]=A'
//! sift explain "open source" --stage draft
//! sift index records.json --bulk
//! sift reindex records.json
//! sift prune --older-than-days 90 --filter ClassName:Event
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/sift/config.toml)
//! 3. Environment variables (SIFT_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use sift_daemon::{
    explain, init_logging, load_settings, open_engine, prune_estimate, render_job_status,
    render_reindex, render_search, run_index, run_prune, run_reindex, run_remove, run_search,
    show_config, Cli, Commands,
};
use sift_indexing::ReindexConfig;
use sift_types::FieldRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;
    let registry = FieldRegistry::from_definitions(&settings.types);

    match cli.command {
        Commands::Search { query, json } => {
            let engine = open_engine(&settings, &registry).await?;
            let output = run_search(engine, &settings, &registry, &query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", render_search(&output));
            }
        }
        Commands::Explain { query } => {
            let body = explain(&settings, &registry, &query);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Index { file, bulk, stage } => {
            let engine = open_engine(&settings, &registry).await?;
            let summary = run_index(engine, registry, &file, bulk, stage).await?;
            println!(
                "indexed {}, buffered {}, flushed {}, removed {}, failed {}",
                summary.indexed, summary.buffered, summary.flushed, summary.removed, summary.failed
            );
        }
        Commands::Remove {
            type_name,
            id,
            stage,
        } => {
            let engine = open_engine(&settings, &registry).await?;
            let removed = run_remove(engine, &type_name, id, stage).await?;
            println!("removed {removed} document(s)");
        }
        Commands::Reindex {
            file,
            types,
            batch_size,
            fail_fast,
        } => {
            let engine = open_engine(&settings, &registry).await?;
            let config = ReindexConfig::default()
                .with_types(types)
                .with_batch_size(batch_size)
                .with_continue_on_error(!fail_fast);
            let report = run_reindex(engine, registry, &file, config).await?;
            print!("{}", render_reindex(&report));
        }
        Commands::Prune {
            filter,
            older_than_days,
            repeat_secs,
            batch_size,
            estimate,
        } => {
            let mut prune = settings.prune.clone();
            if filter.is_some() {
                prune.filter = filter;
            }
            if let Some(days) = older_than_days {
                prune.older_than_days = days;
            }
            if let Some(secs) = repeat_secs {
                prune.repeat_secs = secs;
            }
            if let Some(size) = batch_size {
                prune.batch_size = size;
            }

            let engine = open_engine(&settings, &registry).await?;
            if estimate {
                println!("{} document(s) eligible", prune_estimate(engine, &prune).await?);
            } else if let Some(status) = run_prune(engine, &prune).await? {
                print!("{}", render_job_status(&status));
            }
        }
        Commands::Config => {
            print!("{}", show_config(&settings)?);
        }
    }

    Ok(())
}
