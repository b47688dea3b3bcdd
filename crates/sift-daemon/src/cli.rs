//! CLI argument parsing for `sift`.
//!
//! CLI flags override every other config source.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sift_types::Stage;
use thiserror::Error;

/// Faceted search over a sift index
#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/sift/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the local index directory
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a search and print results with facets
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the compiled engine request without running it
    Explain {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Index records from a JSON file
    Index {
        /// File holding one record or an array of records
        file: PathBuf,

        /// Buffer writes and flush them per type at the end
        #[arg(long)]
        bulk: bool,

        /// Index every record into this stage only
        #[arg(long, value_parser = parse_stage)]
        stage: Option<Stage>,
    },

    /// Remove a record's document
    Remove {
        /// Content type name
        type_name: String,

        /// Record id
        id: u64,

        /// Stage to remove from (default: every stage)
        #[arg(long, value_parser = parse_stage)]
        stage: Option<Stage>,
    },

    /// Rebuild the index from a JSON records file, stage by stage
    Reindex {
        /// File holding the records of every type
        file: PathBuf,

        /// Restrict to these types (default: every configured type)
        #[arg(long = "type")]
        types: Vec<String>,

        #[arg(long, default_value = "100")]
        batch_size: usize,

        /// Stop at the first failing record
        #[arg(long)]
        fail_fast: bool,
    },

    /// Delete documents not edited for a while
    Prune {
        /// `Field:value` restriction
        #[arg(long)]
        filter: Option<String>,

        /// Age in days after which a document is stale
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Seconds between runs once drained (0 prunes once)
        #[arg(long)]
        repeat_secs: Option<u64>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Only report how many documents are eligible
        #[arg(long)]
        estimate: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Arguments shared by `search` and `explain`.
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Free-text query
    #[arg(default_value = "")]
    pub query: String,

    /// Extra request parameters as a query string,
    /// e.g. `aggregation[Category][]=A&sort=Title&dir=asc`
    #[arg(short, long, default_value = "")]
    pub params: String,

    /// Facet field, optionally with a label: `Category` or `Category=Kind`
    #[arg(short, long = "facet", value_parser = parse_facet)]
    pub facets: Vec<(String, String)>,

    /// Field boost: `Title=3`
    #[arg(short, long = "boost", value_parser = parse_boost)]
    pub boosts: Vec<(String, f32)>,

    /// Restrict to a type and its subtypes
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,

    #[arg(long, value_parser = parse_stage, default_value = "live")]
    pub stage: Stage,

    /// First result (zero-based)
    #[arg(long)]
    pub start: Option<usize>,

    #[arg(long)]
    pub limit: Option<usize>,

    /// Search filter-only when the query is empty
    #[arg(long)]
    pub browse: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum ArgError {
    #[error("invalid facet '{0}', expected Field or Field=Label")]
    InvalidFacet(String),

    #[error("invalid boost '{0}', expected Field=number")]
    InvalidBoost(String),

    #[error("unknown stage '{0}', expected draft, live or unversioned")]
    InvalidStage(String),
}

pub fn parse_facet(arg: &str) -> Result<(String, String), ArgError> {
    let (field, label) = match arg.split_once('=') {
        Some((field, label)) => (field.trim(), label.trim()),
        None => (arg.trim(), arg.trim()),
    };
    if field.is_empty() || label.is_empty() {
        return Err(ArgError::InvalidFacet(arg.to_string()));
    }
    Ok((field.to_string(), label.to_string()))
}

pub fn parse_boost(arg: &str) -> Result<(String, f32), ArgError> {
    let invalid = || ArgError::InvalidBoost(arg.to_string());
    let (field, boost) = arg.split_once('=').ok_or_else(invalid)?;
    let boost: f32 = boost.trim().parse().map_err(|_| invalid())?;
    if field.trim().is_empty() {
        return Err(invalid());
    }
    Ok((field.trim().to_string(), boost))
}

pub fn parse_stage(arg: &str) -> Result<Stage, ArgError> {
    arg.parse()
        .map_err(|_| ArgError::InvalidStage(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_search_with_facets() {
        let cli = Cli::parse_from([
            "sift",
            "search",
            "open source",
            "--facet",
            "Category",
            "-f",
            "Tags=Tag",
            "--boost",
            "Title=3",
            "--json",
        ]);
        match cli.command {
            Commands::Search { query, json } => {
                assert!(json);
                assert_eq!(query.query, "open source");
                assert_eq!(
                    query.facets,
                    vec![
                        ("Category".to_string(), "Category".to_string()),
                        ("Tags".to_string(), "Tag".to_string())
                    ]
                );
                assert_eq!(query.boosts, vec![("Title".to_string(), 3.0)]);
                assert_eq!(query.stage, Stage::Live);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_explain_draft_stage() {
        let cli = Cli::parse_from(["sift", "explain", "news", "--stage", "draft"]);
        match cli.command {
            Commands::Explain { query } => assert_eq!(query.stage, Stage::Draft),
            _ => panic!("Expected Explain command"),
        }
    }

    #[test]
    fn test_cli_index_bulk() {
        let cli = Cli::parse_from(["sift", "index", "records.json", "--bulk"]);
        match cli.command {
            Commands::Index { file, bulk, stage } => {
                assert_eq!(file, PathBuf::from("records.json"));
                assert!(bulk);
                assert_eq!(stage, None);
            }
            _ => panic!("Expected Index command"),
        }
    }

    #[test]
    fn test_cli_remove() {
        let cli = Cli::parse_from(["sift", "remove", "Article", "42", "--stage", "live"]);
        match cli.command {
            Commands::Remove {
                type_name,
                id,
                stage,
            } => {
                assert_eq!(type_name, "Article");
                assert_eq!(id, 42);
                assert_eq!(stage, Some(Stage::Live));
            }
            _ => panic!("Expected Remove command"),
        }
    }

    #[test]
    fn test_cli_prune_overrides() {
        let cli = Cli::parse_from([
            "sift",
            "prune",
            "--filter",
            "ClassName:Event",
            "--older-than-days",
            "90",
            "--repeat-secs",
            "86400",
        ]);
        match cli.command {
            Commands::Prune {
                filter,
                older_than_days,
                repeat_secs,
                batch_size,
                estimate,
            } => {
                assert_eq!(filter.as_deref(), Some("ClassName:Event"));
                assert_eq!(older_than_days, Some(90));
                assert_eq!(repeat_secs, Some(86400));
                assert_eq!(batch_size, None);
                assert!(!estimate);
            }
            _ => panic!("Expected Prune command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "sift",
            "--config",
            "/etc/sift.toml",
            "config",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config.as_deref(), Some("/etc/sift.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_cli_rejects_bad_stage() {
        assert!(Cli::try_parse_from(["sift", "remove", "Article", "1", "--stage", "old"]).is_err());
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(
            parse_facet("Category = Kind").unwrap(),
            ("Category".into(), "Kind".into())
        );
        assert!(parse_facet("=Kind").is_err());
        assert_eq!(parse_boost("Title=2.5").unwrap(), ("Title".into(), 2.5));
        assert_eq!(
            parse_boost("Title"),
            Err(ArgError::InvalidBoost("Title".into()))
        );
        assert!(parse_boost("Title=high").is_err());
        assert_eq!(parse_stage("Stage").unwrap(), Stage::Draft);
    }
}
