//! Command-line control surface.
//!
//! Thin wiring over the platform services: ingestion, index lifecycle,
//! search, and research workflow control.

pub mod commands;

pub use commands::execute;

use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

/// Output rendering for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Case-centric legal evidence research engine.
#[derive(Debug, Parser)]
#[command(name = "evident", version, about)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Data directory override.
    #[arg(long, global = true, env = "EVIDENT_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize the data directory and create all indexes.
    Init,
    /// Create or rebuild the domain indexes in both stores.
    Index {
        /// Drop and recreate existing indexes (destructive).
        #[arg(long)]
        recreate: bool,
    },
    /// Create a case.
    CaseNew {
        /// Globally unique case number.
        #[arg(long)]
        number: String,
        /// Client name.
        #[arg(long)]
        client: String,
        /// Matter type.
        #[arg(long, default_value = "general")]
        matter: String,
    },
    /// Ingest an evidence file into a case.
    Ingest {
        /// Case number.
        #[arg(long = "case")]
        case_number: String,
        /// Evidence modality.
        #[arg(long, default_value = "document")]
        kind: String,
        /// Path to the evidence file.
        file: std::path::PathBuf,
    },
    /// Search case evidence.
    Search {
        /// Query text.
        query: String,
        /// Case number scope.
        #[arg(long = "case")]
        case_number: Option<String>,
        /// Maximum results.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Ranker mode: hybrid, dense, or lexical.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Apply the cross-encoder second stage.
        #[arg(long)]
        rerank: bool,
    },
    /// Research workflow control.
    #[command(subcommand)]
    Research(ResearchCommands),
    /// List research runs for a case.
    Runs {
        /// Case number.
        #[arg(long = "case")]
        case_number: String,
    },
    /// Show findings of a research run.
    Findings {
        /// Research run id.
        run_id: Uuid,
        /// Minimum confidence filter.
        #[arg(long)]
        min_confidence: Option<f64>,
    },
    /// Show the case timeline.
    Timeline {
        /// Case number.
        #[arg(long = "case")]
        case_number: String,
    },
    /// Show the dossier of a research run.
    Dossier {
        /// Research run id.
        run_id: Uuid,
    },
    /// Run one orphan reaper sweep.
    Reap,
    /// Report index and workflow health.
    Health,
}

/// Research workflow subcommands.
#[derive(Debug, Subcommand)]
pub enum ResearchCommands {
    /// Start a research run and drive it to a terminal state.
    Start {
        /// Case number.
        #[arg(long = "case")]
        case_number: String,
        /// Research question.
        #[arg(long)]
        query: Option<String>,
        /// Defense theory to investigate.
        #[arg(long)]
        theory: Option<String>,
    },
    /// Drive an existing run forward (after restart or resume).
    Drive {
        /// Research run id.
        run_id: Uuid,
    },
    /// Show run status.
    Status {
        /// Research run id.
        run_id: Uuid,
    },
    /// Cancel a run at its next checkpoint.
    Cancel {
        /// Research run id.
        run_id: Uuid,
    },
    /// Pause a run at its next checkpoint.
    Pause {
        /// Research run id.
        run_id: Uuid,
    },
    /// Resume a paused run.
    Resume {
        /// Research run id.
        run_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "evident", "search", "contract damages", "--case", "2024-CV-1", "--top-k", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { query, top_k, case_number, .. } => {
                assert_eq!(query, "contract damages");
                assert_eq!(top_k, 5);
                assert_eq!(case_number.as_deref(), Some("2024-CV-1"));
            }
            other => unreachable!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_research_start() {
        let cli = Cli::try_parse_from([
            "evident", "research", "start", "--case", "C-1", "--query", "timeline",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Research(ResearchCommands::Start { .. })
        ));
    }

    #[test]
    fn test_cli_format_flag() {
        let cli = Cli::try_parse_from(["evident", "--format", "json", "health"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_cli_parses_index_recreate() {
        let cli = Cli::try_parse_from(["evident", "index", "--recreate"]).unwrap();
        assert!(matches!(cli.command, Commands::Index { recreate: true }));

        let cli = Cli::try_parse_from(["evident", "index"]).unwrap();
        assert!(matches!(cli.command, Commands::Index { recreate: false }));
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["evident", "frobnicate"]).is_err());
    }
}
