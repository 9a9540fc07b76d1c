//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rq - fetch URLs through a bounded, retrying request scheduler
#[derive(Parser)]
#[command(
    name = "rq",
    about = "Fetch URLs through a bounded, retrying request scheduler",
    version,
    after_help = "Logs are written to: ~/.local/share/reqsched/logs/reqsched.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// GET every URL through one scheduler and report each outcome
    Fetch {
        /// URLs to fetch
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Override scheduler.max-concurrent
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Override scheduler.max-retries
        #[arg(long)]
        max_retries: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for fetch results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reqsched")
        .join("logs")
        .join("reqsched.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "rq",
            "--verbose",
            "fetch",
            "https://example.com/a",
            "https://example.com/b",
            "--max-concurrent",
            "4",
            "--format",
            "json",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Command::Fetch {
                urls,
                max_concurrent,
                max_retries,
                format,
            } => {
                assert_eq!(urls.len(), 2);
                assert_eq!(max_concurrent, Some(4));
                assert_eq!(max_retries, None);
                assert_eq!(format, OutputFormat::Json);
            }
            Command::Config => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_fetch_requires_url() {
        assert!(Cli::try_parse_from(["rq", "fetch"]).is_err());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("reqsched/logs/reqsched.log"));
    }
}
