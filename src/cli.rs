// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::duration::parse_duration;

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run a graph of work items through pluggable workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the graph file (TOML, or JSON with a `.json` extension).
    ///
    /// Default: `Flowdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Template variable, overriding `[vars]` in the graph file.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Override `max_concurrency` from the graph file.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Cancel the run after this long (e.g. `30s`, `2m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub deadline: Option<Duration>,

    /// Print the run report as JSON instead of a summary.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_and_deadline_parse() {
        let args = CliArgs::try_parse_from([
            "flowdag",
            "--var",
            "topic=rust = fun",
            "--var",
            "lang=en",
            "--deadline",
            "2m",
        ])
        .unwrap();
        assert_eq!(
            args.vars,
            vec![
                ("topic".to_string(), "rust = fun".to_string()),
                ("lang".to_string(), "en".to_string())
            ]
        );
        assert_eq!(args.deadline, Some(Duration::from_secs(120)));
        assert_eq!(args.config, "Flowdag.toml");
    }

    #[test]
    fn malformed_var_is_rejected() {
        assert!(CliArgs::try_parse_from(["flowdag", "--var", "novalue"]).is_err());
    }
}
