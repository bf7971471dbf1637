use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// worksync - keep work items in step with mail conversations
#[derive(Parser, Debug)]
#[command(name = "worksync")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.worksync/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a single synchronization pass and exit
    #[arg(long)]
    pub once: bool,

    /// Show what would be written without changing any work item
    #[arg(short = 'w', long)]
    pub what_if: bool,

    /// Log filter, e.g. "info" or "worksync=debug"
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Append logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("worksync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn no_arguments_are_required() {
        let args = parse(&[]);
        assert_eq!(args.config, None);
        assert!(!args.once);
        assert!(!args.what_if);
        assert_eq!(args.log_level, "info");
        assert_eq!(args.log_file, None);
    }

    #[test]
    fn parses_all_flags() {
        let args = parse(&[
            "--config",
            "/etc/worksync.toml",
            "--once",
            "-w",
            "--log-level",
            "worksync=debug",
            "--log-file",
            "/var/log/worksync.log",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/worksync.toml")));
        assert!(args.once);
        assert!(args.what_if);
        assert_eq!(args.log_level, "worksync=debug");
        assert_eq!(args.log_file, Some(PathBuf::from("/var/log/worksync.log")));
    }

    #[test]
    fn long_what_if_flag() {
        assert!(parse(&["--what-if"]).what_if);
    }

    #[test]
    fn short_config_flag() {
        assert_eq!(parse(&["-c", "a.toml"]).config, Some(PathBuf::from("a.toml")));
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["worksync", "--bogus"]).is_err());
    }
}
