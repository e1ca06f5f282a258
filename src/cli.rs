//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use boardsync_core::config::DEFAULT_CONFIG_PATH;

/// Watch imageboard threads and mirror their media files.
///
/// Boardsync polls the configured boards, picks threads matching the
/// configured substrings, and downloads every new file into the board's
/// directory. Runs until interrupted unless `--once` is given.
#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Crawl cursor file (overrides `cursor_path` from the config)
    #[arg(long)]
    pub cursor: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Maximum concurrent downloads (1-100, overrides the config)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Attempts per file including the first (1-20, overrides the config)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Log level used when `RUST_LOG` is not set.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["boardsync"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.cursor, None);
        assert!(!args.once);
        assert_eq!(args.concurrency, None);
        assert_eq!(args.max_attempts, None);
        assert_eq!(args.default_log_level(), "info");
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["boardsync", "-v"]).unwrap();
        assert_eq!(args.default_log_level(), "debug");

        let args = Args::try_parse_from(["boardsync", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.default_log_level(), "trace");
    }

    #[test]
    fn test_cli_quiet_wins_over_verbose() {
        let args = Args::try_parse_from(["boardsync", "-q", "-v"]).unwrap();
        assert_eq!(args.default_log_level(), "error");
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["boardsync", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["boardsync", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_overrides_parse() {
        let args = Args::try_parse_from([
            "boardsync",
            "--config",
            "/etc/boardsync.json",
            "--cursor",
            "state/lasthits.json",
            "--once",
            "-c",
            "8",
            "--max-attempts",
            "3",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("/etc/boardsync.json"));
        assert_eq!(args.cursor, Some(PathBuf::from("state/lasthits.json")));
        assert!(args.once);
        assert_eq!(args.concurrency, Some(8));
        assert_eq!(args.max_attempts, Some(3));
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let result = Args::try_parse_from(["boardsync", "-c", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_max_attempts_over_max_rejected() {
        let result = Args::try_parse_from(["boardsync", "--max-attempts", "21"]);
        assert!(result.is_err());
    }
}
