//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start monitoring (the default)
//! - list: print active PRs from the store
//! - ignore / mute: hide a PR
//! - clear-ignored / clear-muted: forget hide flags and sweep
//! - recheck: recheck a PR as if it had just been opened

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pr-monitor - pull requests waiting on your review
#[derive(Parser, Debug)]
#[command(name = "pr-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Monitor until interrupted, printing the list on every change
    Run,

    /// Print PRs that need attention
    List,

    /// Hide a PR permanently
    Ignore {
        /// PR key, e.g. acme/widgets#42
        key: String,
    },

    /// Hide a PR until review is re-requested from you
    Mute {
        /// PR key, e.g. acme/widgets#42
        key: String,
    },

    /// Forget every ignored PR and refresh
    ClearIgnored,

    /// Forget every muted PR and refresh
    ClearMuted,

    /// Recheck a PR on the escalating schedule, then keep monitoring
    Recheck {
        /// PR key, e.g. acme/widgets#42
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_no_args() {
        // No args means run
        let cli = Cli::try_parse_from(["pr-monitor"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["pr-monitor", "-v"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["pr-monitor", "-c", "/path/to/config.yaml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/config.yaml")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pr-monitor", "list", "--verbose", "--config", "x.yml"]).unwrap();
        assert_eq!(cli.command, Some(Commands::List));
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
    }

    #[test]
    fn test_ignore_takes_key() {
        let cli = Cli::try_parse_from(["pr-monitor", "ignore", "acme/widgets#42"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Ignore {
                key: "acme/widgets#42".to_string()
            })
        );
    }

    #[test]
    fn test_mute_and_recheck() {
        let cli = Cli::try_parse_from(["pr-monitor", "mute", "acme/widgets#1"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Mute { .. })));

        let cli = Cli::try_parse_from(["pr-monitor", "recheck", "acme/widgets#1"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Recheck { .. })));
    }

    #[test]
    fn test_clear_commands_are_kebab_case() {
        let cli = Cli::try_parse_from(["pr-monitor", "clear-ignored"]).unwrap();
        assert_eq!(cli.command, Some(Commands::ClearIgnored));

        let cli = Cli::try_parse_from(["pr-monitor", "clear-muted"]).unwrap();
        assert_eq!(cli.command, Some(Commands::ClearMuted));
    }

    #[test]
    fn test_ignore_requires_key() {
        assert!(Cli::try_parse_from(["pr-monitor", "ignore"]).is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
