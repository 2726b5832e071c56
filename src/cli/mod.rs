//! CLI module for pr-monitor - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
