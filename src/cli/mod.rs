//! CLI module for dropcatch - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
