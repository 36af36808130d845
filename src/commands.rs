//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use ragpipe::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { question, .. } => println!("asking {question:?}"),
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the YAML config. Defaults to `config.yaml` in the config directory.
    #[arg(long, short = 'c', global = true, env = "RAGPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Answer a question from the configured collection.
    ///
    /// If the question is not provided on the command line, a default question
    /// will be used.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: Option<String>,

        /// Override the configured number of documents to retrieve.
        #[arg(long = "top-k", short = 'k')]
        top_k: Option<usize>,

        /// Print the retrieved documents instead of asking the model.
        #[arg(long, short = 'd')]
        documents: bool,
    },

    /// Embed text files into the configured collection.
    #[clap(name = "ingest", alias = "i")]
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },

    /// Print how many documents the configured collection holds.
    Count,

    /// List the collections under the configured storage path.
    Collections,

    /// Write a default config file to the config directory.
    Init,
}
