//! # ragpipe (library root)
//!
//! A retrieve-then-generate pipeline. A [`responder::RetrievalAugmentedResponder`]
//! opens a named, persistent vector collection at startup, and for each query fetches
//! the nearest documents and either returns them or hands them to an OpenAI compatible
//! chat model as context.
//!
//! ## Modules
//! - [`responder`]: lifecycle hooks and the query entry point.
//! - [`vector_store`]: persistent collections with HNSW search.
//! - [`embedding`]: hosted (OpenAI) and local (Candle BERT) embedding functions.
//! - [`api`]: chat-completion client and prompt assembly.
//! - [`ingest`]: loading text files into a collection.
//! - [`config`], [`error`], [`commands`]: configuration, error taxonomy, CLI.
//!
//! ## Config directory
//! [`config_dir`] resolves the per-platform location of `config.yaml`, e.g.:
//!
//! - macOS: `~/Library/Application Support/com.ragpipe.ragpipe`
//! - Linux (XDG): `~/.config/ragpipe`
//! - Windows: `C:\Users\<you>\AppData\Roaming\ragpipe\ragpipe\config`

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod api;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod responder;
pub mod vector_store;

/// Return the per-platform configuration directory used by ragpipe.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```no_run
/// let cfg = ragpipe::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs =
        ProjectDirs::from("com", "ragpipe", "ragpipe").ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
