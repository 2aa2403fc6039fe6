//! Server configuration.
//!
//! Everything a request needs from the environment is collected once at
//! startup into an immutable [`ServerConfig`] and passed by reference; no
//! global state is mutated after that point.

use clap::Parser;
use std::path::PathBuf;

/// pixd - pixel store backend for 5-dimensional scientific images
#[derive(Parser, Debug)]
#[command(name = "pixd")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Repository root directory
    #[arg(short, long, env = "PIXD_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Request parameters as ordered Name=Value pairs
    #[arg(trailing_var_arg = true)]
    pub params: Vec<String>,
}

/// Immutable per-process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Repository root; `Pixels/` and `Files/` live underneath.
    pub root: PathBuf,

    /// True when a gateway (CGI) invoked us and responses carry headers.
    pub interactive: bool,
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>, interactive: bool) -> Self {
        Self {
            root: root.into(),
            interactive,
        }
    }

    /// Scratch space for archive assembly.
    pub fn archive_scratch(&self) -> PathBuf {
        self.root.join("Files")
    }
}
