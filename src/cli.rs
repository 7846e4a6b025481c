use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Build and read single-file manga page caches.
#[derive(Debug, Parser)]
#[command(name = "komi", version, about)]
pub struct Cli {
    /// Configuration file; replaces the lookup in the platform config directory.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG`
    /// takes precedence when set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every chapter listed in a JSON manifest and write a new container.
    Build {
        manifest: PathBuf,
        /// Where to write the container (defaults to the configured cache path).
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// List the chapter table.
    List {
        /// Container to read (defaults to the configured cache path).
        path: Option<PathBuf>,
    },
    /// Look up the page images stored for a chapter key.
    Get {
        key: String,
        /// Write pages into this directory as 001.bin, 002.bin, ...
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
        /// Container to read (defaults to the configured cache path).
        #[arg(long, value_name = "PATH")]
        cache: Option<PathBuf>,
    },
    /// Show header offsets and table sizes.
    Info { path: Option<PathBuf> },
}

impl Cli {
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
