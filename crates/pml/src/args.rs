use std::path::PathBuf;

use clap::Parser;
use piecemeal::config::Config;

/// Find out which pieces of a torrent can be rebuilt from local files.
#[derive(Parser, Debug)]
#[clap(name = "pml")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// The .torrent file.
    pub torrent: PathBuf,

    /// Directories where the files may be. They are scanned one after the
    /// other, stopping as soon as every piece is matched.
    #[clap(required = true)]
    pub dirs: Vec<PathBuf>,

    /// How many pieces are searched at the same time.
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Give up on a piece after hashing this many combinations.
    #[clap(short, long)]
    pub max_combinations: Option<u64>,

    /// Only try local files with the exact size of a torrent file.
    #[clap(long)]
    pub no_fallback: bool,

    /// Use this configuration file instead of the one in the user's config
    /// folder.
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[clap(short, long)]
    pub log_file: Option<PathBuf>,

    /// Debug logs, and one line per piece in the report.
    #[clap(short, long)]
    pub verbose: bool,
}

impl Args {
    /// CLI flags override the configuration file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_combinations) = self.max_combinations {
            config.max_combinations = max_combinations;
        }
        if self.no_fallback {
            config.fallback_search = false;
        }
    }
}
