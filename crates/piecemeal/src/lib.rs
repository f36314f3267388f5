//! A library to find out which pieces of a torrent can be rebuilt from files
//! that are already on disk.
//!
//! A download that was moved, renamed or interrupted often leaves most of the
//! payload lying around. Given the `.torrent` metafile and a few directories,
//! this crate slices the payload into its pieces, maps every piece to the
//! torrent files that contribute to it, looks for local files that could
//! stand in for those torrent files, and tries combinations of them until the
//! bytes hash to the piece's SHA-1.
//!
//! # Example
//!
//! ```no_run
//! use piecemeal::{config::Config, finder::Finder, metainfo::MetaInfo};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), piecemeal::error::Error> {
//! let buf = tokio::fs::read("debian.torrent").await?;
//! let meta_info = MetaInfo::from_bytes(&buf)?;
//!
//! let mut finder = Finder::new(&meta_info, Config::default());
//! finder.scan("/home/me/Downloads").await?;
//!
//! let report = finder.run(CancellationToken::new()).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod config;
pub mod contrib;
pub mod error;
pub mod finder;
pub mod matcher;
pub mod metainfo;
pub mod piece;
pub mod report;
pub mod scanner;
pub mod utils;
