//! Scan directory trees for candidate files.
use std::path::{Path, PathBuf};

use hashbrown::{HashMap, HashSet};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Error;

/// Position of a [`Candidate`] inside a [`CandidateIndex`].
pub type CandidateId = usize;

/// A local file that may hold some of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
}

impl Candidate {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), size }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// All candidates found so far, indexed by size.
///
/// The index is only written to between matching runs, during a run it is
/// shared read-only by every piece task.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    candidates: Vec<Candidate>,
    by_size: HashMap<u64, Vec<CandidateId>>,
    paths: HashSet<PathBuf>,
}

impl CandidateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate, returning its id. Paths already in the index are
    /// ignored and return `None`.
    pub fn insert(&mut self, candidate: Candidate) -> Option<CandidateId> {
        if !self.paths.insert(candidate.path.clone()) {
            return None;
        }

        let id = self.candidates.len();
        self.by_size.entry(candidate.size).or_default().push(id);
        self.candidates.push(candidate);

        Some(id)
    }

    pub fn get(&self, id: CandidateId) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CandidateId, &Candidate)> {
        self.candidates.iter().enumerate()
    }

    /// Candidates with exactly `size` bytes, in insertion order.
    pub fn with_size(&self, size: u64) -> &[CandidateId] {
        self.by_size.get(&size).map(Vec::as_slice).unwrap_or_default()
    }

    /// Candidates with at least `min` bytes, in insertion order.
    pub fn at_least(&self, min: u64) -> Vec<CandidateId> {
        self.iter().filter(|(_, c)| c.size >= min).map(|(id, _)| id).collect()
    }
}

impl Extend<Candidate> for CandidateIndex {
    fn extend<T: IntoIterator<Item = Candidate>>(&mut self, iter: T) {
        for candidate in iter {
            self.insert(candidate);
        }
    }
}

/// Walk `root` and return every regular file under it, sorted by path.
///
/// Entries that can't be read are logged and skipped. Symlinks to files are
/// followed, symlinks to directories are not, to stay out of cycles.
///
/// # Errors
///
/// Fails only if `root` itself can't be read.
#[tracing::instrument(skip(root), fields(root = %root.as_ref().display()))]
pub async fn scan(
    root: impl AsRef<Path>,
    skip_empty: bool,
) -> Result<Vec<Candidate>, Error> {
    let root = root.as_ref();

    let metadata = fs::metadata(root)
        .await
        .map_err(|_| Error::FolderOpenError(root.display().to_string()))?;

    if metadata.is_file() {
        return Ok(vec![Candidate::new(root, metadata.len())]);
    }

    let mut candidates = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => {
                debug!("could not read root: {e}");
                return Err(Error::FolderOpenError(root.display().to_string()));
            }
            Err(e) => {
                warn!("skipping {dir:?}: {e}");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("stopped reading {dir:?}: {e}");
                    break;
                }
            };

            let path = entry.path();

            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    warn!("skipping {path:?}: {e}");
                    continue;
                }
            };

            if file_type.is_dir() {
                dirs.push(path);
                continue;
            }

            // follows symlinks
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping {path:?}: {e}");
                    continue;
                }
            };

            if !metadata.is_file() || (skip_empty && metadata.len() == 0) {
                continue;
            }

            candidates.push(Candidate::new(path, metadata.len()));
        }
    }

    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("found {} candidates", candidates.len());

    Ok(candidates)
}
