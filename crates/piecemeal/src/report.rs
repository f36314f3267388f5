//! Results of a matching run.
use std::{collections::BTreeMap, fmt, ops::Range, path::PathBuf};

use bitvec::{bitvec, order::Msb0, vec::BitVec};

use crate::{
    metainfo::{Info, Sha1Hash},
    piece::{PayloadPiece, PieceState},
    utils::{percentage, to_human_readable},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceReport {
    pub index: usize,
    pub size: u64,
    pub state: PieceState,
}

/// How much of a payload file can be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub index: usize,
    pub path: PathBuf,
    pub length: u64,
    /// 1-based indices of the pieces that overlap the file. Empty for empty
    /// files.
    pub pieces: Range<usize>,
    /// How many of those pieces are matched.
    pub matched: usize,
}

impl FileReport {
    pub fn total(&self) -> usize {
        self.pieces.len()
    }

    /// If every piece of the file is matched.
    pub fn is_recoverable(&self) -> bool {
        self.matched == self.total()
    }
}

/// Outcome of every piece, ordered by piece index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Report {
    pub name: String,
    pub info_hash: Sha1Hash,
    pub payload_size: u64,
    pub piece_length: u64,
    pub pieces: BTreeMap<usize, PieceReport>,
    pub files: Vec<FileReport>,
}

impl Report {
    pub fn new(
        info: &Info,
        pieces: &[PayloadPiece],
        states: &BTreeMap<usize, PieceState>,
    ) -> Self {
        let pieces: BTreeMap<usize, PieceReport> = pieces
            .iter()
            .map(|piece| {
                let state =
                    states.get(&piece.index).cloned().unwrap_or_default();
                let report =
                    PieceReport { index: piece.index, size: piece.size, state };
                (piece.index, report)
            })
            .collect();

        let files = info
            .payload_files()
            .into_iter()
            .map(|file| {
                let range = if file.length == 0 {
                    let i = (file.offset / info.piece_length) as usize + 1;
                    i..i
                } else {
                    let first = file.offset / info.piece_length;
                    let last = (file.end() - 1) / info.piece_length;
                    first as usize + 1..last as usize + 2
                };

                let matched = range
                    .clone()
                    .filter(|i| {
                        pieces.get(i).is_some_and(|p| p.state.is_matched())
                    })
                    .count();

                FileReport {
                    index: file.index,
                    path: file.path,
                    length: file.length,
                    pieces: range,
                    matched,
                }
            })
            .collect();

        Self {
            name: info.name.clone(),
            info_hash: info.info_hash,
            payload_size: info.payload_size(),
            piece_length: info.piece_length,
            pieces,
            files,
        }
    }

    fn count(&self, f: impl Fn(&PieceState) -> bool) -> usize {
        self.pieces.values().filter(|p| f(&p.state)).count()
    }

    pub fn matched(&self) -> usize {
        self.count(PieceState::is_matched)
    }

    pub fn unmatched(&self) -> usize {
        self.count(|s| matches!(s, PieceState::Unmatched { .. }))
    }

    pub fn inconclusive(&self) -> usize {
        self.count(|s| matches!(s, PieceState::Inconclusive { .. }))
    }

    /// Pieces that were never searched, or whose search was cancelled.
    pub fn unresolved(&self) -> usize {
        self.count(|s| {
            matches!(s, PieceState::Unresolved | PieceState::Searching)
        })
    }

    /// Bytes of the payload covered by matched pieces.
    pub fn recovered_bytes(&self) -> u64 {
        self.pieces
            .values()
            .filter(|p| p.state.is_matched())
            .map(|p| p.size)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.matched() == self.pieces.len()
    }

    /// One bit per piece, set when the piece is matched. The first piece is
    /// the most significant bit of the first byte, like the bitfield message
    /// of the wire protocol.
    pub fn bitfield(&self) -> BitVec<u8, Msb0> {
        let mut bitfield = bitvec![u8, Msb0; 0; self.pieces.len()];

        for (i, piece) in self.pieces.values().enumerate() {
            bitfield.set(i, piece.state.is_matched());
        }

        bitfield
    }

    pub fn recoverable_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.is_recoverable())
    }
}

/// A summary with one line per file. The alternate form, `{:#}`, also has
/// one line per piece.
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.name, self.info_hash)?;
        writeln!(
            f,
            "{} pieces of {}, {}",
            self.pieces.len(),
            to_human_readable(self.piece_length as f64),
            to_human_readable(self.payload_size as f64),
        )?;
        writeln!(
            f,
            "matched: {}  unmatched: {}  inconclusive: {}  unresolved: {}",
            self.matched(),
            self.unmatched(),
            self.inconclusive(),
            self.unresolved(),
        )?;
        writeln!(
            f,
            "recovered {} of {} ({:.2}%)",
            to_human_readable(self.recovered_bytes() as f64),
            to_human_readable(self.payload_size as f64),
            percentage(self.recovered_bytes(), self.payload_size),
        )?;

        if f.alternate() {
            writeln!(f, "pieces:")?;
            for piece in self.pieces.values() {
                write!(f, "  {:>6} ", piece.index)?;
                match &piece.state {
                    PieceState::Matched(resolution) => {
                        let paths: Vec<String> = resolution
                            .assignments
                            .iter()
                            .map(|a| {
                                format!(
                                    "{} [{}..{}]",
                                    a.path.display(),
                                    a.file_range.start,
                                    a.file_range.end
                                )
                            })
                            .collect();
                        writeln!(f, "matched {}", paths.join(", "))?;
                    }
                    PieceState::Unmatched { tried } => {
                        writeln!(f, "unmatched after {tried} combinations")?;
                    }
                    PieceState::Inconclusive { tried } => {
                        writeln!(f, "inconclusive after {tried} combinations")?;
                    }
                    PieceState::Unresolved | PieceState::Searching => {
                        writeln!(f, "unresolved")?;
                    }
                }
            }
        }

        writeln!(f, "files:")?;
        for file in &self.files {
            let mark = if file.is_recoverable() { "ok" } else { "--" };
            writeln!(
                f,
                "  [{mark}] {} {}/{} pieces",
                file.path.display(),
                file.matched,
                file.total()
            )?;
        }

        Ok(())
    }
}
