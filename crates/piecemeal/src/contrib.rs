//! Files contributing to a piece.
//!
//! A piece that lies inside a single payload file has one contributing file,
//! a piece that crosses file boundaries has one per file it touches. Each
//! contributing file carries the local candidates that may supply its bytes.
use std::ops::Range;

use crate::{
    metainfo::PayloadFile,
    piece::PayloadPiece,
    scanner::{CandidateId, CandidateIndex},
};

/// The overlap between one payload file and one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributingFile {
    /// Index of the payload file in the torrent's file list.
    pub file: usize,
    /// Overlapping bytes, relative to the start of the payload file.
    pub file_range: Range<u64>,
    /// Overlapping bytes, relative to the start of the piece.
    pub piece_range: Range<u64>,
    /// Candidates with the exact size of the payload file. Candidates with
    /// the same file name come first.
    pub hinted: Vec<CandidateId>,
    /// Every candidate large enough to hold `file_range`, same ordering.
    pub fallback: Vec<CandidateId>,
}

impl ContributingFile {
    /// Number of bytes this file contributes to the piece.
    #[inline]
    pub fn len(&self) -> u64 {
        self.file_range.end - self.file_range.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The payload files overlapping `piece`, in stream order, with the local
/// candidates of each one.
pub fn contributing_files(
    piece: &PayloadPiece,
    files: &[PayloadFile],
    index: &CandidateIndex,
) -> Vec<ContributingFile> {
    files
        .iter()
        .filter_map(|file| {
            let overlap = piece.overlap(file.offset, file.end())?;

            let file_range =
                overlap.start - file.offset..overlap.end - file.offset;
            let piece_range =
                overlap.start - piece.offset..overlap.end - piece.offset;

            let hinted = by_name(
                index.with_size(file.length).to_vec(),
                file,
                index,
            );
            let fallback =
                by_name(index.at_least(file_range.end), file, index);

            Some(ContributingFile {
                file: file.index,
                file_range,
                piece_range,
                hinted,
                fallback,
            })
        })
        .collect()
}

/// If the contributing files tile the whole piece, back to back and in
/// order. A piece that isn't covered can never hash right.
pub fn covers(piece: &PayloadPiece, contribs: &[ContributingFile]) -> bool {
    let mut cursor = 0;

    for contrib in contribs {
        if contrib.piece_range.start != cursor || contrib.is_empty() {
            return false;
        }
        cursor = contrib.piece_range.end;
    }

    cursor == piece.size
}

// stable: keeps insertion order inside each group.
fn by_name(
    mut ids: Vec<CandidateId>,
    file: &PayloadFile,
    index: &CandidateIndex,
) -> Vec<CandidateId> {
    let name = file.file_name();
    ids.sort_by_key(|id| {
        let candidate_name = index.get(*id).and_then(|c| c.file_name());
        name.is_none() || candidate_name != name
    });
    ids
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{metainfo::Sha1Hash, scanner::Candidate};

    fn files(lengths: &[u64]) -> Vec<PayloadFile> {
        let mut offset = 0;
        lengths
            .iter()
            .enumerate()
            .map(|(index, length)| {
                let f = PayloadFile {
                    index,
                    path: PathBuf::from(format!("root/f{index}")),
                    length: *length,
                    offset,
                };
                offset += length;
                f
            })
            .collect()
    }

    fn piece(index: usize, offset: u64, size: u64) -> PayloadPiece {
        PayloadPiece { index, offset, size, hash: Sha1Hash::default() }
    }

    #[test]
    fn piece_inside_one_file() {
        let files = files(&[100]);
        let index = CandidateIndex::new();
        let piece = piece(2, 32, 32);

        let contribs = contributing_files(&piece, &files, &index);

        assert_eq!(contribs.len(), 1);
        assert_eq!(contribs[0].file_range, 32..64);
        assert_eq!(contribs[0].piece_range, 0..32);
        assert!(contribs[0].hinted.is_empty());
        assert!(covers(&piece, &contribs));
    }

    #[test]
    fn piece_across_file_boundaries() {
        // 10 | 0 | 4 | 30, piece covers stream bytes 8..24
        let files = files(&[10, 0, 4, 30]);
        let index = CandidateIndex::new();
        let piece = piece(2, 8, 16);

        let contribs = contributing_files(&piece, &files, &index);

        assert_eq!(
            contribs
                .iter()
                .map(|c| (c.file, c.file_range.clone(), c.piece_range.clone()))
                .collect::<Vec<_>>(),
            vec![(0, 8..10, 0..2), (2, 0..4, 2..6), (3, 0..10, 6..16)]
        );
        assert_eq!(contribs.iter().map(ContributingFile::len).sum::<u64>(), 16);
        assert!(covers(&piece, &contribs));
    }

    #[test]
    fn candidates_use_size_and_name_hints() {
        let files = files(&[16, 16]);
        let mut index = CandidateIndex::new();
        index.insert(Candidate::new("/x/other", 16)); // 0
        index.insert(Candidate::new("/x/f1", 16)); // 1
        index.insert(Candidate::new("/x/big", 64)); // 2
        index.insert(Candidate::new("/x/small", 8)); // 3

        let contribs = contributing_files(&piece(1, 0, 32), &files, &index);

        assert_eq!(contribs[0].hinted, vec![0, 1]);
        assert_eq!(contribs[1].hinted, vec![1, 0]);
        assert_eq!(contribs[0].fallback, vec![0, 1, 2]);
        assert_eq!(contribs[1].fallback, vec![1, 0, 2]);
    }

    #[test]
    fn gaps_are_not_covered() {
        let piece = piece(1, 0, 32);
        let contrib = |piece_range: Range<u64>| ContributingFile {
            file: 0,
            file_range: 0..piece_range.end - piece_range.start,
            piece_range,
            hinted: vec![],
            fallback: vec![],
        };

        assert!(!covers(&piece, &[]));
        assert!(!covers(&piece, &[contrib(0..16)]));
        assert!(!covers(&piece, &[contrib(0..16), contrib(20..32)]));
        assert!(covers(&piece, &[contrib(0..16), contrib(16..32)]));
    }
}
