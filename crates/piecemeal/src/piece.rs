//! Pieces of the payload and their matching state.
use std::ops::Range;

use crate::{
    matcher::Resolution,
    metainfo::{Info, Sha1Hash},
};

/// A slice of the logical payload stream with its expected hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPiece {
    /// 1-based ordinal of the piece.
    pub index: usize,
    /// Inclusive start of the piece in the logical stream.
    pub offset: u64,
    /// Size in bytes, `piece_length` for all but possibly the last piece.
    pub size: u64,
    pub hash: Sha1Hash,
}

impl PayloadPiece {
    /// Exclusive end of the piece in the logical stream.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }

    /// The part of `[start, end)` that falls inside this piece, in stream
    /// offsets. `None` when they don't intersect.
    pub fn overlap(&self, start: u64, end: u64) -> Option<Range<u64>> {
        let overlap_start = self.offset.max(start);
        let overlap_end = self.end().min(end);

        (overlap_start < overlap_end).then_some(overlap_start..overlap_end)
    }
}

/// Slice the payload described by `info` into its pieces.
///
/// Every piece has `info.piece_length` bytes except the last one, which has
/// whatever is left. When the payload is evenly divisible the last piece is a
/// full one.
pub fn payload_pieces(info: &Info) -> Vec<PayloadPiece> {
    let count = info.piece_count();
    let mut offset = 0_u64;

    info.pieces
        .iter()
        .enumerate()
        .map(|(i, hash)| {
            let index = i + 1;
            let size = if index == count {
                info.last_piece_size()
            } else {
                info.piece_length
            };

            let piece = PayloadPiece { index, offset, size, hash: *hash };
            offset += size;
            piece
        })
        .collect()
}

/// Where a piece is in the matching process.
///
/// `Unresolved -> Searching -> {Matched | Unmatched | Inconclusive}`.
/// Unmatched and inconclusive pieces go back to `Unresolved` when new
/// candidate files are added, matched pieces stay matched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PieceState {
    #[default]
    Unresolved,
    Searching,
    Matched(Resolution),
    /// Every combination of candidates was tried, none hashed right.
    Unmatched { tried: u64 },
    /// The search ran out of budget before trying every combination.
    Inconclusive { tried: u64 },
}

impl PieceState {
    pub fn is_matched(&self) -> bool {
        matches!(self, PieceState::Matched(_))
    }

    /// If the piece should be searched again once new candidates show up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PieceState::Unresolved
                | PieceState::Unmatched { .. }
                | PieceState::Inconclusive { .. }
        )
    }
}
