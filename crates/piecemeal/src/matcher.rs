//! Find the combination of local files that rebuilds a piece.
//!
//! Each contributing file of a piece is a slot, and each slot has a list of
//! candidates that may supply its bytes. [`SearchState`] walks the cartesian
//! product of the slots one combination at a time, [`PieceMatcher`] reads the
//! bytes of each combination, in stream order, and compares their SHA-1 with
//! the hash of the piece.
//!
//! The search has two phases: first only the hinted candidates (same size as
//! the payload file), then, if enabled, every candidate big enough to hold
//! the bytes. Both phases share one budget and one set of visited
//! combinations.
use std::{
    io::{self, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::Config,
    contrib::{contributing_files, covers, ContributingFile},
    metainfo::{PayloadFile, Sha1Hash},
    piece::PayloadPiece,
    scanner::{CandidateId, CandidateIndex},
};

/// Everything a piece search needs, shared by all piece tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct MatchCtx {
    pub config: Config,
    pub index: CandidateIndex,
    pub files: Vec<PayloadFile>,
}

impl MatchCtx {
    pub fn new(files: Vec<PayloadFile>, config: Config) -> Self {
        Self { config, index: CandidateIndex::new(), files }
    }
}

/// One candidate standing in for one contributing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Index of the payload file in the torrent's file list.
    pub file: usize,
    pub candidate: CandidateId,
    pub path: PathBuf,
    /// Bytes read from the candidate.
    pub file_range: Range<u64>,
    /// Where those bytes land in the piece.
    pub piece_range: Range<u64>,
}

/// The combination that rebuilt a piece, in stream order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Matched(Resolution),
    /// Every combination was tried.
    Unmatched { tried: u64 },
    /// The budget ran out with combinations left to try.
    Inconclusive { tried: u64 },
    /// The run was cancelled, the piece can be searched again later.
    Cancelled,
}

/// Explicit state of a combination search.
///
/// Combinations are enumerated like an odometer, the last slot spins
/// fastest, so the first combination takes the first candidate of every
/// slot.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    slots: Vec<Vec<CandidateId>>,
    cursor: Vec<usize>,
    exhausted: bool,
    visited: HashSet<Vec<CandidateId>>,
    /// (slot, candidate) pairs that could not be read.
    failed: HashSet<(usize, CandidateId)>,
    budget: u64,
    tried: u64,
}

impl SearchState {
    pub fn new(budget: u64) -> Self {
        Self { budget, exhausted: true, ..Default::default() }
    }

    /// Start enumerating a new set of slots. Visited combinations, failed
    /// candidates and the budget carry over.
    pub fn begin(&mut self, slots: Vec<Vec<CandidateId>>) {
        self.exhausted = slots.is_empty() || slots.iter().any(Vec::is_empty);
        self.cursor = vec![0; slots.len()];
        self.slots = slots;
    }

    /// The next combination not visited yet and without failed candidates.
    pub fn next_combination(&mut self) -> Option<Vec<CandidateId>> {
        while !self.exhausted {
            let combination: Vec<CandidateId> = self
                .cursor
                .iter()
                .zip(&self.slots)
                .map(|(i, slot)| slot[*i])
                .collect();

            self.advance();

            let has_failed = combination
                .iter()
                .enumerate()
                .any(|(slot, id)| self.failed.contains(&(slot, *id)));

            if has_failed || self.visited.contains(&combination) {
                continue;
            }

            return Some(combination);
        }

        None
    }

    fn advance(&mut self) {
        for i in (0..self.cursor.len()).rev() {
            self.cursor[i] += 1;
            if self.cursor[i] < self.slots[i].len() {
                return;
            }
            self.cursor[i] = 0;
        }
        self.exhausted = true;
    }

    /// Mark a combination as hashed, spending one unit of budget.
    pub fn record(&mut self, combination: Vec<CandidateId>) {
        self.visited.insert(combination);
        self.tried += 1;
        self.budget = self.budget.saturating_sub(1);
    }

    /// Never use `id` in `slot` again.
    pub fn fail(&mut self, slot: usize, id: CandidateId) {
        self.failed.insert((slot, id));
    }

    /// How many combinations were hashed.
    pub fn tried(&self) -> u64 {
        self.tried
    }

    pub fn budget_left(&self) -> u64 {
        self.budget
    }
}

enum Fragment {
    Bytes(Bytes),
    Failed,
    Cancelled,
}

enum Step {
    Hashed(Sha1Hash),
    Skipped,
    Cancelled,
}

/// Searches the combinations of one piece.
///
/// Fragments of every slot but the last are read once per (slot, candidate)
/// and kept for the duration of the search. The last slot spins fastest, so
/// its fragments are never read twice in a row and are not kept.
pub struct PieceMatcher<'a> {
    ctx: &'a MatchCtx,
    piece: &'a PayloadPiece,
    contribs: &'a [ContributingFile],
    cache: HashMap<(usize, CandidateId), Bytes>,
}

impl<'a> PieceMatcher<'a> {
    pub fn new(
        ctx: &'a MatchCtx,
        piece: &'a PayloadPiece,
        contribs: &'a [ContributingFile],
    ) -> Self {
        Self { ctx, piece, contribs, cache: HashMap::new() }
    }

    #[tracing::instrument(skip_all, fields(piece = self.piece.index))]
    pub async fn search(
        &mut self,
        state: &mut SearchState,
        token: &CancellationToken,
    ) -> SearchOutcome {
        if !covers(self.piece, self.contribs) {
            debug!("contributing files don't cover the piece");
            return SearchOutcome::Unmatched { tried: state.tried() };
        }

        let hinted: Vec<Vec<CandidateId>> =
            self.contribs.iter().map(|c| c.hinted.clone()).collect();

        let mut phases = vec![hinted];

        if self.ctx.config.fallback_search {
            let fallback: Vec<Vec<CandidateId>> =
                self.contribs.iter().map(|c| c.fallback.clone()).collect();

            if fallback != phases[0] {
                phases.push(fallback);
            }
        }

        for slots in phases {
            state.begin(slots);

            while let Some(combination) = state.next_combination() {
                if token.is_cancelled() {
                    return SearchOutcome::Cancelled;
                }

                if state.budget_left() == 0 {
                    debug!("budget exhausted after {}", state.tried());
                    return SearchOutcome::Inconclusive { tried: state.tried() };
                }

                match self.hash(&combination, state, token).await {
                    Step::Hashed(hash) => {
                        let is_match = hash == self.piece.hash;
                        state.record(combination.clone());

                        if is_match {
                            debug!("matched after {}", state.tried());
                            return SearchOutcome::Matched(
                                self.resolution(&combination),
                            );
                        }
                    }
                    Step::Skipped => {}
                    Step::Cancelled => return SearchOutcome::Cancelled,
                }
            }
        }

        SearchOutcome::Unmatched { tried: state.tried() }
    }

    async fn hash(
        &mut self,
        combination: &[CandidateId],
        state: &mut SearchState,
        token: &CancellationToken,
    ) -> Step {
        let mut hasher = sha1_smol::Sha1::new();

        for (slot, id) in combination.iter().enumerate() {
            match self.fragment(slot, *id, token).await {
                Fragment::Bytes(bytes) => hasher.update(&bytes),
                Fragment::Failed => {
                    state.fail(slot, *id);
                    return Step::Skipped;
                }
                Fragment::Cancelled => return Step::Cancelled,
            }
        }

        Step::Hashed(Sha1Hash(hasher.digest().bytes()))
    }

    async fn fragment(
        &mut self,
        slot: usize,
        id: CandidateId,
        token: &CancellationToken,
    ) -> Fragment {
        if let Some(bytes) = self.cache.get(&(slot, id)) {
            return Fragment::Bytes(bytes.clone());
        }

        let ctx = self.ctx;
        let Some(candidate) = ctx.index.get(id) else {
            return Fragment::Failed;
        };
        let range = self.contribs[slot].file_range.clone();

        let read = select! {
            _ = token.cancelled() => return Fragment::Cancelled,
            read = read_range(&candidate.path, range) => read,
        };

        match read {
            Ok(bytes) => {
                if slot + 1 < self.contribs.len() {
                    self.cache.insert((slot, id), bytes.clone());
                }
                Fragment::Bytes(bytes)
            }
            Err(e) => {
                warn!(
                    "skipping {:?} for piece {}: {e}",
                    candidate.path, self.piece.index
                );
                Fragment::Failed
            }
        }
    }

    fn resolution(&self, combination: &[CandidateId]) -> Resolution {
        let assignments = combination
            .iter()
            .zip(self.contribs)
            .map(|(id, contrib)| Assignment {
                file: contrib.file,
                candidate: *id,
                path: self
                    .ctx
                    .index
                    .get(*id)
                    .map(|c| c.path.clone())
                    .unwrap_or_default(),
                file_range: contrib.file_range.clone(),
                piece_range: contrib.piece_range.clone(),
            })
            .collect();

        Resolution { assignments }
    }
}

/// Discover the contributing files of `piece` and search their combinations
/// with a fresh [`SearchState`].
pub async fn search_piece(
    ctx: &MatchCtx,
    piece: &PayloadPiece,
    token: &CancellationToken,
) -> SearchOutcome {
    let contribs = contributing_files(piece, &ctx.files, &ctx.index);
    let mut state = SearchState::new(ctx.config.max_combinations);

    PieceMatcher::new(ctx, piece, &contribs).search(&mut state, token).await
}

/// Read `range` of the file at `path`. The file is opened for this read only.
pub async fn read_range(path: &Path, range: Range<u64>) -> io::Result<Bytes> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;

    let len = usize::try_from(range.end.saturating_sub(range.start))
        .map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "range too large")
        })?;

    let mut buf = vec![0; len];
    file.read_exact(&mut buf).await?;

    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use rand::{distributions::Alphanumeric, Rng};
    use tokio::fs;

    use super::*;
    use crate::scanner::Candidate;

    struct TestDir(PathBuf);

    impl TestDir {
        fn new() -> Self {
            let name: String = rand::thread_rng()
                .sample_iter(Alphanumeric)
                .take(20)
                .map(char::from)
                .collect();
            let dir = std::env::temp_dir().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn write(&self, name: &str, bytes: &[u8]) -> Candidate {
            let path = self.0.join(name);
            std::fs::write(&path, bytes).unwrap();
            Candidate::new(path, bytes.len() as u64)
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn payload_files(lengths: &[u64]) -> Vec<PayloadFile> {
        let mut offset = 0;
        lengths
            .iter()
            .enumerate()
            .map(|(index, length)| {
                let f = PayloadFile {
                    index,
                    path: PathBuf::from(format!("t/f{index}")),
                    length: *length,
                    offset,
                };
                offset += length;
                f
            })
            .collect()
    }

    fn ctx(lengths: &[u64], candidates: Vec<Candidate>) -> MatchCtx {
        let mut ctx = MatchCtx::new(payload_files(lengths), Config::default());
        ctx.index.extend(candidates);
        ctx
    }

    fn piece(bytes: &[u8]) -> PayloadPiece {
        PayloadPiece {
            index: 1,
            offset: 0,
            size: bytes.len() as u64,
            hash: Sha1Hash::digest(bytes),
        }
    }

    fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
        [a, b].concat()
    }

    #[test]
    fn odometer_order() {
        let mut state = SearchState::new(10);
        state.begin(vec![vec![1, 2], vec![3, 4]]);

        assert_eq!(state.next_combination(), Some(vec![1, 3]));
        assert_eq!(state.next_combination(), Some(vec![1, 4]));
        assert_eq!(state.next_combination(), Some(vec![2, 3]));
        assert_eq!(state.next_combination(), Some(vec![2, 4]));
        assert_eq!(state.next_combination(), None);
    }

    #[test]
    fn skips_visited_and_failed() {
        let mut state = SearchState::new(10);
        state.begin(vec![vec![1], vec![3, 4]]);
        state.record(vec![1, 3]);

        state.begin(vec![vec![1, 2], vec![3, 4]]);
        state.fail(0, 2);

        assert_eq!(state.next_combination(), Some(vec![1, 4]));
        assert_eq!(state.next_combination(), None);
        assert_eq!(state.tried(), 1);
        assert_eq!(state.budget_left(), 9);
    }

    #[test]
    fn empty_slot_has_no_combinations() {
        let mut state = SearchState::new(10);
        state.begin(vec![vec![1, 2], vec![]]);
        assert_eq!(state.next_combination(), None);

        state.begin(vec![]);
        assert_eq!(state.next_combination(), None);
    }

    #[tokio::test]
    async fn whole_piece_from_one_file() {
        let dir = TestDir::new();
        let data = [7u8; 32];
        let ctx = ctx(&[32], vec![dir.write("renamed.bin", &data)]);

        let outcome =
            search_piece(&ctx, &piece(&data), &CancellationToken::new()).await;

        let SearchOutcome::Matched(resolution) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(resolution.assignments.len(), 1);
        assert_eq!(resolution.assignments[0].path, dir.0.join("renamed.bin"));
        assert_eq!(resolution.assignments[0].file_range, 0..32);
    }

    #[tokio::test]
    async fn two_halves_in_order() {
        let dir = TestDir::new();
        let a = [1u8; 16];
        let b = [2u8; 16];
        let ctx = ctx(
            &[16, 16],
            vec![dir.write("first", &a), dir.write("second", &b)],
        );

        let outcome = search_piece(
            &ctx,
            &piece(&concat(&a, &b)),
            &CancellationToken::new(),
        )
        .await;

        let SearchOutcome::Matched(resolution) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        let paths: Vec<_> =
            resolution.assignments.iter().map(|a| a.path.clone()).collect();
        assert_eq!(paths, vec![dir.0.join("first"), dir.0.join("second")]);
        assert_eq!(resolution.assignments[0].piece_range, 0..16);
        assert_eq!(resolution.assignments[1].piece_range, 16..32);
    }

    #[tokio::test]
    async fn swapped_halves_do_not_match() {
        let dir = TestDir::new();
        let a = [1u8; 16];
        let b = [2u8; 16];
        let ctx = ctx(
            &[16, 16],
            vec![dir.write("first", &a), dir.write("second", &b)],
        );
        let piece = piece(&concat(&a, &b));

        let contrib = |file: usize, piece_range: Range<u64>, id| {
            ContributingFile {
                file,
                file_range: 0..16,
                piece_range,
                hinted: vec![id],
                fallback: vec![id],
            }
        };
        let swapped = [contrib(0, 0..16, 1), contrib(1, 16..32, 0)];

        let mut state = SearchState::new(100);
        let outcome = PieceMatcher::new(&ctx, &piece, &swapped)
            .search(&mut state, &CancellationToken::new())
            .await;

        assert_eq!(outcome, SearchOutcome::Unmatched { tried: 1 });
    }

    #[tokio::test]
    async fn no_overlapping_candidate_hashes_nothing() {
        let dir = TestDir::new();
        let ctx = ctx(&[32], vec![dir.write("tiny", &[0u8; 5])]);

        let outcome =
            search_piece(&ctx, &piece(&[0u8; 32]), &CancellationToken::new())
                .await;

        assert_eq!(outcome, SearchOutcome::Unmatched { tried: 0 });
    }

    #[tokio::test]
    async fn budget_makes_it_inconclusive() {
        let dir = TestDir::new();
        let data = [9u8; 32];
        let candidates = vec![
            dir.write("decoy-1", &[1u8; 32]),
            dir.write("decoy-2", &[2u8; 32]),
            dir.write("real", &data),
        ];

        let mut ctx = ctx(&[32], candidates);
        ctx.config.max_combinations = 2;
        let outcome =
            search_piece(&ctx, &piece(&data), &CancellationToken::new()).await;
        assert_eq!(outcome, SearchOutcome::Inconclusive { tried: 2 });

        ctx.config.max_combinations = 3;
        let outcome =
            search_piece(&ctx, &piece(&data), &CancellationToken::new()).await;
        assert!(matches!(outcome, SearchOutcome::Matched(_)));
    }

    #[tokio::test]
    async fn unreadable_candidate_is_skipped() {
        let dir = TestDir::new();
        let data = [4u8; 32];
        let missing = Candidate::new(dir.0.join("gone"), 32);
        let ctx = ctx(&[32], vec![missing, dir.write("real", &data)]);

        let outcome =
            search_piece(&ctx, &piece(&data), &CancellationToken::new()).await;

        let SearchOutcome::Matched(resolution) = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(resolution.assignments[0].candidate, 1);
    }

    #[tokio::test]
    async fn fallback_finds_oversized_candidate() {
        let dir = TestDir::new();
        let data = [5u8; 32];
        let mut oversized = data.to_vec();
        oversized.extend_from_slice(&[0u8; 16]);

        let mut ctx = ctx(&[32], vec![dir.write("partial.bin", &oversized)]);
        let piece = piece(&data);

        let outcome =
            search_piece(&ctx, &piece, &CancellationToken::new()).await;
        assert!(matches!(outcome, SearchOutcome::Matched(_)));

        ctx.config.fallback_search = false;
        let outcome =
            search_piece(&ctx, &piece, &CancellationToken::new()).await;
        assert_eq!(outcome, SearchOutcome::Unmatched { tried: 0 });
    }

    #[tokio::test]
    async fn cancelled_search() {
        let dir = TestDir::new();
        let data = [3u8; 32];
        let ctx = ctx(&[32], vec![dir.write("real", &data)]);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = search_piece(&ctx, &piece(&data), &token).await;
        assert_eq!(outcome, SearchOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_while_reading() {
        let dir = TestDir::new();
        // opening a fifo for reading blocks until a writer shows up
        let fifo = dir.0.join("fifo");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        let ctx = ctx(&[32], vec![Candidate::new(&fifo, 32)]);
        let token = CancellationToken::new();

        let canceller = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            canceller.cancel();
        });

        let outcome = search_piece(&ctx, &piece(&[0u8; 32]), &token).await;
        assert_eq!(outcome, SearchOutcome::Cancelled);
        handle.join().unwrap();

        // read-write never blocks on linux, and releases the pending open
        let _ = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&fifo);
    }

    #[tokio::test]
    async fn single_slot_keeps_no_fragments() {
        let dir = TestDir::new();
        let candidates: Vec<Candidate> = (0..20)
            .map(|i| dir.write(&format!("decoy-{i}"), &[i as u8; 64]))
            .collect();
        let ctx = ctx(&[64], candidates);
        let piece = piece(&[0xaa; 64]);
        let contribs = contributing_files(&piece, &ctx.files, &ctx.index);

        let mut state = SearchState::new(100);
        let mut matcher = PieceMatcher::new(&ctx, &piece, &contribs);
        let outcome =
            matcher.search(&mut state, &CancellationToken::new()).await;

        assert_eq!(outcome, SearchOutcome::Unmatched { tried: 20 });
        assert!(matcher.cache.is_empty());
    }

    #[tokio::test]
    async fn only_leading_slots_are_kept() {
        let dir = TestDir::new();
        let ctx = ctx(
            &[16, 16],
            vec![
                dir.write("first", &[1u8; 16]),
                dir.write("second", &[2u8; 16]),
            ],
        );
        let piece = piece(&[0xaa; 32]);
        let contribs = contributing_files(&piece, &ctx.files, &ctx.index);

        let mut state = SearchState::new(100);
        let mut matcher = PieceMatcher::new(&ctx, &piece, &contribs);
        let outcome =
            matcher.search(&mut state, &CancellationToken::new()).await;

        assert_eq!(outcome, SearchOutcome::Unmatched { tried: 4 });
        assert_eq!(matcher.cache.len(), 2);
        assert!(matcher.cache.keys().all(|(slot, _)| *slot == 0));
    }

    #[tokio::test]
    async fn read_range_reads_the_middle() -> io::Result<()> {
        let dir = TestDir::new();
        let c = dir.write("f", b"0123456789");

        assert_eq!(read_range(&c.path, 2..5).await?, Bytes::from("234"));
        assert!(read_range(&c.path, 8..12).await.is_err());

        fs::remove_file(&c.path).await?;
        Ok(())
    }
}
