//! Runs the piece searches of a torrent and keeps their state between scans.
//!
//! A [`Finder`] owns the candidate index and the state of every piece. The
//! usual flow is to scan a directory, run, and repeat with more directories
//! while the report is not complete. Adding candidates sends the pieces that
//! were not matched back to [`PieceState::Unresolved`], matched pieces are
//! never searched again.
use std::{collections::BTreeMap, path::Path, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::Config,
    contrib::{contributing_files, ContributingFile},
    error::Error,
    matcher::{search_piece, MatchCtx, SearchOutcome},
    metainfo::{Info, MetaInfo},
    piece::{payload_pieces, PayloadPiece, PieceState},
    report::Report,
    scanner::{self, Candidate, CandidateIndex},
};

impl From<SearchOutcome> for PieceState {
    fn from(value: SearchOutcome) -> Self {
        match value {
            SearchOutcome::Matched(resolution) => {
                PieceState::Matched(resolution)
            }
            SearchOutcome::Unmatched { tried } => {
                PieceState::Unmatched { tried }
            }
            SearchOutcome::Inconclusive { tried } => {
                PieceState::Inconclusive { tried }
            }
            SearchOutcome::Cancelled => PieceState::Unresolved,
        }
    }
}

#[derive(Debug)]
pub struct Finder {
    /// Shared read-only with the piece tasks during a run.
    ctx: Arc<MatchCtx>,
    info: Info,
    pieces: Vec<PayloadPiece>,
    states: BTreeMap<usize, PieceState>,
}

impl Finder {
    pub fn new(meta_info: &MetaInfo, config: Config) -> Self {
        let info = meta_info.info.clone();
        let pieces = payload_pieces(&info);
        let states =
            pieces.iter().map(|p| (p.index, PieceState::default())).collect();

        let ctx = MatchCtx::new(info.payload_files(), config);

        Self { ctx: Arc::new(ctx), info, pieces, states }
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn pieces(&self) -> &[PayloadPiece] {
        &self.pieces
    }

    pub fn candidates(&self) -> &CandidateIndex {
        &self.ctx.index
    }

    /// State of the piece with the 1-based `index`.
    pub fn state(&self, index: usize) -> Option<&PieceState> {
        self.states.get(&index)
    }

    /// The contributing files of a piece with the candidates known now.
    pub fn contributing_files(
        &self,
        index: usize,
    ) -> Option<Vec<ContributingFile>> {
        let piece = self.pieces.get(index.checked_sub(1)?)?;
        Some(contributing_files(piece, &self.ctx.files, &self.ctx.index))
    }

    /// Add candidates to the index and return how many were new.
    ///
    /// If any was new, the pieces that are not matched can be searched again
    /// by the next [`Finder::run`].
    pub fn add_candidates(
        &mut self,
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> usize {
        let ctx = Arc::make_mut(&mut self.ctx);
        let added = candidates
            .into_iter()
            .filter_map(|c| ctx.index.insert(c))
            .count();

        if added > 0 {
            for state in self.states.values_mut() {
                if state.is_retryable() {
                    *state = PieceState::Unresolved;
                }
            }
        }

        added
    }

    /// Scan `root` and add what was found. Returns how many candidates
    /// were new.
    pub async fn scan(
        &mut self,
        root: impl AsRef<Path>,
    ) -> Result<usize, Error> {
        let candidates =
            scanner::scan(root, self.ctx.config.skip_empty_files).await?;
        let added = self.add_candidates(candidates);

        info!("{added} new candidates, {} total", self.ctx.index.len());

        Ok(added)
    }

    /// Search every unresolved piece and return the report.
    ///
    /// Pieces are searched concurrently, at most `config.workers` at a time.
    /// When `token` is cancelled the searches stop as soon as possible and
    /// the pieces that didn't finish go back to unresolved. Pieces left
    /// searching by a run whose future was dropped are searched again.
    #[tracing::instrument(skip_all, fields(name = %self.info.name))]
    pub async fn run(
        &mut self,
        token: CancellationToken,
    ) -> Result<Report, Error> {
        self.reset_searching();

        let workers = self.ctx.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();

        let pending: Vec<PayloadPiece> = self
            .pieces
            .iter()
            .filter(|p| {
                self.states.get(&p.index) == Some(&PieceState::Unresolved)
            })
            .cloned()
            .collect();

        info!("searching {} of {} pieces", pending.len(), self.pieces.len());

        for piece in pending {
            self.states.insert(piece.index, PieceState::Searching);

            let ctx = self.ctx.clone();
            let token = token.clone();
            let semaphore = semaphore.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;

                if token.is_cancelled() {
                    return (piece.index, SearchOutcome::Cancelled);
                }

                let outcome = search_piece(&ctx, &piece, &token).await;
                (piece.index, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(r) => r,
                Err(e) => {
                    set.abort_all();
                    self.reset_searching();
                    return Err(e.into());
                }
            };

            debug!("piece {index}: {outcome:?}");
            self.states.insert(index, outcome.into());
        }

        let report = self.report();

        info!(
            "matched {} of {} pieces",
            report.matched(),
            report.pieces.len()
        );

        Ok(report)
    }

    pub fn report(&self) -> Report {
        Report::new(&self.info, &self.pieces, &self.states)
    }

    fn reset_searching(&mut self) {
        for state in self.states.values_mut() {
            if *state == PieceState::Searching {
                *state = PieceState::Unresolved;
            }
        }
    }
}
