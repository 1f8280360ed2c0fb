use rayon::prelude::*;
use tracing::{error, info};

use crate::api::Connector;
use crate::config::{Credentials, RunContext, SessionToken};
use crate::domain::{CandidateId, OutputSchema};
use crate::error::MirrorError;
use crate::manifest;
use crate::materialize;
use crate::transfer::CachedFetcher;

/// Completion tally reported at the end of a run. `completed` counts
/// candidates whose materialization returned cleanly; a mismatch against
/// `requested` means some candidates failed and were logged.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub completed: usize,
    pub requested: usize,
}

pub struct App<C: Connector> {
    connector: C,
}

impl<C> App<C>
where
    C: Connector + Sync,
{
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// One full run: authenticate, build the manifest for the selected
    /// schema, filter, then materialize candidates on the worker pool.
    /// Candidates run independently; one failure never aborts its siblings.
    pub fn run(
        &self,
        ctx: &RunContext,
        schema: &str,
        credentials: &Credentials,
        requested: &[CandidateId],
    ) -> Result<RunSummary, MirrorError> {
        info!("authenticating");
        let token = self.connector.login(credentials)?;
        info!("login successful, token obtained");

        let schema = OutputSchema::parse(schema)?;
        info!(%schema, output = %ctx.output_root, "building manifest");
        match schema {
            OutputSchema::Bids => self.run_bids(ctx, &token, requested),
            OutputSchema::Minc => self.run_minc(ctx, &token, requested),
        }
    }

    fn run_minc(
        &self,
        ctx: &RunContext,
        token: &SessionToken,
        requested: &[CandidateId],
    ) -> Result<RunSummary, MirrorError> {
        let session = self.connector.connect(token)?;
        let mut candidates = manifest::minc_candidate_list(&session)?;
        drop(session);

        if !requested.is_empty() {
            candidates.retain(|info| info.matches_filter(requested));
            if candidates.is_empty() {
                return Err(empty_filter_error(requested));
            }
        }

        let total = candidates.len();
        let completed = candidates
            .into_par_iter()
            .map(|info| {
                let label = info.cand_id.clone();
                let result = self.connector.connect(token).and_then(|session| {
                    let candidate = manifest::build_minc_candidate(&session, info)?;
                    let fetcher = CachedFetcher::new(&session);
                    materialize::materialize_minc(&candidate, &fetcher, &ctx.output_root)
                });
                tally(&label, result)
            })
            .sum();

        Ok(RunSummary {
            completed,
            requested: total,
        })
    }

    fn run_bids(
        &self,
        ctx: &RunContext,
        token: &SessionToken,
        requested: &[CandidateId],
    ) -> Result<RunSummary, MirrorError> {
        let session = self.connector.connect(token)?;
        let fetcher = CachedFetcher::new(&session);
        let mut candidates =
            manifest::build_bids_candidates(&session, &fetcher, &ctx.output_root)?;
        drop(session);

        if !requested.is_empty() {
            candidates.retain(|candidate| candidate.matches_filter(requested));
            if candidates.is_empty() {
                return Err(empty_filter_error(requested));
            }
        }

        let total = candidates.len();
        let completed = candidates
            .into_par_iter()
            .map(|candidate| {
                let label = candidate.id.clone();
                let result = self.connector.connect(token).and_then(|session| {
                    let fetcher = CachedFetcher::new(&session);
                    materialize::materialize_bids(&candidate, &fetcher, &ctx.output_root)
                });
                tally(&label, result)
            })
            .sum();

        Ok(RunSummary {
            completed,
            requested: total,
        })
    }
}

fn tally(candidate: &str, result: Result<(), MirrorError>) -> usize {
    match result {
        Ok(()) => {
            info!(candidate, "candidate completed");
            1
        }
        Err(err) => {
            error!(candidate, error = %err, "candidate failed");
            0
        }
    }
}

fn empty_filter_error(requested: &[CandidateId]) -> MirrorError {
    let listed = requested
        .iter()
        .map(CandidateId::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    MirrorError::EmptyCandidateFilter(listed)
}
