//! Primary discovery over an ordered candidate list.

use crate::config::ScanMode;
use crate::probe::{NodeProbe, ProbeResult, ProbeVerdict};
use crate::{ControlError, ControlResult};
use futures_util::future::join_all;
use replset_core::{AdminConnector, Candidate};
use tracing::{debug, info};

/// The candidate that answered as primary.
#[derive(Debug, Clone)]
pub struct LocatedPrimary {
    /// Position of the candidate in the scanned list
    pub index: usize,
    pub candidate: Candidate,
    pub probe: ProbeResult,
}

impl LocatedPrimary {
    pub fn address(&self) -> &str {
        &self.candidate.address
    }
}

/// Finds the current primary among candidates, in the order given.
///
/// The scan order is never shuffled. In [`ScanMode::Parallel`] every
/// candidate is probed at once but the lowest-index leader still wins, so
/// both modes return the same answer for the same cluster state.
pub struct PrimaryLocator<C> {
    probe: NodeProbe<C>,
    mode: ScanMode,
}

impl<C: AdminConnector> PrimaryLocator<C> {
    pub fn new(probe: NodeProbe<C>, mode: ScanMode) -> Self {
        Self { probe, mode }
    }

    pub async fn find_primary(&self, candidates: &[Candidate]) -> ControlResult<LocatedPrimary> {
        let located = match self.mode {
            ScanMode::Sequential => self.scan_sequential(candidates).await,
            ScanMode::Parallel => Self::pick_leader(candidates, self.probe_all(candidates).await),
        };

        match &located {
            Ok(primary) => info!(
                address = %primary.address(),
                index = primary.index,
                mode = ?self.mode,
                "Located primary"
            ),
            Err(e) => info!("{}", e),
        }
        located
    }

    /// Probes every candidate concurrently and returns results in input order.
    pub async fn probe_all(&self, candidates: &[Candidate]) -> Vec<ProbeResult> {
        join_all(candidates.iter().map(|c| self.probe.probe(c))).await
    }

    async fn scan_sequential(&self, candidates: &[Candidate]) -> ControlResult<LocatedPrimary> {
        let mut unreachable = 0;
        for (index, candidate) in candidates.iter().enumerate() {
            let probe = self.probe.probe(candidate).await;
            match probe.verdict() {
                ProbeVerdict::Leader => {
                    return Ok(LocatedPrimary {
                        index,
                        candidate: candidate.clone(),
                        probe,
                    })
                }
                ProbeVerdict::Follower => {
                    debug!(
                        address = %candidate.address,
                        role = %probe.role,
                        "Not primary, skipping"
                    );
                }
                ProbeVerdict::Unreachable => unreachable += 1,
            }
        }

        Err(ControlError::NoPrimaryFound {
            candidates: candidates.len(),
            unreachable,
        })
    }

    fn pick_leader(
        candidates: &[Candidate],
        results: Vec<ProbeResult>,
    ) -> ControlResult<LocatedPrimary> {
        let unreachable = results
            .iter()
            .filter(|r| r.verdict() == ProbeVerdict::Unreachable)
            .count();

        results
            .into_iter()
            .zip(candidates)
            .enumerate()
            .find(|(_, (probe, _))| probe.is_leader)
            .map(|(index, (probe, candidate))| LocatedPrimary {
                index,
                candidate: candidate.clone(),
                probe,
            })
            .ok_or(ControlError::NoPrimaryFound {
                candidates: candidates.len(),
                unreachable,
            })
    }
}
