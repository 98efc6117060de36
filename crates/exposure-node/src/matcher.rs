//! Diagnosis key matching.
//!
//! For each published key, rebuild the publisher's 144 RPIs for that period
//! and look them up in the exposure log with one bulk membership query.
//!
//! # Failure isolation
//!
//! A storage error on one candidate is logged and the batch moves on. Nothing
//! is written for that candidate, so a later batch retries it. A candidate
//! whose sightings were found but could not be recorded still counts as a
//! match for the batch. Validation errors are not isolated: they abort the
//! batch.

use std::collections::HashSet;

use exposure_crypto::ValidationError;
use exposure_proto::DiagnosisKey;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    exposure_log::ExposureLog,
    scheduler::ExternalScheduler,
    storage::{DiagnosisInsert, Storage, StorageError},
};

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// A diagnosis for this TEK was already on record; skipped
    AlreadyRecorded,
    /// No observed RPI belongs to this key; nothing written
    NoContact,
    /// New diagnosis recorded with one close contact per matching exposure
    Matched {
        /// Id of the new diagnosis record
        diagnosis_id: u64,
        /// Close-contact rows written
        contacts: usize,
    },
    /// Sightings found but the diagnosis write failed; nothing written
    Unrecorded {
        /// Matching exposures found in the log
        contacts: usize,
        /// Why the write failed
        error: StorageError,
    },
}

/// Error from matching a single candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// Candidate's period is out of range
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Store failed while checking or recording the candidate
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Tests published diagnosis keys against the exposure log.
#[derive(Clone)]
pub struct MatchEngine<S: Storage> {
    storage: S,
    exposures: ExposureLog<S>,
}

impl<S: Storage> MatchEngine<S> {
    /// Engine over `storage`.
    pub fn new(storage: S) -> Self {
        let exposures = ExposureLog::new(storage.clone());
        Self { storage, exposures }
    }

    /// Process `candidates` in order. True iff at least one newly intersected
    /// the exposure log, whether or not its diagnosis could be recorded.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if a candidate's period overflows the interval
    ///   range. Candidates before it have already been processed.
    pub fn match_diagnosis_keys(&self, candidates: &[DiagnosisKey]) -> Result<bool, ValidationError> {
        let mut matched = false;

        for candidate in candidates {
            match self.match_candidate(candidate) {
                Ok(CandidateOutcome::Matched { diagnosis_id, contacts }) => {
                    info!(diagnosis_id, enin = candidate.enin, contacts, "exposure match recorded");
                    matched = true;
                },
                Ok(CandidateOutcome::AlreadyRecorded) => {
                    debug!(enin = candidate.enin, "diagnosis key already recorded");
                },
                Ok(CandidateOutcome::NoContact) => {},
                Ok(CandidateOutcome::Unrecorded { contacts, error }) => {
                    warn!(enin = candidate.enin, contacts, error = %error, "exposure match not recorded, will retry");
                    matched = true;
                },
                Err(MatchError::Storage(e)) => {
                    warn!(enin = candidate.enin, error = %e, "storage failure while matching, skipping candidate");
                },
                Err(MatchError::Validation(e)) => return Err(e),
            }
        }

        debug!(candidates = candidates.len(), matched, "diagnosis batch processed");
        Ok(matched)
    }

    /// Match a single candidate.
    pub fn match_candidate(&self, candidate: &DiagnosisKey) -> Result<CandidateOutcome, MatchError> {
        if self.storage.find_diagnosis(&candidate.tek)?.is_some() {
            return Ok(CandidateOutcome::AlreadyRecorded);
        }

        let scheduler =
            ExternalScheduler::external(candidate.temporary_exposure_key(), candidate.interval())?;
        let sequence: HashSet<_> = scheduler.day_sequence()?.into_iter().collect();

        let hits = self.exposures.matching(&sequence)?;
        if hits.is_empty() {
            return Ok(CandidateOutcome::NoContact);
        }

        let exposure_ids: Vec<u64> = hits.iter().map(|record| record.id).collect();
        let contacts = exposure_ids.len();
        match self.storage.record_diagnosis(candidate, &exposure_ids) {
            Ok(DiagnosisInsert::Inserted(diagnosis_id)) => {
                Ok(CandidateOutcome::Matched { diagnosis_id, contacts })
            },
            Ok(DiagnosisInsert::AlreadyRecorded(_)) => Ok(CandidateOutcome::AlreadyRecorded),
            Err(error) => Ok(CandidateOutcome::Unrecorded { contacts, error }),
        }
    }
}
