//! Exposure summaries for display.
//!
//! The duration estimate counts close-contact rows and assumes one sighting
//! per broadcast cycle. Overlapping sightings are not deduplicated, so the
//! figure is indicative only.

use std::fmt;

use chrono::DateTime;
use exposure_crypto::EnIntervalNumber;

use crate::storage::{Storage, StorageError};

/// Rough exposure length derived from the number of sightings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationEstimate {
    /// One sighting
    UnderFifteenMinutes,
    /// Two to four sightings
    UnderOneHour,
    /// Whole hours, at four sightings per hour
    Hours(usize),
}

impl DurationEstimate {
    /// Estimate for `sightings` close contacts.
    pub fn from_sightings(sightings: usize) -> Self {
        match sightings {
            0 | 1 => Self::UnderFifteenMinutes,
            2..=4 => Self::UnderOneHour,
            n => Self::Hours(n / 4),
        }
    }
}

impl fmt::Display for DurationEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnderFifteenMinutes => f.write_str("< 15 minutes"),
            Self::UnderOneHour => f.write_str("< 1 hour"),
            Self::Hours(1) => f.write_str("1 hour"),
            Self::Hours(n) => write!(f, "{n} hours"),
        }
    }
}

/// One matched diagnosis as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureSummary {
    /// Diagnosis record id
    pub diagnosis_id: u64,
    /// Interval the published key was issued for
    pub enin: EnIntervalNumber,
    /// Close-contact rows linked to the diagnosis
    pub sightings: usize,
}

impl ExposureSummary {
    /// Unix time at the start of the UTC day containing `enin`.
    pub fn day_start_secs(&self) -> u64 {
        self.enin.tek_period().start_unix_secs()
    }

    /// Calendar date (UTC) of `day_start_secs`, as `YYYY-MM-DD`. Falls back
    /// to the raw interval outside chrono's range.
    pub fn date(&self) -> String {
        DateTime::from_timestamp(self.day_start_secs() as i64, 0).map_or_else(
            || format!("interval {}", self.enin.value()),
            |day| day.format("%Y-%m-%d").to_string(),
        )
    }

    /// Duration bucket for the sighting count.
    pub fn duration(&self) -> DurationEstimate {
        DurationEstimate::from_sightings(self.sightings)
    }
}

impl fmt::Display for ExposureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: exposure of {}", self.date(), self.duration())
    }
}

/// Summaries for every recorded diagnosis, newest interval first.
pub fn exposure_report<S: Storage>(storage: &S) -> Result<Vec<ExposureSummary>, StorageError> {
    let mut summaries = Vec::new();

    for record in storage.load_diagnoses()? {
        let sightings = storage.close_contacts(record.id)?.len();
        summaries.push(ExposureSummary {
            diagnosis_id: record.id,
            enin: record.key.interval(),
            sightings,
        });
    }

    summaries.sort_by(|a, b| b.enin.cmp(&a.enin).then(b.diagnosis_id.cmp(&a.diagnosis_id)));
    Ok(summaries)
}
