//! Job types, queue routing table, and the job status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the `job_statuses` lookup table.
pub type StatusId = i16;

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// Queue for transfer-learning (training) jobs.
pub const QUEUE_TRANSFER_LEARNING: &str = "tl";

/// Queue for reinforcement (staged learning) jobs.
pub const QUEUE_REINFORCEMENT: &str = "rl";

/// Queue for sampling from a trained agent.
pub const QUEUE_GENERATION: &str = "generation";

/// Queue for de novo design sampling from the prior.
pub const QUEUE_MOLECULE: &str = "molecule";

// ---------------------------------------------------------------------------
// JobType
// ---------------------------------------------------------------------------

/// The fixed set of job kinds the platform can orchestrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Train,
    Reinforce,
    Generate,
    Design,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Train,
        JobType::Reinforce,
        JobType::Generate,
        JobType::Design,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Train => "train",
            JobType::Reinforce => "reinforce",
            JobType::Generate => "generate",
            JobType::Design => "design",
        }
    }

    /// The dedicated queue this job type is routed to.
    ///
    /// Each queue is served by its own worker pool, so a backlog of one job
    /// type never starves another.
    pub fn queue_name(self) -> &'static str {
        match self {
            JobType::Train => QUEUE_TRANSFER_LEARNING,
            JobType::Reinforce => QUEUE_REINFORCEMENT,
            JobType::Generate => QUEUE_GENERATION,
            JobType::Design => QUEUE_MOLECULE,
        }
    }

    /// Whether a successful run yields a candidate table for the result
    /// collector to enrich.
    pub fn produces_candidates(self) -> bool {
        matches!(self, JobType::Generate | JobType::Design)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(JobType::Train),
            "reinforce" => Ok(JobType::Reinforce),
            "generate" => Ok(JobType::Generate),
            "design" => Ok(JobType::Design),
            other => Err(CoreError::Validation(format!("Unknown job type: {other}"))),
        }
    }
}

impl TryFrom<String> for JobType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
///
/// ```text
/// queued -> processing -> completed
///               |  ^
///               |  | (retry re-entry, budgeted)
///               +--+-> failed
/// ```
///
/// `completed` and `failed` are terminal. The discriminants match the seed
/// data in the `job_statuses` table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `next` is reachable from `self` in a single step.
    ///
    /// `processing -> processing` is the retry re-entry; callers must also
    /// check the attempt budget before applying it.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// All statuses from which `next` may be entered.
    pub fn predecessors(next: JobStatus) -> &'static [JobStatus] {
        match next {
            JobStatus::Queued => &[],
            JobStatus::Processing => &[JobStatus::Queued, JobStatus::Processing],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Processing],
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl TryFrom<StatusId> for JobStatus {
    type Error = CoreError;

    fn try_from(value: StatusId) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JobStatus::Queued),
            2 => Ok(JobStatus::Processing),
            3 => Ok(JobStatus::Completed),
            4 => Ok(JobStatus::Failed),
            other => Err(CoreError::Internal(format!("Unknown job status id: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichmentStatus
// ---------------------------------------------------------------------------

/// Outcome of post-run descriptor enrichment, recorded next to (not in
/// place of) the job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    /// Every candidate was enriched.
    Enriched,
    /// Some candidates were skipped.
    Partial,
    /// Enrichment failed entirely; an error artifact was written.
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrichmentStatus::Enriched => "enriched",
            EnrichmentStatus::Partial => "partial",
            EnrichmentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EnrichmentStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "enriched" => Ok(EnrichmentStatus::Enriched),
            "partial" => Ok(EnrichmentStatus::Partial),
            "failed" => Ok(EnrichmentStatus::Failed),
            other => Err(CoreError::Internal(format!(
                "Unknown enrichment status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
