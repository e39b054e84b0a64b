//! Result-file contract between the supervisor child and the scheduler
//! loop.
//!
//! The file is the only channel a finished job reports through, so it is
//! written exactly once on every exit path: two lines, the numeric result
//! code and the completion timestamp.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::JobState;

/// Executor finished normally (its own non-zero codes pass through).
pub const RESULT_SUCCESS: i32 = 0;
/// Canceled; cleanup completed within the grace period.
pub const RESULT_CANCELED: i32 = -1;
/// Execution budget exhausted; cleanup completed within the grace period.
pub const RESULT_TIMEOUT: i32 = -2;
/// Canceled, and cleanup overran the grace period.
pub const RESULT_CANCELED_CLEANUP_TIMEOUT: i32 = -3;
/// Timed out, and cleanup overran the grace period.
pub const RESULT_TIMEOUT_CLEANUP_TIMEOUT: i32 = -4;
/// Executor raised an error instead of returning a code.
pub const RESULT_EXCEPTION: i32 = -5;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Path of a job's hidden result file inside its working directory.
pub fn result_file_path(job_dir: &Path, job_id: &Uuid) -> PathBuf {
    job_dir.join(format!(".{}", job_id))
}

/// What the supervisor reports when a job process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub code: i32,
    pub ended_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn new(code: i32, ended_at: DateTime<Utc>) -> Self {
        Self { code, ended_at }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let body = format!(
            "{}\n{}\n",
            self.code,
            self.ended_at.format(TIMESTAMP_FORMAT)
        );
        fs::write(path, body)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)?;
        let mut lines = body.lines();
        let code = lines
            .next()
            .ok_or_else(|| SchedulerError::MalformedResultFile("missing result code".into()))?
            .trim()
            .parse::<i32>()
            .map_err(|e| SchedulerError::MalformedResultFile(format!("bad result code: {}", e)))?;
        let stamp = lines
            .next()
            .ok_or_else(|| SchedulerError::MalformedResultFile("missing timestamp".into()))?
            .trim();
        let ended_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| SchedulerError::MalformedResultFile(format!("bad timestamp: {}", e)))?
            .and_utc();
        Ok(Self { code, ended_at })
    }

    fn is_timeout(&self) -> bool {
        self.code == RESULT_TIMEOUT || self.code == RESULT_TIMEOUT_CLEANUP_TIMEOUT
    }
}

/// Map a reaped outcome to the job's terminal state and result message.
///
/// Order matters: success and timeout codes are classified first, then a
/// job that died while cleaning up counts as canceled whatever code its
/// cleanup produced, and everything else is a plain failure.
pub fn terminal_state(state_at_death: JobState, outcome: &JobOutcome) -> (JobState, String) {
    if outcome.code == RESULT_SUCCESS {
        return (JobState::Completed, "Job finished successfully".to_string());
    }
    if outcome.is_timeout() {
        return (
            JobState::Failed,
            "Job exceeded its timeout and was stopped".to_string(),
        );
    }
    if state_at_death == JobState::CleaningUp {
        return (JobState::Canceled, "Job canceled".to_string());
    }
    (
        JobState::Failed,
        format!("Job failed with result code {}", outcome.code),
    )
}
