use std::path::PathBuf;
use std::time::Duration;

/// Short process-name tag set by every supervisor child via `prctl`.
/// Read back from `/proc/<pid>/comm` when validating recorded pids,
/// so it must fit the kernel's 15-byte comm limit.
pub const SUPERVISOR_PROCESS_NAME: &str = "lparsched-job";

/// Name of the per-job stdout/stderr capture file inside the job directory.
pub const JOB_OUTPUT_FILE: &str = "output";

/// Configuration for the scheduler daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Directory holding the persisted job/request documents.
    pub state_dir: PathBuf,
    /// Directory under which each job gets its own working directory,
    /// named by job id.
    pub jobs_dir: PathBuf,
    /// Pause between scheduler iterations.
    pub loop_interval: Duration,
    /// How long a canceled or timed-out executor may spend in `cleanup()`
    /// before the supervisor gives up on it.
    pub cleanup_grace: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/lparsched/state"),
            jobs_dir: PathBuf::from("/var/lib/lparsched/jobs"),
            loop_interval: Duration::from_secs(2),
            cleanup_grace: Duration::from_secs(60),
        }
    }
}

impl DaemonConfig {
    pub fn new(state_dir: PathBuf, jobs_dir: PathBuf) -> Self {
        Self {
            state_dir,
            jobs_dir,
            ..Default::default()
        }
    }

    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    /// Working directory for one job.
    pub fn job_dir(&self, job_id: &uuid::Uuid) -> PathBuf {
        self.jobs_dir.join(job_id.to_string())
    }
}
