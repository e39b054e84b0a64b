//! Process spawning, liveness validation and signaling.
//!
//! The scheduler loop talks to job processes through the [`ProcessControl`]
//! trait so tests can substitute a fake. The Unix implementation launches
//! the supervisor child by re-executing the current binary with the hidden
//! `supervise` subcommand, and validates recorded pids against `/proc`:
//! the process must exist, its `comm` must equal the fixed supervisor tag,
//! and its working directory must be the job's directory. This is a narrow
//! liveness/identity probe, not an IPC channel — it exists so a restarted
//! daemon can tell a still-running job from a recycled pid.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::config::{DaemonConfig, SUPERVISOR_PROCESS_NAME};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::Job;

/// Seam between the scheduler loop and the operating system.
pub trait ProcessControl: Send {
    /// Launch the supervisor process for a job. Returns the new pid; must
    /// not wait for the job to finish.
    fn spawn(&mut self, job: &Job) -> Result<u32>;

    /// Whether the job's recorded process is still its live supervisor.
    /// False means the job has ended (or the pid was recycled) and must be
    /// reaped from its result file.
    fn is_alive(&mut self, job: &Job) -> bool;

    /// Ask the job's process to terminate gracefully (SIGTERM).
    fn terminate(&mut self, job: &Job) -> Result<()>;

    /// Force-kill the job's process (SIGKILL).
    fn kill(&mut self, job: &Job) -> Result<()>;
}

/// Real implementation backed by child processes and `/proc`.
pub struct UnixProcesses {
    config: DaemonConfig,
    // Children spawned by this daemon instance. For these, try_wait is the
    // authoritative liveness check: an unreaped zombie would still pass
    // the /proc comm test.
    children: HashMap<Uuid, Child>,
}

impl UnixProcesses {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            children: HashMap::new(),
        }
    }

    fn signal(&self, job: &Job, signal: Signal) -> Result<()> {
        let pid = job.pid.ok_or_else(|| SchedulerError::Internal(format!(
            "job {} has no recorded pid",
            job.id
        )))?;
        kill(Pid::from_raw(pid as i32), signal).map_err(|e| {
            SchedulerError::Internal(format!("kill({}, {}): {}", pid, signal.as_str(), e))
        })
    }
}

impl ProcessControl for UnixProcesses {
    fn spawn(&mut self, job: &Job) -> Result<u32> {
        let exe = std::env::current_exe()?;
        let child = Command::new(exe)
            .arg("supervise")
            .arg("--job-id")
            .arg(job.id.to_string())
            .arg("--state-dir")
            .arg(&self.config.state_dir)
            .arg("--jobs-dir")
            .arg(&self.config.jobs_dir)
            .arg("--grace-secs")
            .arg(self.config.cleanup_grace.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| SchedulerError::Internal("spawned child has no pid".to_string()))?;
        self.children.insert(job.id, child);
        tracing::info!(job_id = %job.id, pid, "Supervisor process spawned");
        Ok(pid)
    }

    fn is_alive(&mut self, job: &Job) -> bool {
        if let Some(child) = self.children.get_mut(&job.id) {
            return match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    tracing::debug!(job_id = %job.id, %status, "Supervisor child exited");
                    self.children.remove(&job.id);
                    false
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "try_wait failed, treating job as ended");
                    self.children.remove(&job.id);
                    false
                }
            };
        }
        // Inherited from a previous daemon instance: fall back to /proc.
        match job.pid {
            Some(pid) => validate_pid(pid, &job.id),
            None => false,
        }
    }

    fn terminate(&mut self, job: &Job) -> Result<()> {
        self.signal(job, Signal::SIGTERM)
    }

    fn kill(&mut self, job: &Job) -> Result<()> {
        self.signal(job, Signal::SIGKILL)?;
        // A force-killed job goes terminal right away, so is_alive (the
        // usual reap point) is never called for it again. Dropping the
        // handle hands the child to the runtime's orphan reaper; keeping it
        // in the map would leave a zombie for the daemon's lifetime.
        if let Some(mut child) = self.children.remove(&job.id) {
            if let Ok(Some(status)) = child.try_wait() {
                tracing::debug!(job_id = %job.id, %status, "Killed child already exited");
            }
        }
        Ok(())
    }
}

/// Check that a recorded pid still belongs to the given job's supervisor:
/// process exists, comm matches the supervisor tag, cwd basename matches
/// the job id. Any failure means "not running any more".
pub fn validate_pid(pid: u32, job_id: &Uuid) -> bool {
    let proc_dir = format!("/proc/{}", pid);
    if !Path::new(&proc_dir).exists() {
        tracing::debug!(pid, job_id = %job_id, "Process no longer exists");
        return false;
    }

    let comm = match fs::read_to_string(format!("{}/comm", proc_dir)) {
        Ok(comm) => comm,
        Err(e) => {
            tracing::debug!(pid, job_id = %job_id, error = %e, "Cannot read process comm");
            return false;
        }
    };
    if comm.trim_end() != SUPERVISOR_PROCESS_NAME {
        tracing::debug!(pid, job_id = %job_id, comm = comm.trim_end(),
            "Pid recycled by an unrelated process");
        return false;
    }

    let cwd = match fs::read_link(format!("{}/cwd", proc_dir)) {
        Ok(cwd) => cwd,
        Err(e) => {
            tracing::debug!(pid, job_id = %job_id, error = %e, "Cannot read process cwd");
            return false;
        }
    };
    match cwd.file_name().and_then(|n| n.to_str()) {
        Some(name) if name == job_id.to_string() => true,
        _ => {
            tracing::debug!(pid, job_id = %job_id, cwd = %cwd.display(),
                "Pid belongs to a different job's supervisor");
            false
        }
    }
}
