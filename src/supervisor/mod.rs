//! Child-side job supervisor.
//!
//! Runs inside the process spawned for one job (the hidden `supervise`
//! subcommand). Wires up the job's working directory, stdio capture and
//! process-name tag, then drives the executor through a small state
//! machine: running, then canceling/timing-out with a bounded cleanup
//! grace period, then terminated. Whatever happens, the result file is
//! written exactly once before the process exits so the scheduler loop can
//! always reap a definite outcome.

pub mod outcome;
pub mod process;

use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::unix::io::IntoRawFd;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::signal::unix::{signal, SignalKind};
use uuid::Uuid;

use crate::config::{JOB_OUTPUT_FILE, SUPERVISOR_PROCESS_NAME};
use crate::error::{Result, SchedulerError};
use crate::executor::{Executor, ExecutorRegistry};
use crate::store::{FsStore, Store};
use crate::supervisor::outcome::{
    result_file_path, JobOutcome, RESULT_CANCELED, RESULT_CANCELED_CLEANUP_TIMEOUT,
    RESULT_EXCEPTION, RESULT_TIMEOUT, RESULT_TIMEOUT_CLEANUP_TIMEOUT,
};

pub struct SupervisorOpts {
    pub job_id: Uuid,
    pub state_dir: PathBuf,
    pub jobs_dir: PathBuf,
    /// How long `cleanup()` may run after a cancel or timeout.
    pub cleanup_grace: Duration,
    /// Execution budget. Reserved extension point: the daemon never arms
    /// it, job timeouts are currently advisory (used only for queue
    /// admission decisions).
    pub execution_deadline: Option<Duration>,
}

enum Trigger {
    Finished(Result<i32>),
    Canceled,
    TimedOut,
}

/// Entry point of the supervisor child. Returns the job's result code,
/// which has been persisted to the result file by the time this returns.
pub async fn supervise(opts: SupervisorOpts, registry: &ExecutorRegistry) -> Result<i32> {
    let job_dir = opts.jobs_dir.join(opts.job_id.to_string());
    std::fs::create_dir_all(&job_dir)?;

    redirect_stdio(&job_dir.join(JOB_OUTPUT_FILE))?;
    set_process_name(SUPERVISOR_PROCESS_NAME)?;
    // The cwd is part of the pid-validation contract: its basename must be
    // the job id.
    std::env::set_current_dir(&job_dir)?;

    let store = FsStore::open(&opts.state_dir)?;
    let job = store
        .job(&opts.job_id)?
        .ok_or_else(|| SchedulerError::JobNotFound(opts.job_id.to_string()))?;

    tracing::info!(job_id = %job.id, job_type = %job.job_type, "Supervisor starting executor");
    let code = match registry.build(&job.job_type, &job.parameters) {
        Ok(mut executor) => run_executor(&mut *executor, &opts).await,
        Err(e) => {
            // The job dir exists at this point, so even a build failure
            // leaves a reapable outcome behind.
            tracing::error!(job_id = %job.id, error = %e, "Cannot instantiate executor");
            RESULT_EXCEPTION
        }
    };
    let result = JobOutcome::new(code, Utc::now());
    result.write(&result_file_path(&job_dir, &opts.job_id))?;
    tracing::info!(job_id = %job.id, code, "Supervisor wrote result file");
    Ok(code)
}

async fn run_executor(executor: &mut dyn Executor, opts: &SupervisorOpts) -> i32 {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Cannot install SIGTERM handler");
            return RESULT_EXCEPTION;
        }
    };

    let trigger = {
        let run = executor.run();
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => Trigger::Finished(result),
            _ = sigterm.recv() => Trigger::Canceled,
            _ = execution_deadline(opts.execution_deadline) => Trigger::TimedOut,
        }
    };

    match trigger {
        Trigger::Finished(Ok(code)) => code,
        Trigger::Finished(Err(e)) => {
            tracing::error!(error = %e, "Executor failed");
            RESULT_EXCEPTION
        }
        Trigger::Canceled => {
            tracing::info!("Termination requested, running cleanup");
            graceful_cleanup(
                executor,
                opts.cleanup_grace,
                RESULT_CANCELED,
                RESULT_CANCELED_CLEANUP_TIMEOUT,
            )
            .await
        }
        Trigger::TimedOut => {
            tracing::warn!("Execution deadline reached, running cleanup");
            graceful_cleanup(
                executor,
                opts.cleanup_grace,
                RESULT_TIMEOUT,
                RESULT_TIMEOUT_CLEANUP_TIMEOUT,
            )
            .await
        }
    }
}

/// Second phase of cancellation/timeout: give `cleanup()` a bounded grace
/// period, then report whether it made it.
async fn graceful_cleanup(
    executor: &mut dyn Executor,
    grace: Duration,
    done_code: i32,
    overrun_code: i32,
) -> i32 {
    match tokio::time::timeout(grace, executor.cleanup()).await {
        Ok(Ok(())) => done_code,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Cleanup failed");
            done_code
        }
        Err(_) => {
            tracing::error!(grace_secs = grace.as_secs(), "Cleanup exceeded grace period");
            overrun_code
        }
    }
}

async fn execution_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => tokio::time::sleep(deadline).await,
        None => std::future::pending().await,
    }
}

/// Point fds 1 and 2 at the job's output file. The raw fd is intentionally
/// leaked: it must stay open for the lifetime of the process.
fn redirect_stdio(path: &std::path::Path) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fd = file.into_raw_fd();
    // SAFETY: fd is a valid owned descriptor; dup2 onto the standard fds
    // is the documented way to redirect them.
    unsafe {
        if libc::dup2(fd, libc::STDOUT_FILENO) < 0 || libc::dup2(fd, libc::STDERR_FILENO) < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}

/// Tag the process so pid validation can recognize it via
/// `/proc/<pid>/comm`.
fn set_process_name(name: &str) -> Result<()> {
    let cname = CString::new(name)
        .map_err(|e| SchedulerError::Internal(format!("invalid process name: {}", e)))?;
    // SAFETY: PR_SET_NAME reads a NUL-terminated string of at most 16
    // bytes; cname outlives the call.
    let rc = unsafe { libc::prctl(libc::PR_SET_NAME, cname.as_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
