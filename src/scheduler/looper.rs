use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::error::{Result, SchedulerError};
use crate::executor::ExecutorRegistry;
use crate::scheduler::job::{Job, JobState, Request, RequestAction, RequestState};
use crate::scheduler::resources::ResourceArbiter;
use crate::store::Store;
use crate::supervisor::outcome::{result_file_path, terminal_state, JobOutcome};
use crate::supervisor::process::ProcessControl;

/// The daemon's control loop.
///
/// Single-threaded and cooperative: one pass over pending requests, one
/// over active jobs, one over waiting jobs per iteration, sleeping in
/// between. The arbiter it owns is only ever touched from here, so no
/// locking is needed; the actual parallelism lives in the per-job
/// supervisor processes.
pub struct SchedulerLoop<S: Store, P: ProcessControl> {
    config: DaemonConfig,
    store: S,
    processes: P,
    registry: ExecutorRegistry,
    arbiter: ResourceArbiter,
}

impl<S: Store, P: ProcessControl> SchedulerLoop<S, P> {
    pub fn new(config: DaemonConfig, store: S, registry: ExecutorRegistry, processes: P) -> Self {
        Self {
            config,
            store,
            processes,
            registry,
            arbiter: ResourceArbiter::new(),
        }
    }

    pub fn arbiter(&self) -> &ResourceArbiter {
        &self.arbiter
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run until the shutdown token fires. Reconciles once, then iterates
    /// on the configured interval; an error inside one iteration is logged
    /// and the loop carries on.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.reconcile()?;
        let mut interval = tokio::time::interval(self.config.loop_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler loop stopping");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.iterate();
                }
            }
        }
    }

    /// Rebuild the arbiter from the persisted store and live processes.
    ///
    /// Waiting jobs re-enter their wait queues in submit order. For each
    /// recorded running/cleaning-up job the recorded pid is validated; a
    /// job whose process is gone is finalized immediately from its result
    /// file and never re-registered.
    pub fn reconcile(&mut self) -> Result<()> {
        self.arbiter.reset();

        for job in self.store.jobs_in_states(&[JobState::Waiting])? {
            if job.resources.is_empty() {
                // Persisted invariant violation; leave the record alone but
                // never schedule it.
                tracing::warn!(job_id = %job.id, "Waiting job claims no resources, skipping");
                continue;
            }
            if let Err(e) = self.arbiter.enqueue(&job) {
                tracing::error!(job_id = %job.id, error = %e, "Failed to re-enqueue waiting job");
            }
        }

        for mut job in self
            .store
            .jobs_in_states(&[JobState::Running, JobState::CleaningUp])?
        {
            if self.processes.is_alive(&job) {
                tracing::info!(job_id = %job.id, pid = ?job.pid, "Re-attached to running job");
                if let Err(e) = self.arbiter.enqueue(&job) {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to re-register active job");
                }
            } else {
                tracing::warn!(job_id = %job.id, pid = ?job.pid,
                    "Recorded job process is gone, finalizing");
                self.finalize(&mut job);
            }
        }
        Ok(())
    }

    /// One scheduler pass: drain requests, reap finished jobs, start
    /// admissible ones. Every step isolates per-item failures.
    pub fn iterate(&mut self) {
        if let Err(e) = self.process_requests() {
            tracing::error!(error = %e, "Request pass failed");
        }
        if let Err(e) = self.reap_finished() {
            tracing::error!(error = %e, "Reap pass failed");
        }
        if let Err(e) = self.start_jobs() {
            tracing::error!(error = %e, "Start pass failed");
        }
    }

    fn process_requests(&mut self) -> Result<()> {
        for mut request in self.store.pending_requests()? {
            let (state, message) = match self.handle_request(&request) {
                Ok(message) => (RequestState::Completed, message),
                Err(e) => {
                    tracing::warn!(request_id = %request.id, error = %e, "Request failed");
                    (RequestState::Failed, e.to_string())
                }
            };
            request.state = state;
            request.result = Some(message);
            if let Err(e) = self.store.update_request(&request) {
                tracing::error!(request_id = %request.id, error = %e, "Failed to persist request outcome");
            }
        }
        Ok(())
    }

    fn handle_request(&mut self, request: &Request) -> Result<String> {
        match request.action.parse::<RequestAction>()? {
            RequestAction::Submit => self.handle_submit(request),
            RequestAction::Cancel => self.handle_cancel(request),
        }
    }

    fn handle_submit(&mut self, request: &Request) -> Result<String> {
        // A submit whose outcome failed to persist comes back on the next
        // pass. The job carries the request's id, so an earlier pass that
        // already created it is visible here and the replay just completes.
        if let Some(job) = self.store.job(&request.id)? {
            tracing::warn!(request_id = %request.id, job_id = %job.id,
                "Submit request already materialized, completing it");
            return Ok(format!("Job created with id {}", job.id));
        }

        let parsed = self.registry.parse(&request.job_type, &request.parameters)?;
        parsed.resources.validate()?;

        let job = Job::from_request(request, parsed.resources, parsed.description);
        self.store.create_job(&job)?;
        self.arbiter.enqueue(&job)?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, requester = %job.requester,
            "Job accepted");
        Ok(format!("Job created with id {}", job.id))
    }

    fn handle_cancel(&mut self, request: &Request) -> Result<String> {
        let job_id = request
            .job_id
            .ok_or_else(|| SchedulerError::Internal("cancel request names no job".to_string()))?;
        let mut job = self
            .store
            .job(&job_id)?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

        match job.state {
            JobState::Waiting => {
                job.state = JobState::Canceled;
                job.result = Some(format!("Canceled by {}", request.requester));
                job.end_date = Some(Utc::now());
                self.store.update_job(&job)?;
                self.arbiter.wait_pop(&job);
                tracing::info!(job_id = %job.id, "Waiting job canceled");
                Ok("Job canceled".to_string())
            }
            JobState::Running => {
                // Two-phase cancellation, phase one: ask the supervisor to
                // clean up. Completion of this request only means the
                // cancellation was accepted.
                self.processes.terminate(&job)?;
                job.state = JobState::CleaningUp;
                self.store.update_job(&job)?;
                tracing::info!(job_id = %job.id, pid = ?job.pid, "Graceful termination signaled");
                Ok("Job cancellation scheduled".to_string())
            }
            JobState::CleaningUp => {
                // Phase two: the earlier signal was ignored or is taking
                // too long; escalate.
                self.processes.kill(&job)?;
                job.state = JobState::Canceled;
                job.result = Some(format!("Forcefully canceled by {}", request.requester));
                job.end_date = Some(Utc::now());
                self.store.update_job(&job)?;
                self.arbiter.active_pop(&job);
                tracing::info!(job_id = %job.id, pid = ?job.pid, "Job forcefully killed");
                Ok("Job forcefully canceled".to_string())
            }
            state => Err(SchedulerError::InvalidJobState {
                job_id: job.id.to_string(),
                state: state.to_string(),
                expected: "waiting, running or cleaningup".to_string(),
            }),
        }
    }

    /// Find active jobs whose process has ended and settle their terminal
    /// state from the result file.
    fn reap_finished(&mut self) -> Result<()> {
        for mut job in self
            .store
            .jobs_in_states(&[JobState::Running, JobState::CleaningUp])?
        {
            if self.processes.is_alive(&job) {
                continue;
            }
            self.finalize(&mut job);
        }
        Ok(())
    }

    fn finalize(&mut self, job: &mut Job) {
        let path = result_file_path(&self.config.job_dir(&job.id), &job.id);
        match JobOutcome::read(&path) {
            Ok(outcome) => {
                let (state, message) = terminal_state(job.state, &outcome);
                tracing::info!(job_id = %job.id, code = outcome.code, state = %state, "Job reaped");
                job.state = state;
                job.result = Some(message);
                job.end_date = Some(outcome.ended_at);
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e,
                    "No usable result file, marking job failed");
                job.state = JobState::Failed;
                job.result = Some("Job ended in unknown state".to_string());
                job.end_date = Some(Utc::now());
            }
        }
        if let Err(e) = self.store.update_job(job) {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job outcome");
        }
        self.arbiter.active_pop(job);
    }

    /// Start every waiting job the arbiter admits. Admission always sees
    /// the arbiter's current state, so jobs started earlier in this pass
    /// block conflicting ones in the same pass.
    fn start_jobs(&mut self) -> Result<()> {
        for mut job in self.store.jobs_in_states(&[JobState::Waiting])? {
            let now = Utc::now();
            if !self.arbiter.can_start(&job, now) {
                continue;
            }
            match self.processes.spawn(&job) {
                Ok(pid) => {
                    self.arbiter.wait_pop(&job);
                    job.state = JobState::Running;
                    job.pid = Some(pid);
                    job.start_date = Some(now);
                    if let Err(e) = self.store.update_job(&job) {
                        tracing::error!(job_id = %job.id, error = %e,
                            "Failed to persist started job");
                    }
                    if let Err(e) = self.arbiter.enqueue(&job) {
                        tracing::error!(job_id = %job.id, error = %e,
                            "Failed to register active job");
                    }
                    tracing::info!(job_id = %job.id, pid, "Job started");
                }
                Err(e) => {
                    // Transient spawn failures leave the job waiting; it is
                    // retried on the next iteration.
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to spawn job, will retry");
                }
            }
        }
        Ok(())
    }
}
