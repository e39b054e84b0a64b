use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobState, TimeSlot};

/// Safety margin added to a candidate's timeout when it tries to slip in
/// ahead of a scheduled job (admission rule, opportunistic fill).
const START_DATE_MARGIN_MINUTES: i64 = 5;

/// One entry in a resource's wait queue. A lightweight projection of the
/// job fields the ordering and admission rules need.
#[derive(Debug, Clone)]
struct Waiter {
    job_id: Uuid,
    priority: i32,
    submit_date: DateTime<Utc>,
    start_date: Option<DateTime<Utc>>,
}

impl Waiter {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            priority: job.priority,
            submit_date: job.submit_date,
            start_date: job.start_date,
        }
    }

    /// Ordering key for queue insertion: jobs with a start date first
    /// (earlier dates ahead), then no-date jobs by priority, then by
    /// submit date.
    fn rank(&self) -> (u8, DateTime<Utc>, i32, DateTime<Utc>) {
        match self.start_date {
            Some(date) => (0, date, self.priority, self.submit_date),
            None => (1, DateTime::<Utc>::MAX_UTC, self.priority, self.submit_date),
        }
    }
}

/// Arbitrates exclusive/shared ownership of hardware resources.
///
/// Keeps, per time slot, an ordered wait queue of waiting jobs for every
/// claimed resource, plus the active holders of each resource. Owned and
/// mutated only by the scheduler loop's single thread of control; never
/// persisted — rebuilt from the store at daemon startup.
#[derive(Debug, Default)]
pub struct ResourceArbiter {
    wait_queues: HashMap<TimeSlot, HashMap<String, Vec<Waiter>>>,
    active_exclusive: HashMap<String, Uuid>,
    // Shared holders are tracked as a set per resource so reconciliation
    // after a restart with several concurrent shared jobs stays accurate.
    active_shared: HashMap<String, HashSet<Uuid>>,
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all queues and active sets. Called once before startup
    /// reconciliation.
    pub fn reset(&mut self) {
        self.wait_queues.clear();
        self.active_exclusive.clear();
        self.active_shared.clear();
    }

    /// Register a job with the arbiter.
    ///
    /// A waiting job enters the wait queue of every resource it claims at
    /// the position given by the tie-break rule. A running/cleaning-up job
    /// goes straight into the active maps. Any other state means the
    /// persisted store and the in-memory model have diverged.
    pub fn enqueue(&mut self, job: &Job) -> Result<()> {
        match job.state {
            JobState::Waiting => {
                let waiter = Waiter::from_job(job);
                let queues = self.wait_queues.entry(job.time_slot).or_default();
                for resource in job.resources.all() {
                    let queue = queues.entry(resource.clone()).or_default();
                    let pos = queue
                        .iter()
                        .position(|other| other.rank() > waiter.rank())
                        .unwrap_or(queue.len());
                    queue.insert(pos, waiter.clone());
                }
                Ok(())
            }
            JobState::Running | JobState::CleaningUp => {
                for resource in &job.resources.exclusive {
                    self.active_exclusive.insert(resource.clone(), job.id);
                }
                for resource in &job.resources.shared {
                    self.active_shared
                        .entry(resource.clone())
                        .or_default()
                        .insert(job.id);
                }
                Ok(())
            }
            state => Err(SchedulerError::InvalidJobState {
                job_id: job.id.to_string(),
                state: state.to_string(),
                expected: "waiting, running or cleaningup".to_string(),
            }),
        }
    }

    /// Remove a job from every wait queue it appears in. No-op if absent.
    pub fn wait_pop(&mut self, job: &Job) {
        for queues in self.wait_queues.values_mut() {
            for queue in queues.values_mut() {
                queue.retain(|w| w.job_id != job.id);
            }
            queues.retain(|_, queue| !queue.is_empty());
        }
    }

    /// Remove a job from every active map it appears in. No-op if absent.
    pub fn active_pop(&mut self, job: &Job) {
        self.active_exclusive.retain(|_, holder| *holder != job.id);
        for holders in self.active_shared.values_mut() {
            holders.remove(&job.id);
        }
        self.active_shared.retain(|_, holders| !holders.is_empty());
    }

    /// Decide whether a waiting job may start now. Side-effect-free and
    /// infallible: any blocked condition just returns false (and says why
    /// at debug level).
    pub fn can_start(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if job.state != JobState::Waiting {
            tracing::debug!(job_id = %job.id, state = %job.state, "Not admissible: not waiting");
            return false;
        }

        if let Some(start) = job.start_date {
            if start > now {
                tracing::debug!(job_id = %job.id, start = %start, "Not admissible: start date in the future");
                return false;
            }
        }

        for resource in &job.resources.exclusive {
            if let Some(holder) = self.active_exclusive.get(resource) {
                tracing::debug!(job_id = %job.id, resource, holder = %holder,
                    "Not admissible: exclusive resource held exclusively");
                return false;
            }
            if self.active_shared.get(resource).is_some_and(|h| !h.is_empty()) {
                tracing::debug!(job_id = %job.id, resource,
                    "Not admissible: exclusive resource held in shared mode");
                return false;
            }
        }

        for resource in &job.resources.shared {
            if let Some(holder) = self.active_exclusive.get(resource) {
                tracing::debug!(job_id = %job.id, resource, holder = %holder,
                    "Not admissible: shared resource held exclusively");
                return false;
            }
        }

        if job.time_slot != TimeSlot::current() {
            tracing::debug!(job_id = %job.id, slot = %job.time_slot, "Not admissible: outside current time slot");
            return false;
        }

        for resource in job.resources.all() {
            if !self.first_in_line(job, resource, now) {
                return false;
            }
        }

        true
    }

    /// Queue-order check for one resource: the job must head the queue, or
    /// qualify for the opportunistic-fill exception ahead of a scheduled
    /// head job.
    fn first_in_line(&self, job: &Job, resource: &str, now: DateTime<Utc>) -> bool {
        let queue = match self
            .wait_queues
            .get(&job.time_slot)
            .and_then(|queues| queues.get(resource))
        {
            Some(queue) => queue,
            None => {
                tracing::warn!(job_id = %job.id, resource, "Job not enqueued for claimed resource");
                return false;
            }
        };
        let pos = match queue.iter().position(|w| w.job_id == job.id) {
            Some(pos) => pos,
            None => {
                tracing::warn!(job_id = %job.id, resource, "Job not enqueued for claimed resource");
                return false;
            }
        };
        if pos == 0 {
            return true;
        }

        // A short unscheduled job may fill the gap before a scheduled head
        // job, provided its own budget (plus margin) ends strictly before
        // the head's start date and no other unscheduled job is ahead of it.
        let head_start = match queue[0].start_date {
            Some(start) if job.start_date.is_none() => start,
            _ => {
                tracing::debug!(job_id = %job.id, resource, position = pos,
                    "Not admissible: not at queue head");
                return false;
            }
        };
        if job.timeout_minutes == 0 {
            tracing::debug!(job_id = %job.id, resource,
                "Not admissible: unbounded job cannot fill before scheduled head");
            return false;
        }
        let finish_by = now
            + Duration::minutes(job.timeout_minutes as i64)
            + Duration::minutes(START_DATE_MARGIN_MINUTES);
        if finish_by >= head_start {
            tracing::debug!(job_id = %job.id, resource, head_start = %head_start,
                "Not admissible: would overrun scheduled head job");
            return false;
        }
        if queue[..pos].iter().any(|w| w.start_date.is_none()) {
            tracing::debug!(job_id = %job.id, resource,
                "Not admissible: another unscheduled job is ahead in the queue");
            return false;
        }
        true
    }

    /// Queue order for one resource in the current slot, front first.
    /// Observability/test helper.
    pub fn queued_jobs(&self, resource: &str) -> Vec<Uuid> {
        self.wait_queues
            .get(&TimeSlot::current())
            .and_then(|queues| queues.get(resource))
            .map(|queue| queue.iter().map(|w| w.job_id).collect())
            .unwrap_or_default()
    }

    /// Active holders of one resource, across both modes. A healthy
    /// arbiter records at most one of the two for a resource; if both are
    /// present, both are reported.
    pub fn active_holders(&self, resource: &str) -> Vec<Uuid> {
        let mut holders: Vec<Uuid> = self
            .active_exclusive
            .get(resource)
            .copied()
            .into_iter()
            .collect();
        if let Some(shared) = self.active_shared.get(resource) {
            holders.extend(shared.iter().copied());
        }
        holders
    }
}
