use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobState, Request, RequestState};
use crate::store::Store;

/// In-memory store. State does not survive the process; used by tests and
/// embedded setups.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    requests: HashMap<Uuid, Request>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn pending_requests(&self) -> Result<Vec<Request>> {
        let inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.submit_date);
        Ok(requests)
    }

    fn jobs_in_states(&self, states: &[JobState]) -> Result<Vec<Job>> {
        let inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| states.contains(&j.state))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.submit_date);
        Ok(jobs)
    }

    fn job(&self, id: &Uuid) -> Result<Option<Job>> {
        let inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        Ok(inner.jobs.get(id).cloned())
    }

    fn request(&self, id: &Uuid) -> Result<Option<Request>> {
        let inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        Ok(inner.requests.get(id).cloned())
    }

    fn create_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        if !inner.jobs.contains_key(&job.id) {
            return Err(SchedulerError::JobNotFound(job.id.to_string()));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn create_request(&self, request: &Request) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        inner.requests.insert(request.id, request.clone());
        Ok(())
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|e| SchedulerError::Store(e.to_string()))?;
        if !inner.requests.contains_key(&request.id) {
            return Err(SchedulerError::Store(format!(
                "request not found: {}",
                request.id
            )));
        }
        inner.requests.insert(request.id, request.clone());
        Ok(())
    }
}
