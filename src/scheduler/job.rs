use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Scheduling window a job belongs to. Only the default slot is active;
/// the night slot is reserved and never evaluates as current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSlot {
    Default,
    Night,
}

impl TimeSlot {
    /// The slot the scheduler is currently serving.
    pub fn current() -> Self {
        TimeSlot::Default
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeSlot::Default => write!(f, "default"),
            TimeSlot::Night => write!(f, "night"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    Running,
    CleaningUp,
    Canceled,
    Completed,
    Failed,
}

impl JobState {
    /// True once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Canceled | JobState::Completed | JobState::Failed
        )
    }

    /// True while the job is expected to have a live supervisor process.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::CleaningUp)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::CleaningUp => write!(f, "cleaningup"),
            JobState::Canceled => write!(f, "canceled"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Resource names a job claims, split by use mode. Computed once by the
/// executor's `parse` at submit time and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClaims {
    pub exclusive: Vec<String>,
    pub shared: Vec<String>,
}

impl ResourceClaims {
    /// Every resource the job touches, in either mode.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.exclusive.iter().chain(self.shared.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.exclusive.is_empty() && self.shared.is_empty()
    }

    /// A claim set is well-formed when it names at least one resource and
    /// no resource appears in both modes.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.is_empty() {
            return Err(SchedulerError::InvalidResources(
                "job claims no resources".to_string(),
            ));
        }
        for name in &self.exclusive {
            if self.shared.contains(name) {
                return Err(SchedulerError::InvalidResources(format!(
                    "resource {} claimed both exclusive and shared",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// A unit of scheduled, resource-claiming work with a persisted lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub requester: String,
    /// Lower value wins among jobs without a start date.
    pub priority: i32,
    /// Names the executor implementing this job's work.
    pub job_type: String,
    pub time_slot: TimeSlot,
    pub state: JobState,
    pub resources: ResourceClaims,
    pub description: String,
    /// Opaque parameter blob, interpreted only by the executor.
    pub parameters: String,
    pub submit_date: DateTime<Utc>,
    /// Desired earliest start; a job with one outranks any job without.
    pub start_date: Option<DateTime<Utc>>,
    /// Execution budget in minutes, 0 = unbounded.
    pub timeout_minutes: u32,
    /// Supervisor process id, set once the job is running.
    pub pid: Option<u32>,
    pub result: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        requester: String,
        job_type: String,
        priority: i32,
        resources: ResourceClaims,
        description: String,
        parameters: String,
        start_date: Option<DateTime<Utc>>,
        timeout_minutes: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            priority,
            job_type,
            time_slot: TimeSlot::Default,
            state: JobState::Waiting,
            resources,
            description,
            parameters,
            submit_date: Utc::now(),
            start_date,
            timeout_minutes,
            pid: None,
            result: None,
            end_date: None,
        }
    }

    /// Build the waiting job for an accepted submit request. The job takes
    /// over the request's id, so replaying the same submit maps onto the
    /// same job document.
    pub fn from_request(req: &Request, resources: ResourceClaims, description: String) -> Self {
        let mut job = Job::new(
            req.requester.clone(),
            req.job_type.clone(),
            req.priority,
            resources,
            description,
            req.parameters.clone(),
            req.start_date,
            req.timeout_minutes,
        );
        job.id = req.id;
        job.submit_date = req.submit_date;
        job
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Completed => write!(f, "completed"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}

/// Recognized request actions. Persisted requests carry the action as a
/// plain string so an unrecognized value fails that one request when it is
/// consumed, instead of poisoning deserialization of the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Submit,
    Cancel,
}

impl RequestAction {
    pub const SUBMIT: &'static str = "SUBMIT";
    pub const CANCEL: &'static str = "CANCEL";
}

impl FromStr for RequestAction {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::SUBMIT => Ok(RequestAction::Submit),
            Self::CANCEL => Ok(RequestAction::Cancel),
            other => Err(SchedulerError::Internal(format!(
                "invalid action type {}",
                other
            ))),
        }
    }
}

/// A user intent record: submit a new job or cancel an existing one.
/// Created pending by the intake surface, consumed exactly once by the
/// scheduler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub requester: String,
    pub action: String,
    /// Executor name, for submit requests.
    pub job_type: String,
    /// Target job, for cancel requests.
    pub job_id: Option<Uuid>,
    pub submit_date: DateTime<Utc>,
    pub priority: i32,
    pub timeout_minutes: u32,
    pub start_date: Option<DateTime<Utc>>,
    pub parameters: String,
    pub state: RequestState,
    pub result: Option<String>,
}

impl Request {
    pub fn submit(requester: String, job_type: String, parameters: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            action: RequestAction::SUBMIT.to_string(),
            job_type,
            job_id: None,
            submit_date: Utc::now(),
            priority: 0,
            timeout_minutes: 0,
            start_date: None,
            parameters,
            state: RequestState::Pending,
            result: None,
        }
    }

    pub fn cancel(requester: String, job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester,
            action: RequestAction::CANCEL.to_string(),
            job_type: String::new(),
            job_id: Some(job_id),
            submit_date: Utc::now(),
            priority: 0,
            timeout_minutes: 0,
            start_date: None,
            parameters: String::new(),
            state: RequestState::Pending,
            result: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn with_timeout(mut self, minutes: u32) -> Self {
        self.timeout_minutes = minutes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_validate_rejects_overlap() {
        let claims = ResourceClaims {
            exclusive: vec!["lpar01".to_string()],
            shared: vec!["cpc3".to_string(), "lpar01".to_string()],
        };
        assert!(claims.validate().is_err());
    }

    #[test]
    fn claims_validate_rejects_empty() {
        assert!(ResourceClaims::default().validate().is_err());
    }

    #[test]
    fn claims_all_walks_both_modes() {
        let claims = ResourceClaims {
            exclusive: vec!["lpar01".to_string()],
            shared: vec!["cpc3".to_string()],
        };
        let names: Vec<&String> = claims.all().collect();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn action_parse() {
        assert_eq!(
            "SUBMIT".parse::<RequestAction>().unwrap(),
            RequestAction::Submit
        );
        assert_eq!(
            "CANCEL".parse::<RequestAction>().unwrap(),
            RequestAction::Cancel
        );
        assert!("RESTART".parse::<RequestAction>().is_err());
    }

    #[test]
    fn job_from_request_carries_submit_date() {
        let req = Request::submit(
            "admin".to_string(),
            "echo".to_string(),
            "USE EXCLUSIVE lpar01".to_string(),
        )
        .with_priority(3)
        .with_timeout(10);
        let claims = ResourceClaims {
            exclusive: vec!["lpar01".to_string()],
            shared: vec![],
        };
        let job = Job::from_request(&req, claims, "test job".to_string());
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.id, req.id);
        assert_eq!(job.submit_date, req.submit_date);
        assert_eq!(job.priority, 3);
        assert_eq!(job.timeout_minutes, 10);
        assert!(job.pid.is_none());
    }

    #[test]
    fn terminal_and_active_classification() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(JobState::Running.is_active());
        assert!(JobState::CleaningUp.is_active());
        assert!(!JobState::Waiting.is_active());
    }
}
