//! Persisted job/request store contract.
//!
//! The store is the only state that survives a daemon restart; the
//! scheduler's in-memory model is always rebuilt from it. The loop needs
//! nothing beyond the CRUD-like operations below, so the backend is a
//! trait: [`FsStore`] persists JSON documents on disk, [`MemStore`] backs
//! tests and embedded use.

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemStore;

use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{Job, JobState, Request};

pub trait Store: Send + Sync {
    /// All pending requests, oldest submit date first.
    fn pending_requests(&self) -> Result<Vec<Request>>;

    /// All jobs in any of the given states, oldest submit date first.
    fn jobs_in_states(&self, states: &[JobState]) -> Result<Vec<Job>>;

    /// Look up one job by id.
    fn job(&self, id: &Uuid) -> Result<Option<Job>>;

    /// Look up one request by id.
    fn request(&self, id: &Uuid) -> Result<Option<Request>>;

    fn create_job(&self, job: &Job) -> Result<()>;

    fn update_job(&self, job: &Job) -> Result<()>;

    fn create_request(&self, request: &Request) -> Result<()>;

    fn update_request(&self, request: &Request) -> Result<()>;
}
