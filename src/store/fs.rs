use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::{Job, JobState, Request, RequestState};
use crate::store::Store;

/// File-backed store: one JSON document per job/request under
/// `<state_dir>/jobs` and `<state_dir>/requests`. Updates go through a
/// temp file and rename so a crashed writer never leaves a truncated
/// document behind.
pub struct FsStore {
    jobs_dir: PathBuf,
    requests_dir: PathBuf,
}

impl FsStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        let jobs_dir = state_dir.join("jobs");
        let requests_dir = state_dir.join("requests");
        fs::create_dir_all(&jobs_dir)?;
        fs::create_dir_all(&requests_dir)?;
        Ok(Self {
            jobs_dir,
            requests_dir,
        })
    }

    fn write_doc<T: serde::Serialize>(dir: &Path, id: &Uuid, doc: &T) -> Result<()> {
        let tmp = dir.join(format!(".{}.tmp", id));
        fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        fs::rename(&tmp, dir.join(format!("{}.json", id)))?;
        Ok(())
    }

    fn read_all<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match serde_json::from_slice(&fs::read(&path)?) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    // One corrupt document must not take the whole store down.
                    tracing::error!(path = %path.display(), error = %e, "Skipping unreadable document");
                }
            }
        }
        Ok(docs)
    }
}

impl Store for FsStore {
    fn pending_requests(&self) -> Result<Vec<Request>> {
        let mut requests: Vec<Request> = Self::read_all(&self.requests_dir)?;
        requests.retain(|r| r.state == RequestState::Pending);
        requests.sort_by_key(|r| r.submit_date);
        Ok(requests)
    }

    fn jobs_in_states(&self, states: &[JobState]) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = Self::read_all(&self.jobs_dir)?;
        jobs.retain(|j| states.contains(&j.state));
        jobs.sort_by_key(|j| j.submit_date);
        Ok(jobs)
    }

    fn job(&self, id: &Uuid) -> Result<Option<Job>> {
        let path = self.jobs_dir.join(format!("{}.json", id));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(&path)?)?))
    }

    fn request(&self, id: &Uuid) -> Result<Option<Request>> {
        let path = self.requests_dir.join(format!("{}.json", id));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(&path)?)?))
    }

    fn create_job(&self, job: &Job) -> Result<()> {
        Self::write_doc(&self.jobs_dir, &job.id, job)
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        Self::write_doc(&self.jobs_dir, &job.id, job)
    }

    fn create_request(&self, request: &Request) -> Result<()> {
        Self::write_doc(&self.requests_dir, &request.id, request)
    }

    fn update_request(&self, request: &Request) -> Result<()> {
        Self::write_doc(&self.requests_dir, &request.id, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::ResourceClaims;

    fn sample_job() -> Job {
        Job::new(
            "tester".to_string(),
            "echo".to_string(),
            2,
            ResourceClaims {
                exclusive: vec!["lpar01".to_string()],
                shared: vec!["cpc3".to_string()],
            },
            "install RHEL on lpar01".to_string(),
            "USE EXCLUSIVE lpar01".to_string(),
            None,
            30,
        )
    }

    #[test]
    fn job_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        let job = sample_job();
        store.create_job(&job).unwrap();

        let loaded = store.job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.resources, job.resources);
        assert_eq!(loaded.timeout_minutes, 30);
        assert_eq!(loaded.state, JobState::Waiting);
    }

    #[test]
    fn update_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        let mut job = sample_job();
        store.create_job(&job).unwrap();
        job.state = JobState::Running;
        job.pid = Some(4242);
        store.update_job(&job).unwrap();

        let loaded = store.job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Running);
        assert_eq!(loaded.pid, Some(4242));
        assert_eq!(store.jobs_in_states(&[JobState::Waiting]).unwrap().len(), 0);
    }

    #[test]
    fn missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.job(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn corrupt_document_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.create_job(&sample_job()).unwrap();
        fs::write(dir.path().join("jobs").join("bogus.json"), b"{not json").unwrap();

        assert_eq!(store.jobs_in_states(&[JobState::Waiting]).unwrap().len(), 1);
    }

    #[test]
    fn request_round_trip_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        let mut older = Request::submit("a".to_string(), "echo".to_string(), String::new());
        older.submit_date = older.submit_date - chrono::Duration::minutes(1);
        let newer = Request::submit("b".to_string(), "echo".to_string(), String::new());
        store.create_request(&newer).unwrap();
        store.create_request(&older).unwrap();

        let pending = store.pending_requests().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older.id);

        let mut done = newer.clone();
        done.state = RequestState::Completed;
        store.update_request(&done).unwrap();
        assert_eq!(store.pending_requests().unwrap().len(), 1);
    }
}
