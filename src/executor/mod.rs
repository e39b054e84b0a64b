//! Executor contract and registry.
//!
//! An executor implements the actual work of one job type (an OS install
//! flow, a playbook run, ...). The scheduler core treats it as opaque: it
//! calls `parse` at submit time to learn the job's resource claims and
//! description, and the supervisor child drives `run`/`cleanup`.
//!
//! The registry is a closed map populated explicitly at daemon startup;
//! there is no runtime discovery of job types.

pub mod echo;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::ResourceClaims;

/// Outcome of parsing a request's raw parameters.
#[derive(Debug, Clone)]
pub struct ParsedJob {
    pub resources: ResourceClaims,
    pub description: String,
}

/// A running job's executor instance, hosted by the supervisor child.
#[async_trait]
pub trait Executor: Send {
    /// Perform the job's work. The returned code becomes the job's result
    /// code (0 = success).
    async fn run(&mut self) -> Result<i32>;

    /// Release external resources after a cancel or timeout. Bounded by
    /// the supervisor's grace period.
    async fn cleanup(&mut self) -> Result<()>;
}

/// Static entry points of one job type. `parse` must be side-effect-free:
/// it is also used during startup reconciliation sanity checks.
pub struct ExecutorKind {
    pub parse: fn(&str) -> Result<ParsedJob>,
    pub build: fn(&str) -> Result<Box<dyn Executor>>,
}

/// Closed job-type registry, one [`ExecutorKind`] per type name.
#[derive(Default)]
pub struct ExecutorRegistry {
    kinds: HashMap<String, ExecutorKind>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in executors.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", ExecutorKind {
            parse: echo::parse,
            build: echo::build,
        });
        registry
    }

    pub fn register(&mut self, job_type: &str, kind: ExecutorKind) {
        self.kinds.insert(job_type.to_string(), kind);
    }

    fn kind(&self, job_type: &str) -> Result<&ExecutorKind> {
        self.kinds
            .get(job_type)
            .ok_or_else(|| SchedulerError::UnknownJobType(job_type.to_string()))
    }

    /// Parse raw parameters for the named job type into resource claims
    /// and a description.
    pub fn parse(&self, job_type: &str, parameters: &str) -> Result<ParsedJob> {
        (self.kind(job_type)?.parse)(parameters)
    }

    /// Instantiate an executor for the named job type.
    pub fn build(&self, job_type: &str, parameters: &str) -> Result<Box<dyn Executor>> {
        (self.kind(job_type)?.build)(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_job_type_is_an_error() {
        let registry = ExecutorRegistry::builtin();
        assert!(matches!(
            registry.parse("teleport", ""),
            Err(SchedulerError::UnknownJobType(_))
        ));
    }

    #[test]
    fn builtin_registry_knows_echo() {
        let registry = ExecutorRegistry::builtin();
        let parsed = registry.parse("echo", "USE EXCLUSIVE lpar01").unwrap();
        assert_eq!(parsed.resources.exclusive, vec!["lpar01".to_string()]);
    }
}
