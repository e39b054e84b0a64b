pub mod job;
pub mod looper;
pub mod resources;

pub use job::{Job, JobState, Request, RequestState, ResourceClaims, TimeSlot};
pub use looper::SchedulerLoop;
pub use resources::ResourceArbiter;
