use chrono::{Duration, Utc};

use lparsched::scheduler::job::{Job, JobState, ResourceClaims};
use lparsched::scheduler::ResourceArbiter;

fn job_on(resource: &str) -> Job {
    Job::new(
        "tester".to_string(),
        "echo".to_string(),
        0,
        ResourceClaims {
            exclusive: vec![],
            shared: vec![resource.to_string()],
        },
        "test".to_string(),
        String::new(),
        None,
        0,
    )
}

/// Queue order for a shared resource must be exactly
/// [earlier date, later date, better priority, worse priority],
/// independent of enqueue order.
#[test]
fn wait_queue_order_is_stable_under_tie_break() {
    let now = Utc::now();

    let mut t1 = job_on("cpc1");
    t1.start_date = Some(now + Duration::hours(1));
    let mut t2 = job_on("cpc1");
    t2.start_date = Some(now + Duration::hours(2));
    let mut p1 = job_on("cpc1");
    p1.priority = 1;
    p1.submit_date = now - Duration::minutes(2);
    let mut p1_late = job_on("cpc1");
    p1_late.priority = 1;
    p1_late.submit_date = now - Duration::minutes(1);
    let mut p2 = job_on("cpc1");
    p2.priority = 2;
    p2.submit_date = now - Duration::minutes(3);

    let expected = vec![t1.id, t2.id, p1.id, p1_late.id, p2.id];

    // try a few enqueue orders; the resulting queue must not change
    for order in [
        vec![&t1, &t2, &p1, &p1_late, &p2],
        vec![&p2, &p1_late, &p1, &t2, &t1],
        vec![&p1_late, &t2, &p2, &t1, &p1],
    ] {
        let mut arbiter = ResourceArbiter::new();
        for job in order {
            arbiter.enqueue(job).unwrap();
        }
        assert_eq!(arbiter.queued_jobs("cpc1"), expected);
    }
}

#[test]
fn exclusive_and_shared_holders_never_coexist() {
    let mut arbiter = ResourceArbiter::new();
    let now = Utc::now();

    let mut exclusive = Job::new(
        "tester".to_string(),
        "echo".to_string(),
        0,
        ResourceClaims {
            exclusive: vec!["disk7".to_string()],
            shared: vec![],
        },
        "test".to_string(),
        String::new(),
        None,
        0,
    );
    exclusive.state = JobState::Running;
    arbiter.enqueue(&exclusive).unwrap();

    let shared = job_on("disk7");
    arbiter.enqueue(&shared).unwrap();
    assert!(!arbiter.can_start(&shared, now));

    arbiter.active_pop(&exclusive);
    assert!(arbiter.can_start(&shared, now));
}

#[test]
fn pops_on_unknown_jobs_never_panic() {
    let mut arbiter = ResourceArbiter::new();
    let job = job_on("cpc1");
    arbiter.wait_pop(&job);
    arbiter.active_pop(&job);
    arbiter.wait_pop(&job);
}
