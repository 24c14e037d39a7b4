use crate::internal::common::ids::{ClaimToken, ClusterId, ProcId};
use crate::internal::server::allocation::AllocationStatus;
use crate::internal::server::claim::ClaimStatus;
use crate::internal::server::core::SchedConfig;
use crate::internal::server::recovery::{ReconnectJob, check_reconnect_queue, enqueue_reconnect_jobs};
use crate::internal::tests::utils::cluster::cluster_with_procs;
use crate::internal::tests::utils::env::{TestEnv, create_test_comm};
use crate::internal::tests::utils::resource::resource;
use std::time::Instant;

fn reconnect_job(cluster: u32, procs: &[&[(&str, &str)]]) -> ReconnectJob {
    ReconnectJob::new(
        ClusterId::new(cluster),
        procs
            .iter()
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(token, name)| (ClaimToken::new(*token), name.to_string()))
                    .collect()
            })
            .collect(),
    )
}

/// A persisted cluster of 2 procs x 2 nodes with all four
/// (token, resource) pairs resolvable comes back as one Running allocation
/// with two claims per proc, without the planner being involved.
#[test]
fn full_recovery_scenario() {
    let mut env = TestEnv::new();
    let mut comm = create_test_comm();
    let now = Instant::now();

    env.core().add_cluster(cluster_with_procs(5, &[2, 2]));
    enqueue_reconnect_jobs(
        env.core(),
        vec![reconnect_job(
            5,
            &[
                &[("t1", "m1"), ("t2", "m2")],
                &[("t3", "m3"), ("t4", "m4")],
            ],
        )],
    );
    env.set_snapshot(vec![
        resource("m1"),
        resource("m2"),
        resource("m3"),
        resource("m4"),
    ]);

    check_reconnect_queue(env.core(), now);

    let allocation = env.core().allocations().get(ClusterId::new(5));
    assert!(allocation.is_recovered);
    assert_eq!(allocation.proc_claims(ProcId::new(0)).len(), 2);
    assert_eq!(allocation.proc_claims(ProcId::new(1)).len(), 2);
    for token in ["t1", "t2", "t3", "t4"] {
        let claim = env.core().claims().find(&ClaimToken::new(token)).unwrap();
        assert_eq!(claim.status(), ClaimStatus::Claimed);
        assert!(claim.is_allocated());
    }
    assert!(env.core().reconnect_queue().is_empty());

    // Re-attach through the normal spawn step
    env.schedule(&mut comm, now);
    let allocation = env.core().allocations().get(ClusterId::new(5));
    assert_eq!(allocation.status, AllocationStatus::Running);
    let spawns = comm.take_spawns(1);
    assert!(spawns[0].is_reconnect);
    // Reconnect spawns only refresh the node count, never the claim list
    for (_, update) in comm.take_job_updates() {
        assert_eq!(update.node_count, Some(4));
        assert!(update.claim_tokens.is_none());
    }
}

#[test]
fn unresolved_resources_defer_recovery() {
    let mut env = TestEnv::new();
    let now = Instant::now();

    env.core().add_cluster(cluster_with_procs(5, &[1]));
    enqueue_reconnect_jobs(env.core(), vec![reconnect_job(5, &[&[("t1", "gone")]])]);
    env.set_snapshot(vec![resource("m1")]);

    check_reconnect_queue(env.core(), now);

    assert!(env.core().allocations().is_empty());
    assert_eq!(env.core().reconnect_queue().len(), 1);
    assert_eq!(env.core().reconnect_queue()[0].attempts, 1);
    // A cluster waiting for reconnect is invisible to the planner
    env.plan();
    assert!(env.core().allocations().is_empty());
}

#[test]
fn repeated_failures_fall_back_to_planning() {
    let mut env = TestEnv::with_config(SchedConfig {
        reconnect_retry_limit: 2,
        ..Default::default()
    });
    let now = Instant::now();

    env.core().add_cluster(cluster_with_procs(5, &[1]));
    enqueue_reconnect_jobs(env.core(), vec![reconnect_job(5, &[&[("t1", "gone")]])]);
    env.set_snapshot(vec![resource("m1")]);

    check_reconnect_queue(env.core(), now);
    assert_eq!(env.core().reconnect_queue().len(), 1);
    check_reconnect_queue(env.core(), now);
    // Given up: the job is left idle for normal planning, not failed
    assert!(env.core().reconnect_queue().is_empty());
    assert!(env.core().find_cluster(ClusterId::new(5)).is_some());

    // Planning can now lease resources for it the ordinary way
    env.new_claim("m1", ClaimStatus::Claimed, now);
    env.plan();
    assert!(env.core().allocations().contains(ClusterId::new(5)));
}

#[test]
fn mismatched_persisted_state_is_dropped() {
    let mut env = TestEnv::new();
    let now = Instant::now();

    env.core().add_cluster(cluster_with_procs(5, &[2]));
    // Persisted list claims one node, the proc wants two
    enqueue_reconnect_jobs(env.core(), vec![reconnect_job(5, &[&[("t1", "m1")]])]);
    env.set_snapshot(vec![resource("m1")]);

    check_reconnect_queue(env.core(), now);

    assert!(env.core().allocations().is_empty());
    assert!(env.core().reconnect_queue().is_empty());
}

#[test]
fn conflicting_live_claim_defers_recovery() {
    let mut env = TestEnv::new();
    let now = Instant::now();

    env.core().add_cluster(cluster_with_procs(5, &[1]));
    enqueue_reconnect_jobs(env.core(), vec![reconnect_job(5, &[&[("t1", "m1")]])]);
    env.set_snapshot(vec![resource("m1")]);
    // Somebody already holds a claim on that resource
    env.new_claim("m1", ClaimStatus::Claimed, now);

    check_reconnect_queue(env.core(), now);

    assert!(env.core().allocations().is_empty());
    assert_eq!(env.core().reconnect_queue().len(), 1);
}
