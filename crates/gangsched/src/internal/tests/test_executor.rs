use crate::internal::common::ids::ClusterId;
use crate::internal::messages::owner::ToOwnerMessage;
use crate::internal::server::allocation::AllocationStatus;
use crate::internal::server::claim::ClaimStatus;
use crate::internal::server::comm::JobStatus;
use crate::internal::server::executor::{ExitReason, on_executor_exit, spawn_allocations};
use crate::internal::tests::utils::cluster::ClusterBuilder;
use crate::internal::tests::utils::env::{TestComm, TestEnv, create_test_comm};
use crate::internal::tests::utils::resource::{owner_addr, resource};
use std::time::Instant;

fn env_with_allocation(names: &[&str], procs: &[u32]) -> TestEnv {
    let mut env = TestEnv::new();
    let now = Instant::now();
    for name in names {
        env.new_claim(name, ClaimStatus::Claimed, now);
    }
    env.set_snapshot(names.iter().map(|n| resource(n)).collect());
    let mut builder = ClusterBuilder::new(1);
    for &n in procs {
        builder = builder.proc(n);
    }
    env.core().add_cluster(builder.build());
    env.plan();
    assert!(env.core().allocations().contains(ClusterId::new(1)));
    env
}

fn spawn(env: &mut TestEnv) -> TestComm {
    let mut comm = create_test_comm();
    spawn_allocations(env.core(), &mut comm, Instant::now());
    env.core().sanity_check();
    comm
}

#[test]
fn spawn_marks_everything_running() {
    let mut env = env_with_allocation(&["a", "b", "c"], &[2, 1]);
    let mut comm = spawn(&mut env);

    let spawns = comm.take_spawns(1);
    assert_eq!(spawns[0].cluster_id, ClusterId::new(1));
    assert_eq!(spawns[0].procs.len(), 2);
    assert_eq!(spawns[0].procs[0].claims.len(), 2);
    assert!(!spawns[0].is_reconnect);

    let allocation = env.core().allocations().get(ClusterId::new(1));
    assert_eq!(allocation.status, AllocationStatus::Running);
    assert_eq!(allocation.attachment.as_ref(), Some(&spawns[0].attachment));
    let tokens: Vec<_> = allocation.all_claims().cloned().collect();
    for token in &tokens {
        assert_eq!(
            env.core().claims().find(token).unwrap().status(),
            ClaimStatus::Active
        );
    }

    // Every proc got the total node count and its claim list persisted
    let updates = comm.take_job_updates();
    assert_eq!(updates.len(), 2);
    for (_, update) in &updates {
        assert_eq!(update.node_count, Some(3));
        assert!(update.claim_tokens.is_some());
        assert!(update.remote_hosts.is_some());
    }

    let statuses = comm.take_status_changes(1);
    assert_eq!(statuses[0].1, JobStatus::Running);
}

#[test]
fn missing_executor_puts_job_on_hold() {
    let mut env = env_with_allocation(&["a"], &[1]);
    let mut comm = create_test_comm();
    comm.fail_spawn = true;

    spawn_allocations(env.core(), &mut comm, Instant::now());

    let statuses = comm.take_status_changes(1);
    assert_eq!(statuses[0].1, JobStatus::Held);
    assert!(statuses[0].2.as_deref().unwrap().contains("executor"));

    // The allocation is undone but the lease is kept
    assert!(env.core().allocations().is_empty());
    let claim = env.core().claims().claims().next().unwrap();
    assert_eq!(claim.status(), ClaimStatus::Claimed);
    assert!(!claim.is_allocated());
}

#[test]
fn normal_exit_deactivates_claims() {
    let mut env = env_with_allocation(&["a", "b"], &[2]);
    let mut comm = spawn(&mut env);
    comm.take_spawns(1);
    comm.take_status_changes(1);

    on_executor_exit(
        env.core(),
        &mut comm,
        ClusterId::new(1),
        ExitReason::Completed,
        Instant::now(),
    );

    assert!(env.core().allocations().is_empty());
    assert!(env.core().find_cluster(ClusterId::new(1)).is_none());
    for name in ["a", "b"] {
        let claim = env.core().claims().find_by_name(name).unwrap();
        assert_eq!(claim.status(), ClaimStatus::Claimed);
        assert!(!claim.is_allocated());
        let msgs = comm.take_owner_msgs(&owner_addr(name), 1);
        assert!(matches!(&msgs[0], ToOwnerMessage::Deactivate(_)));
    }
    let statuses = comm.take_status_changes(1);
    assert_eq!(statuses[0].1, JobStatus::Completed);
    comm.check_need_scheduling();
}

#[test]
fn killed_job_releases_claims() {
    let mut env = env_with_allocation(&["a", "b"], &[2]);
    let mut comm = spawn(&mut env);
    comm.take_spawns(1);
    comm.take_status_changes(1);

    on_executor_exit(
        env.core(),
        &mut comm,
        ClusterId::new(1),
        ExitReason::Killed,
        Instant::now(),
    );

    assert!(env.core().claims().is_empty());
    assert!(env.core().find_cluster(ClusterId::new(1)).is_none());
    for name in ["a", "b"] {
        let msgs = comm.take_owner_msgs(&owner_addr(name), 1);
        assert!(matches!(&msgs[0], ToOwnerMessage::Release(_)));
    }
    let statuses = comm.take_status_changes(1);
    assert_eq!(statuses[0].1, JobStatus::Removed);
}

#[test]
fn crashed_executor_requeues_the_job() {
    let mut env = env_with_allocation(&["a"], &[1]);
    let mut comm = spawn(&mut env);
    comm.take_spawns(1);
    comm.take_status_changes(1);

    on_executor_exit(
        env.core(),
        &mut comm,
        ClusterId::new(1),
        ExitReason::Exception,
        Instant::now(),
    );

    // Abnormal end: claims are released, the job goes back to idle
    assert!(env.core().claims().is_empty());
    assert!(env.core().find_cluster(ClusterId::new(1)).is_some());
    assert_eq!(env.core().sorted_idle_clusters(), vec![ClusterId::new(1)]);
    let statuses = comm.take_status_changes(1);
    assert_eq!(statuses[0].1, JobStatus::Idle);
}

#[test]
fn removed_cluster_drops_unspawned_allocation() {
    use crate::internal::server::reactor::on_cluster_removed;

    let mut env = env_with_allocation(&["a"], &[1]);
    let mut comm = create_test_comm();

    on_cluster_removed(env.core(), &mut comm, ClusterId::new(1));

    assert!(env.core().allocations().is_empty());
    assert!(env.core().claims().is_empty());
    assert!(env.core().find_cluster(ClusterId::new(1)).is_none());
    let msgs = comm.take_owner_msgs(&owner_addr("a"), 1);
    assert!(matches!(&msgs[0], ToOwnerMessage::Release(_)));
}

#[test]
fn exit_for_unknown_allocation_is_ignored() {
    let mut env = TestEnv::new();
    let mut comm = create_test_comm();
    on_executor_exit(
        env.core(),
        &mut comm,
        ClusterId::new(42),
        ExitReason::Completed,
        Instant::now(),
    );
    comm.check_need_scheduling();
    comm.emptiness_check();
}
