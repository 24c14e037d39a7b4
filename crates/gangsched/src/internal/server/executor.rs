use crate::internal::common::ids::{ClusterId, ProcRef};
use crate::internal::server::allocation::AllocationStatus;
use crate::internal::server::claim::ClaimStatus;
use crate::internal::server::comm::{Comm, ExecutorSpawn, JobAttrUpdate, JobStatus, SpawnProc};
use crate::internal::server::core::Core;
use crate::internal::server::reactor::{deactivate_claim, release_claim};
use std::time::Instant;
use thin_vec::ThinVec;

/// Why the external job executor went away.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitReason {
    /// Normal completion.
    Completed,
    /// The job was killed (removed by a user or operator).
    Killed,
    /// The executor crashed or hit an internal error.
    Exception,
    /// The executor asked for the job to be held.
    HoldRequested,
    /// The machine ran out of resources; the job goes back to idle.
    ResourceExhausted,
    /// The job wants to run again from scratch.
    Requeue,
}

/// Hands every freshly assembled allocation to the external job executor:
/// publishes the bound node set on the job records, marks the allocation
/// running and its claims active. A missing executor puts the job on hold
/// with a descriptive reason instead of failing it.
pub(crate) fn spawn_allocations(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    let new_ids: Vec<ClusterId> = core
        .allocations()
        .allocations()
        .filter(|a| a.status == AllocationStatus::New)
        .map(|a| a.cluster_id)
        .collect();
    for cluster_id in new_ids {
        spawn_one(core, comm, cluster_id, now);
    }
}

fn spawn_one(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId, now: Instant) {
    let allocation = core.allocations().get(cluster_id);
    let is_reconnect = allocation.is_recovered;
    let total_nodes = allocation.total_claims() as u32;
    let attachment = allocation
        .proc_claims(0.into())
        .first()
        .cloned()
        .unwrap_or_else(|| panic!("Allocation {cluster_id} has no claims"));

    log::debug!(
        "Spawning executor for {cluster_id} ({total_nodes} node(s), attachment {attachment})"
    );

    let cluster = core.get_cluster(cluster_id);
    let scheduler = core.config().scheduler_name.clone();
    let mut procs = Vec::with_capacity(allocation.n_procs());
    let mut updates = Vec::with_capacity(allocation.n_procs());
    for (proc_id, tokens) in allocation.procs() {
        let proc = cluster
            .find_proc(proc_id)
            .unwrap_or_else(|| panic!("Allocation {cluster_id} references unknown proc {proc_id}"));
        let claims: ThinVec<_> = tokens.iter().cloned().collect();
        let hosts: ThinVec<String> = tokens
            .iter()
            .map(|token| core.claims().get(token).name().to_string())
            .collect();
        // Publishing the node count makes the job look busy right away, so
        // nothing tries to schedule or negotiate for it twice. The claim
        // list is what recovery replays after a restart.
        let update = if is_reconnect {
            JobAttrUpdate {
                node_count: Some(total_nodes),
                ..Default::default()
            }
        } else {
            JobAttrUpdate {
                node_count: Some(total_nodes),
                claim_tokens: Some(claims.clone()),
                remote_hosts: Some(hosts),
                scheduler: Some(scheduler.clone()),
            }
        };
        updates.push((ProcRef::new(cluster_id, proc_id), update));
        procs.push(SpawnProc {
            job: proc.record.clone(),
            claims,
        });
    }
    for (proc, update) in updates {
        comm.update_job(proc, update);
    }

    let spawn = ExecutorSpawn {
        cluster_id,
        attachment: attachment.clone(),
        procs,
        is_reconnect,
    };
    match comm.spawn_executor(spawn) {
        Ok(()) => {
            comm.set_job_status(cluster_id, JobStatus::Running, None);
            let tokens: Vec<_> = {
                let allocation = core.allocations_mut().find_mut(cluster_id).unwrap();
                allocation.status = AllocationStatus::Running;
                allocation.attachment = Some(attachment);
                allocation.all_claims().cloned().collect()
            };
            for token in tokens {
                core.claims_mut()
                    .get_mut(&token)
                    .set_status(ClaimStatus::Active, now);
            }
        }
        Err(e) => {
            log::warn!("Cannot spawn executor for {cluster_id}: {e}");
            comm.set_job_status(
                cluster_id,
                JobStatus::Held,
                Some(&format!("Cannot spawn job executor: {e}")),
            );
            // The leases stay with us; only the binding is undone.
            let allocation = core.allocations_mut().remove(cluster_id).unwrap();
            for token in allocation.all_claims() {
                let claim = core.claims_mut().get_mut(token);
                claim.set_allocated(false);
                claim.set_scheduled(false);
                claim.assigned = None;
            }
            core.dequeue_cluster(cluster_id);
        }
    }
}

/// Reaper: the executor for a cluster exited. Classifies the exit, updates
/// the job status, winds down every claim of the allocation (release on
/// abnormal ends, deactivate otherwise) and destroys the allocation.
pub fn on_executor_exit(
    core: &mut Core,
    comm: &mut impl Comm,
    cluster_id: ClusterId,
    reason: ExitReason,
    now: Instant,
) {
    // Whatever happened, this frees capacity; plan again soon.
    comm.ask_for_scheduling();

    if core.allocations().find(cluster_id).is_none() {
        log::info!("Executor exit for unknown allocation {cluster_id}, ignoring");
        return;
    }
    log::info!("Executor for {cluster_id} exited: {reason:?}");

    let (status, kill) = match reason {
        ExitReason::Completed => (JobStatus::Completed, false),
        ExitReason::Killed => (JobStatus::Removed, true),
        ExitReason::Exception => (JobStatus::Idle, true),
        ExitReason::HoldRequested => (JobStatus::Held, false),
        ExitReason::ResourceExhausted => (JobStatus::Idle, false),
        ExitReason::Requeue => (JobStatus::Idle, true),
    };

    shutdown_allocation_at(core, comm, cluster_id, kill, now);
    let allocation = core.allocations_mut().remove(cluster_id).unwrap();
    debug_assert_eq!(allocation.status, AllocationStatus::Dying);

    match status {
        JobStatus::Completed | JobStatus::Removed => {
            core.remove_cluster(cluster_id);
        }
        JobStatus::Held => {
            // Comes back through on_new_cluster when released
            core.remove_cluster(cluster_id);
        }
        _ => {
            core.requeue_cluster(cluster_id);
        }
    }
    let reason_text = match reason {
        ExitReason::HoldRequested => Some("Hold requested by the job executor"),
        ExitReason::Exception => Some("Job executor exited abnormally"),
        _ => None,
    };
    comm.set_job_status(cluster_id, status, reason_text);
}

/// Marks the allocation dying and winds down its claims: release when the
/// job ended abnormally or was killed, plain deactivation otherwise.
pub(crate) fn shutdown_allocation(
    core: &mut Core,
    comm: &mut impl Comm,
    cluster_id: ClusterId,
    kill: bool,
) {
    shutdown_allocation_at(core, comm, cluster_id, kill, Instant::now());
}

fn shutdown_allocation_at(
    core: &mut Core,
    comm: &mut impl Comm,
    cluster_id: ClusterId,
    kill: bool,
    now: Instant,
) {
    let tokens: Vec<_> = {
        let allocation = core.allocations_mut().find_mut(cluster_id).unwrap_or_else(|| {
            panic!("Shutting down unknown allocation {cluster_id}");
        });
        allocation.status = AllocationStatus::Dying;
        allocation.all_claims().cloned().collect()
    };
    for token in tokens {
        if kill {
            log::debug!("Allocation {cluster_id} ended abnormally, releasing {token}");
            release_claim(core, comm, &token);
        } else {
            let Some(claim) = core.claims_mut().find_mut(&token) else {
                continue;
            };
            claim.set_status(ClaimStatus::Claimed, now);
            claim.set_allocated(false);
            claim.set_scheduled(false);
            claim.assigned = None;
            deactivate_claim(core, comm, &token);
        }
    }
}
