use crate::internal::common::Map;
use crate::internal::common::ids::{ClaimToken, ClusterId, ProcId, ProcRef};
use crate::internal::server::allocation::AllocationNode;
use crate::internal::server::claim::{Claim, ClaimStatus};
use crate::internal::server::core::Core;
use crate::internal::server::resource::ResourceRecord;
use std::rc::Rc;
use std::time::Instant;

/// Persisted reconnect information of one previously running cluster:
/// per proc, the ordered (claim token, resource name) pairs of its nodes.
#[derive(Debug)]
pub struct ReconnectJob {
    pub cluster_id: ClusterId,
    pub procs: Vec<Vec<(ClaimToken, String)>>,
    pub attempts: u32,
}

impl ReconnectJob {
    pub fn new(cluster_id: ClusterId, procs: Vec<Vec<(ClaimToken, String)>>) -> Self {
        ReconnectJob {
            cluster_id,
            procs,
            attempts: 0,
        }
    }
}

/// Queues previously running clusters for reconnection. Their clusters must
/// already be known to the Core; while queued they are invisible to the
/// planner.
pub fn enqueue_reconnect_jobs(core: &mut Core, jobs: Vec<ReconnectJob>) {
    for job in jobs {
        log::info!(
            "Queued cluster {} for reconnect ({} proc(s))",
            job.cluster_id,
            job.procs.len()
        );
        core.push_reconnect(job);
    }
}

/// Tries to rebuild allocation state for every queued cluster from the
/// current resource snapshot. Clusters whose resources cannot all be found
/// are retried on the next pass; after too many failed rounds they are left
/// idle for normal planning instead of being failed.
pub(crate) fn check_reconnect_queue(core: &mut Core, now: Instant) {
    if core.reconnect_queue().is_empty() {
        return;
    }
    log::debug!(
        "Checking reconnect queue ({} entries)",
        core.reconnect_queue().len()
    );

    let mut by_name: Map<String, Rc<ResourceRecord>> = Map::default();
    for resource in core.resource_snapshot() {
        by_name.insert(resource.name.clone(), resource.clone());
    }

    let queue = core.take_reconnect_queue();
    let mut still_waiting = Vec::new();
    for mut job in queue {
        let cluster_id = job.cluster_id;
        let Some(cluster) = core.find_cluster(cluster_id) else {
            log::info!("Reconnect job {cluster_id} no longer in the queue, dropping");
            continue;
        };
        if cluster.procs.len() != job.procs.len()
            || cluster
                .procs
                .iter()
                .zip(&job.procs)
                .any(|(proc, pairs)| proc.node_count as usize != pairs.len())
        {
            log::error!(
                "Persisted claim list of {cluster_id} does not match its procs, leaving it idle"
            );
            continue;
        }

        match resolve_all(core, &job, &by_name) {
            Some(resolved) => {
                rebuild_allocation(core, cluster_id, resolved, now);
            }
            None => {
                job.attempts += 1;
                if job.attempts >= core.config().reconnect_retry_limit {
                    log::info!(
                        "Giving up on reconnecting {cluster_id} after {} attempts, leaving it idle",
                        job.attempts
                    );
                } else {
                    still_waiting.push(job);
                }
            }
        }
    }
    for job in still_waiting {
        core.push_reconnect(job);
    }
}

type ResolvedProcs = Vec<Vec<(ClaimToken, Rc<ResourceRecord>)>>;

fn resolve_all(
    core: &Core,
    job: &ReconnectJob,
    by_name: &Map<String, Rc<ResourceRecord>>,
) -> Option<ResolvedProcs> {
    let mut resolved = Vec::with_capacity(job.procs.len());
    for pairs in &job.procs {
        let mut proc_nodes = Vec::with_capacity(pairs.len());
        for (token, name) in pairs {
            let Some(resource) = by_name.get(name) else {
                log::debug!(
                    "Cannot reconnect {}: resource {name} not in snapshot",
                    job.cluster_id
                );
                return None;
            };
            // A token or resource already claimed means the tables and the
            // persisted state disagree; defer and retry later.
            if core.claims().contains(token) || core.claims().find_by_name(name).is_some() {
                log::info!(
                    "Cannot reconnect {}: {name} already has a live claim",
                    job.cluster_id
                );
                return None;
            }
            proc_nodes.push((token.clone(), resource.clone()));
        }
        resolved.push(proc_nodes);
    }
    Some(resolved)
}

/// Reconstructs claims in Claimed status and the allocation node without
/// involving the planner. The ordinary spawn step then re-attaches the
/// executor (`is_reconnect` spawn) and drives the claims to Active.
fn rebuild_allocation(core: &mut Core, cluster_id: ClusterId, resolved: ResolvedProcs, now: Instant) {
    let mut allocation = AllocationNode::new(cluster_id, resolved.len());
    allocation.is_recovered = true;
    for (proc_idx, pairs) in resolved.into_iter().enumerate() {
        let proc_id = ProcId::new(proc_idx as u32);
        for (token, resource) in pairs {
            let mut claim = Claim::new(token.clone(), (*resource).clone(), ClaimStatus::Claimed, now);
            claim.assigned = Some(ProcRef::new(cluster_id, proc_id));
            claim.set_allocated(true);
            claim.set_scheduled(true);
            core.claims_mut().insert(claim);
            allocation.push_claim(proc_id, token);
        }
    }
    log::info!(
        "Rebuilt allocation for {cluster_id} from persisted claims ({} node(s))",
        allocation.total_claims()
    );
    core.allocations_mut().insert(allocation);
    core.dequeue_cluster(cluster_id);
}
