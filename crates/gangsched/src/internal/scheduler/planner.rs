use crate::internal::common::ids::ClusterId;
use crate::internal::record::Expr;
use crate::internal::scheduler::matcher::{CandidateList, possible_assignment, satisfy_nodes};
use crate::internal::scheduler::preemption::select_victims;
use crate::internal::server::allocation::AllocationNode;
use crate::internal::server::cluster::JobProc;
use crate::internal::server::core::Core;
use crate::internal::server::negotiation::NegotiationRequest;
use crate::internal::server::pool::{ResList, ResourcePool};
use std::rc::Rc;

enum PlanResult {
    /// A full allocation was created.
    Allocated,
    /// Partially matched; held candidates await pending leases, negotiation
    /// or preemption.
    Deferred,
    /// Cannot be satisfied even with every resource we know; move on.
    Impossible,
    /// Could be satisfied eventually; strict FIFO stops the pass here.
    HaltPass,
}

/// One planning pass: for each idle cluster in priority order, try the
/// tiers (free leased, + pending, + never leased, preemption) and either
/// allocate, hold candidates, or decide the job is hopeless for now.
pub(crate) fn compute_schedule(core: &mut Core, pool: &mut ResourcePool) {
    // Fresh schedule from scratch: drop reservations that are not bound to
    // an allocation, stale resource requests and stale preemption picks.
    for claim in core.claims_mut().claims_mut() {
        if !claim.is_allocated() {
            claim.set_scheduled(false);
        }
    }
    core.clear_requests();
    core.set_pending_preemptions(Vec::new());

    for cluster_id in core.sorted_idle_clusters() {
        let Some(cluster) = core.find_cluster(cluster_id) else {
            // Queued earlier, removed since
            core.dequeue_cluster(cluster_id);
            continue;
        };
        if core.allocations().contains(cluster_id) {
            continue;
        }
        if core.is_waiting_for_reconnect(cluster_id) {
            log::debug!("Skipping {cluster_id}: waiting for reconnect");
            continue;
        }
        let total_nodes = cluster.total_nodes() as usize;
        if total_nodes > pool.total() {
            log::info!(
                "Skipping {cluster_id}: requests more nodes ({total_nodes}) than exist in the pool ({})",
                pool.total()
            );
            continue;
        }
        log::debug!("Trying to find {total_nodes} resource(s) for {cluster_id}");

        let nodes = cluster.node_requests();
        let want_groups = cluster.want_groups;
        let prefer_groups = cluster.prefer_groups;

        match plan_cluster(core, pool, cluster_id, nodes, want_groups, prefer_groups) {
            PlanResult::Allocated | PlanResult::Deferred | PlanResult::Impossible => {}
            PlanResult::HaltPass => {
                log::debug!("Could satisfy {cluster_id} in the future, done computing schedule");
                break;
            }
        }
    }
}

fn plan_cluster(
    core: &mut Core,
    pool: &mut ResourcePool,
    cluster_id: ClusterId,
    mut nodes: Vec<Rc<JobProc>>,
    want_groups: bool,
    prefer_groups: bool,
) -> PlanResult {
    if want_groups {
        if satisfy_with_groups(core, pool, cluster_id, &nodes) {
            return PlanResult::Allocated;
        }
        if !prefer_groups {
            log::debug!("No scheduling group can hold {cluster_id} right now");
            return PlanResult::Impossible;
        }
    }

    // Tier 1: resources already leased and idle
    let mut idle_candidates = CandidateList::default();
    if satisfy_nodes(&mut nodes, &mut pool.free, &mut idle_candidates, true) {
        log::info!(
            "Satisfied {cluster_id} with {} already-leased resource(s)",
            idle_candidates.len()
        );
        create_allocation(core, cluster_id, idle_candidates);
        return PlanResult::Allocated;
    }

    // Tier 2: held tier-1 partials plus leases still in flight
    let mut limbo_candidates = CandidateList::default();
    if satisfy_nodes(&mut nodes, &mut pool.pending, &mut limbo_candidates, false) {
        log::info!(
            "Could satisfy {cluster_id} once {} pending lease(s) arrive",
            limbo_candidates.len()
        );
        idle_candidates.mark_scheduled(core.claims_mut());
        limbo_candidates.mark_scheduled(core.claims_mut());
        return PlanResult::Deferred;
    }

    // Tier 3: never-leased resources; ask the matchmaker for each
    let mut unclaimed_candidates = CandidateList::default();
    if satisfy_nodes(&mut nodes, &mut pool.unclaimed, &mut unclaimed_candidates, false) {
        log::info!(
            "Could satisfy {cluster_id} by negotiating for {} new lease(s)",
            unclaimed_candidates.len()
        );
        for candidate in unclaimed_candidates.iter() {
            core.push_request(NegotiationRequest::new(candidate.proc.id));
        }
        idle_candidates.mark_scheduled(core.claims_mut());
        limbo_candidates.mark_scheduled(core.claims_mut());
        return PlanResult::Deferred;
    }

    // Preemption tier: cover the remainder from busy resources
    let preempt_exprs: Option<(Expr, Expr)> = core
        .config()
        .preemption_requirements
        .clone()
        .zip(core.config().preemption_rank.clone());
    if let Some((requirements, rank)) = preempt_exprs {
        if let Some(victims) = select_victims(&nodes, &mut pool.busy, &requirements, &rank) {
            log::info!(
                "Preempting {} resource(s) for {cluster_id}",
                victims.len()
            );
            let tokens: Vec<_> = victims
                .iter()
                .map(|victim| {
                    core.claims()
                        .token_by_name(&victim.name)
                        .unwrap_or_else(|| {
                            panic!("Busy resource {} has no claim", victim.name)
                        })
                        .clone()
                })
                .collect();
            core.add_pending_preemptions(tokens);
            idle_candidates.mark_scheduled(core.claims_mut());
            limbo_candidates.mark_scheduled(core.claims_mut());
            // Preempted capacity has to come back as free leases first, so
            // there is no point negotiating for these this pass.
            unclaimed_candidates.return_to(&mut pool.unclaimed);
            return PlanResult::Deferred;
        }
    }

    // Nothing worked. Decide between head-of-line blocking and giving up on
    // this job for the pass.
    let full_nodes = core.get_cluster(cluster_id).node_requests();
    if core.config().fifo {
        if let Some(names) = possible_assignment(&full_nodes, pool.all()) {
            // Keep the claims a future assignment would use from being
            // released as unused in the meantime.
            for name in names {
                if let Some(token) = core.claims().token_by_name(&name).cloned() {
                    core.claims_mut().get_mut(&token).set_scheduled(true);
                }
            }
            return PlanResult::HaltPass;
        }
    }

    log::debug!("Can't satisfy {cluster_id} with all possible resources, trying next job");
    idle_candidates.return_to(&mut pool.free);
    limbo_candidates.return_to(&mut pool.pending);
    unclaimed_candidates.return_to(&mut pool.unclaimed);
    PlanResult::Impossible
}

/// Group-constrained matching: order the groups by the job's Rank of one
/// representative idle resource per group, then try to fit the whole
/// cluster inside each group in turn. Only already-leased idle resources
/// participate.
fn satisfy_with_groups(
    core: &mut Core,
    pool: &mut ResourcePool,
    cluster_id: ClusterId,
    nodes: &[Rc<JobProc>],
) -> bool {
    log::debug!("Trying to satisfy {cluster_id} with group scheduling");
    if pool.groups.is_empty() {
        log::info!("{cluster_id} requested scheduling groups, but no groups found");
        return false;
    }

    let mut examples = ResList::default();
    for group in &pool.groups {
        if let Some(resource) = pool
            .free
            .iter()
            .find(|r| r.group.as_deref() == Some(group.as_str()))
        {
            examples.push(resource.clone());
        }
    }
    if let Some(first) = nodes.first() {
        examples.sort_by_rank(first);
    }

    for example in examples.iter() {
        let group = example.group.as_deref().unwrap();
        let mut group_pool = pool.free.select_group(group);
        if group_pool.len() < nodes.len() {
            continue;
        }
        let mut group_nodes = nodes.to_vec();
        let mut candidates = CandidateList::default();
        if satisfy_nodes(&mut group_nodes, &mut group_pool, &mut candidates, false) {
            log::info!("Fitting {cluster_id} inside scheduling group {group}");
            for candidate in candidates.iter() {
                pool.free.remove_by_name(&candidate.resource.name);
            }
            create_allocation(core, cluster_id, candidates);
            return true;
        }
    }
    false
}

/// Turns a complete candidate set into an AllocationNode in New status and
/// binds every claim to its proc. Executor spawn happens separately.
pub(crate) fn create_allocation(core: &mut Core, cluster_id: ClusterId, candidates: CandidateList) {
    let n_procs = core.get_cluster(cluster_id).procs.len();
    let mut allocation = AllocationNode::new(cluster_id, n_procs);
    let (claims, _) = core.split_claims_allocations_mut();
    for candidate in candidates.iter() {
        let token = claims
            .token_by_name(&candidate.resource.name)
            .unwrap_or_else(|| {
                panic!(
                    "No claim for {}, yet allocated to {cluster_id}",
                    candidate.resource.name
                )
            })
            .clone();
        let claim = claims.get_mut(&token);
        claim.set_scheduled(true);
        claim.set_allocated(true);
        claim.assigned = Some(candidate.proc.id);
        allocation.push_claim(candidate.proc.id.proc_id(), token);
    }
    log::info!(
        "Created allocation for {cluster_id}: {} node(s) across {} proc(s)",
        allocation.total_claims(),
        n_procs
    );
    core.allocations_mut().insert(allocation);
    core.dequeue_cluster(cluster_id);
}
