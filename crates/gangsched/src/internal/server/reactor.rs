use crate::internal::common::ids::{ClaimToken, ClusterId};
use crate::internal::messages::owner::{ClaimTokenMsg, FromOwnerMessage, ToOwnerMessage};
use crate::internal::server::allocation::AllocationStatus;
use crate::internal::server::claim::ClaimStatus;
use crate::internal::server::cluster::JobCluster;
use crate::internal::server::coalesce;
use crate::internal::server::comm::{Comm, JobAttrUpdate};
use crate::internal::server::core::Core;
use crate::internal::server::executor::shutdown_allocation;
use crate::internal::server::resource::ResourceRecord;
use std::time::Instant;

/// A parallel job became known (submitted or released from hold). The
/// scheduler stamps its identity on every proc so the matchmaker can route
/// matches back to us.
pub fn on_new_cluster(core: &mut Core, comm: &mut impl Comm, cluster: JobCluster) {
    log::debug!(
        "New cluster {}: {} proc(s), {} node(s)",
        cluster.id,
        cluster.procs.len(),
        cluster.total_nodes()
    );
    for proc in &cluster.procs {
        comm.update_job(
            proc.id,
            JobAttrUpdate {
                scheduler: Some(core.config().scheduler_name.clone()),
                ..Default::default()
            },
        );
    }
    core.add_cluster(cluster);
    comm.ask_for_scheduling();
}

/// The job was removed from the queue. Cancels pending negotiation
/// requests, kills a bound allocation and forgets the cluster.
pub fn on_cluster_removed(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId) {
    log::debug!("Cluster {cluster_id} removed");
    core.cancel_requests_for(cluster_id);
    coalesce::cancel_for(core, comm, cluster_id);
    if let Some(allocation) = core.allocations().find(cluster_id) {
        // Claims are released now. A spawned allocation stays in Dying
        // status until the executor exit arrives; an unspawned one can be
        // dropped right away.
        let spawned = allocation.status != AllocationStatus::New;
        shutdown_allocation(core, comm, cluster_id, true);
        if !spawned {
            core.allocations_mut().remove(cluster_id);
        }
    }
    core.remove_cluster(cluster_id);
    comm.ask_for_scheduling();
}

/// An external hold: same engine-side teardown as removal, the job record
/// itself stays in the store and re-enters via `on_new_cluster` later.
pub fn on_cluster_held(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId) {
    log::debug!("Cluster {cluster_id} held");
    on_cluster_removed(core, comm, cluster_id);
}

/// Fresh matchmaker snapshot of every resource we could use.
pub fn on_resource_snapshot(
    core: &mut Core,
    comm: &mut impl Comm,
    resources: Vec<ResourceRecord>,
) {
    log::debug!("Resource snapshot with {} record(s)", resources.len());
    core.set_resource_snapshot(resources);
    comm.ask_for_scheduling();
}

pub fn on_owner_message(
    core: &mut Core,
    comm: &mut impl Comm,
    message: FromOwnerMessage,
    now: Instant,
) {
    match message {
        FromOwnerMessage::ClaimConfirmed(msg) => on_claim_confirmed(core, comm, &msg.token, now),
        FromOwnerMessage::ClaimRefused(msg) => on_claim_refused(core, comm, &msg.token),
        FromOwnerMessage::Vacated(msg) => on_claim_vacated(core, comm, &msg.token, now),
        FromOwnerMessage::CoalesceReply(msg) => coalesce::on_coalesce_reply(core, comm, msg, now),
    }
}

/// The asynchronous claim protocol against the resource owner finished.
pub fn on_claim_confirmed(
    core: &mut Core,
    comm: &mut impl Comm,
    token: &ClaimToken,
    now: Instant,
) {
    let Some(claim) = core.claims_mut().find_mut(token) else {
        log::debug!("Confirmation for unknown claim {token}");
        return;
    };
    if claim.status() != ClaimStatus::ContactPending {
        log::debug!(
            "Unexpected claim confirmation for {token} in {:?}",
            claim.status()
        );
        return;
    }
    claim.set_status(ClaimStatus::Claimed, now);
    comm.ask_for_scheduling();
}

/// The claim protocol failed; the token is void and the claim is dropped
/// entirely. Whatever plan waited for it will be recomputed.
pub fn on_claim_refused(core: &mut Core, comm: &mut impl Comm, token: &ClaimToken) {
    match core.claims_mut().remove(token) {
        Some(claim) => {
            log::info!("Claim {token} on {} refused by owner", claim.name());
            comm.ask_for_scheduling();
        }
        None => log::debug!("Refusal for unknown claim {token}"),
    }
}

/// Deactivation finished: the resource stopped running its node. Either a
/// coalesce op was waiting for it, or it simply becomes available again.
pub fn on_claim_vacated(
    core: &mut Core,
    comm: &mut impl Comm,
    token: &ClaimToken,
    now: Instant,
) {
    if coalesce::on_claim_vacated(core, comm, token, now) {
        return;
    }
    let Some(claim) = core.claims_mut().find_mut(token) else {
        log::debug!("Vacate notification for unknown claim {token}");
        return;
    };
    if claim.status() == ClaimStatus::Active {
        claim.set_status(ClaimStatus::Claimed, now);
        comm.ask_for_scheduling();
    }
}

/// Sends the release message (best effort, reply ignored) and removes the
/// claim from every table. Safe to call twice for the same token.
pub(crate) fn release_claim(core: &mut Core, comm: &mut impl Comm, token: &ClaimToken) {
    let Some(claim) = core.claims_mut().remove(token) else {
        log::debug!("Releasing unknown claim {token} (already gone)");
        return;
    };
    log::debug!("Releasing claim {token} on {}", claim.name());
    let release = ToOwnerMessage::Release(ClaimTokenMsg {
        token: token.clone(),
    });
    if let Err(e) = comm.send_owner_message(&claim.owner_addr, &release) {
        log::debug!("Release of {token} not delivered: {e}");
    }
    if let Some(proc) = claim.assigned {
        if let Some(allocation) = core.allocations_mut().find_mut(proc.cluster_id()) {
            allocation.unlink_claim(token);
        }
    }
}

/// Asks the owner to stop the node running on this claim. The claim stays
/// Active until the vacate notification arrives.
pub(crate) fn deactivate_claim(core: &mut Core, comm: &mut impl Comm, token: &ClaimToken) {
    let Some(claim) = core.claims().find(token) else {
        log::debug!("Deactivating unknown claim {token}");
        return;
    };
    let addr = claim.owner_addr.clone();
    let message = ToOwnerMessage::Deactivate(ClaimTokenMsg {
        token: token.clone(),
    });
    if let Err(e) = comm.send_owner_message(&addr, &message) {
        log::info!("Deactivate of {token} not delivered: {e}");
    }
}

/// Executes the preemption decisions of the last planning pass.
pub(crate) fn preempt_resources(core: &mut Core, comm: &mut impl Comm) {
    for token in core.take_pending_preemptions() {
        let Some(claim) = core.claims().find(&token) else {
            continue;
        };
        if claim.status() == ClaimStatus::Active {
            log::info!("Preempting node on {}", claim.name());
            deactivate_claim(core, comm, &token);
        }
    }
}

/// Releases every leased-but-idle claim whose unused time crossed the
/// configured ceiling. The event loop re-runs this at the earliest next
/// expiry (`Core::next_wakeup`), never more often than necessary.
pub(crate) fn check_idle_claims(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    let Some(ceiling) = core.config().unused_claim_timeout else {
        return;
    };
    let expired: Vec<(ClaimToken, String)> = core
        .claims()
        .claims()
        .filter(|claim| claim.unused_time(now).is_some_and(|unused| unused >= ceiling))
        .map(|claim| (claim.token.clone(), claim.name().to_string()))
        .collect();
    for (token, name) in expired {
        log::info!(
            "Resource {name} has been unused for over {}s, releasing",
            ceiling.as_secs()
        );
        release_claim(core, comm, &token);
    }
}

/// Periodic keepalive towards the owner of every lease we hold, so owners
/// do not expire claims under us.
pub(crate) fn send_alives(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    let Some(interval) = core.config().keepalive_interval else {
        return;
    };
    if let Some(last) = core.last_keepalive() {
        if now.saturating_duration_since(last) < interval {
            return;
        }
    }
    let targets: Vec<(ClaimToken, String)> = core
        .claims()
        .claims()
        .filter(|claim| {
            matches!(claim.status(), ClaimStatus::Claimed | ClaimStatus::Active)
        })
        .map(|claim| (claim.token.clone(), claim.owner_addr.clone()))
        .collect();
    log::debug!("Sending keepalives for {} claim(s)", targets.len());
    for (token, addr) in targets {
        let message = ToOwnerMessage::KeepAlive(ClaimTokenMsg { token });
        if let Err(e) = comm.send_owner_message(&addr, &message) {
            log::debug!("Keepalive to {addr} not delivered: {e}");
        }
    }
    core.set_last_keepalive(now);
}
