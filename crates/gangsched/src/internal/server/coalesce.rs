use crate::internal::common::Set;
use crate::internal::common::ids::{ClaimToken, ClusterId};
use crate::internal::messages::owner::{CoalesceMsg, CoalesceReplyMsg, CoalesceResult, ToOwnerMessage};
use crate::internal::server::allocation::AllocationStatus;
use crate::internal::server::claim::{Claim, ClaimStatus};
use crate::internal::server::comm::Comm;
use crate::internal::server::core::Core;
use crate::internal::server::reactor::{deactivate_claim, release_claim};
use crate::internal::server::resource::ResourceRecord;
use std::time::Instant;

/// A time-bounded side protocol: vacate a set of already-held claims, then
/// ask their common owner to merge them into one lease for an urgent
/// single-node ("now") job.
pub struct CoalesceOp {
    pub cluster_id: ClusterId,
    pub job: crate::internal::record::Record,
    pub wanted: Set<ClaimToken>,
    pub obtained: Vec<ClaimToken>,
    pub owner_addr: String,
    pub deadline: Instant,
    pub retries_left: u32,
    pub sent: bool,
}

/// Starts a coalesce operation. Each target claim is unlinked from its job
/// as it is vacated; once all are obtained one coalesce request goes out.
pub fn start_coalesce(
    core: &mut Core,
    comm: &mut impl Comm,
    cluster_id: ClusterId,
    job: crate::internal::record::Record,
    targets: Vec<ClaimToken>,
    deadline: Instant,
    now: Instant,
) -> crate::Result<()> {
    if targets.is_empty() {
        return Err("Coalesce with no target claims".into());
    }
    if core.coalesce_ops().contains_key(&cluster_id) {
        return Err(format!("Coalesce for {cluster_id} already in progress").into());
    }

    let mut owner_addr: Option<String> = None;
    for token in &targets {
        let claim = core
            .claims()
            .find(token)
            .ok_or_else(|| format!("Coalesce target {token} is not a known claim"))?;
        match &owner_addr {
            None => owner_addr = Some(claim.owner_addr.clone()),
            Some(addr) if *addr == claim.owner_addr => {}
            Some(addr) => {
                return Err(format!(
                    "Coalesce targets span owners {addr} and {}",
                    claim.owner_addr
                )
                .into());
            }
        }
    }
    let owner_addr = owner_addr.unwrap();

    let mut op = CoalesceOp {
        cluster_id,
        job,
        wanted: targets.iter().cloned().collect(),
        obtained: Vec::new(),
        owner_addr,
        deadline,
        retries_left: core.config().coalesce_retry_limit,
        sent: false,
    };

    for token in &targets {
        match core.claims().get(token).status() {
            ClaimStatus::Claimed => {
                unlink_from_donor(core, token, now);
                op.obtained.push(token.clone());
            }
            ClaimStatus::Active => {
                // The donor job loses this node; its allocation is dying
                if let Some(proc) = core.claims().get(token).assigned {
                    if let Some(allocation) =
                        core.allocations_mut().find_mut(proc.cluster_id())
                    {
                        allocation.status = AllocationStatus::Dying;
                    }
                }
                deactivate_claim(core, comm, token);
            }
            status => {
                return Err(format!("Coalesce target {token} is in {status:?}").into());
            }
        }
    }

    let all_obtained = op.obtained.len() == op.wanted.len();
    core.coalesce_ops_mut().insert(cluster_id, op);
    if all_obtained {
        issue_coalesce(core, comm, cluster_id);
    }
    Ok(())
}

/// Called for every vacate notification; returns true when a coalesce op
/// was waiting for this claim.
pub(crate) fn on_claim_vacated(
    core: &mut Core,
    comm: &mut impl Comm,
    token: &ClaimToken,
    now: Instant,
) -> bool {
    let waiting = core
        .coalesce_ops()
        .iter()
        .find(|(_, op)| op.wanted.contains(token) && !op.obtained.contains(token))
        .map(|(id, _)| *id);
    let Some(cluster_id) = waiting else {
        return false;
    };

    unlink_from_donor(core, token, now);
    let op = core.coalesce_ops_mut().get_mut(&cluster_id).unwrap();
    op.obtained.push(token.clone());
    log::debug!(
        "Coalesce for {cluster_id}: obtained {}/{} claim(s)",
        op.obtained.len(),
        op.wanted.len()
    );
    if op.obtained.len() == op.wanted.len() && !op.sent {
        issue_coalesce(core, comm, cluster_id);
    }
    true
}

pub(crate) fn on_coalesce_reply(
    core: &mut Core,
    comm: &mut impl Comm,
    reply: CoalesceReplyMsg,
    now: Instant,
) {
    let cluster_id = reply.now_job;
    if !core.coalesce_ops().contains_key(&cluster_id) {
        log::debug!("Coalesce reply for unknown operation {cluster_id}");
        return;
    }
    match reply.result {
        CoalesceResult::Ok => {
            let resource = reply
                .merged_token
                .zip(reply.resource)
                .and_then(|(token, record)| {
                    ResourceRecord::from_record(record).ok().map(|r| (token, r))
                });
            let Some((merged_token, resource)) = resource else {
                log::error!("Malformed coalesce reply for {cluster_id}");
                fail_op(core, comm, cluster_id);
                return;
            };
            let op = core.coalesce_ops_mut().remove(&cluster_id).unwrap();
            // The old tokens are dead; the owner folded them into the
            // merged lease, so no release is sent for them.
            for token in &op.obtained {
                core.claims_mut().remove(token);
            }
            let mut claim = Claim::new(merged_token.clone(), resource, ClaimStatus::Claimed, now);
            claim.set_scheduled(true);
            log::info!(
                "Coalesce for {cluster_id} merged {} claim(s) into {merged_token}",
                op.obtained.len()
            );
            core.claims_mut().insert(claim);
            comm.coalesce_finished(cluster_id, Some(&merged_token));
        }
        CoalesceResult::WrongState => {
            let op = core.coalesce_ops_mut().get_mut(&cluster_id).unwrap();
            if op.retries_left > 0 {
                op.retries_left -= 1;
                op.sent = false;
                log::debug!(
                    "Owner busy, retrying coalesce for {cluster_id} ({} retries left)",
                    op.retries_left
                );
                issue_coalesce(core, comm, cluster_id);
            } else {
                log::info!("Coalesce for {cluster_id} ran out of retries");
                fail_op(core, comm, cluster_id);
            }
        }
        CoalesceResult::Failed => {
            log::info!("Owner failed coalesce for {cluster_id}");
            fail_op(core, comm, cluster_id);
        }
    }
}

/// Expires operations whose deadline passed without completing.
pub(crate) fn check_deadlines(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    let expired: Vec<ClusterId> = core
        .coalesce_ops()
        .iter()
        .filter(|(_, op)| now >= op.deadline)
        .map(|(id, _)| *id)
        .collect();
    for cluster_id in expired {
        log::info!("Coalesce for {cluster_id} timed out");
        fail_op(core, comm, cluster_id);
    }
}

/// The now-job vanished; abandon its operation.
pub(crate) fn cancel_for(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId) {
    if core.coalesce_ops().contains_key(&cluster_id) {
        log::info!("Cancelling coalesce for removed job {cluster_id}");
        fail_op(core, comm, cluster_id);
    }
}

fn unlink_from_donor(core: &mut Core, token: &ClaimToken, now: Instant) {
    let Some(claim) = core.claims_mut().find_mut(token) else {
        return;
    };
    claim.set_status(ClaimStatus::Claimed, now);
    claim.set_allocated(false);
    claim.set_scheduled(false);
    let assigned = claim.assigned.take();
    if let Some(proc) = assigned {
        if let Some(allocation) = core.allocations_mut().find_mut(proc.cluster_id()) {
            allocation.unlink_claim(token);
        }
    }
}

fn issue_coalesce(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId) {
    let (addr, message) = {
        let op = core.coalesce_ops_mut().get_mut(&cluster_id).unwrap();
        op.sent = true;
        (
            op.owner_addr.clone(),
            ToOwnerMessage::Coalesce(CoalesceMsg {
                now_job: cluster_id,
                tokens: op.obtained.iter().cloned().collect(),
                job: op.job.clone(),
            }),
        )
    };
    log::debug!("Issuing coalesce request for {cluster_id} to {addr}");
    if let Err(e) = comm.send_owner_message(&addr, &message) {
        log::warn!("Cannot send coalesce request for {cluster_id}: {e}");
        fail_op(core, comm, cluster_id);
    }
}

/// Releases every obtained claim and reports failure.
fn fail_op(core: &mut Core, comm: &mut impl Comm, cluster_id: ClusterId) {
    let Some(op) = core.coalesce_ops_mut().remove(&cluster_id) else {
        return;
    };
    for token in &op.obtained {
        release_claim(core, comm, token);
    }
    comm.coalesce_finished(cluster_id, None);
}
