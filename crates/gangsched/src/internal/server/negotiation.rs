use crate::internal::common::ids::ProcRef;
use crate::internal::messages::matchmaker::{
    MatchmakerCommand, PermissionGrantedMsg, RejectedMsg, ToMatchmakerMessage,
};
use crate::internal::messages::owner::{ClaimMsg, ToOwnerMessage};
use crate::internal::record::expr::{lit, target_attr};
use crate::internal::record::{
    ATTR_CURRENT_NODES, ATTR_DEDICATED_SCHEDULER, ATTR_NODE_COUNT, ATTR_REMOTE_OWNER,
    ATTR_REQUIREMENTS, ATTR_SCHEDULER, CmpOp, Expr, Record,
};
use crate::internal::server::claim::{Claim, ClaimStatus};
use crate::internal::server::comm::Comm;
use crate::internal::server::core::Core;
use crate::internal::server::resource::ResourceRecord;
use std::collections::VecDeque;
use std::time::Instant;

/// One outstanding ask for exactly one additional resource, derived from a
/// job proc with the node count forced to one.
#[derive(Debug)]
pub struct NegotiationRequest {
    pub proc: ProcRef,
    pub last_reject_reason: Option<String>,
    pub last_reject_time: Option<Instant>,
}

impl NegotiationRequest {
    pub fn new(proc: ProcRef) -> Self {
        NegotiationRequest {
            proc,
            last_reject_reason: None,
            last_reject_time: None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionStep {
    Continue,
    /// The round ended normally.
    Finished,
    /// Transport or enqueue failure; the connection must not be reused.
    Aborted,
}

/// Per-round protocol state machine against the external matchmaker.
/// Requests are taken out of the Core for the duration of the round and
/// every unresolved one is put back intact when the round ends, however it
/// ends.
pub struct NegotiationSession {
    pending: VecDeque<NegotiationRequest>,
    sent: Vec<NegotiationRequest>,
    /// Resolved as "try again next pass": rejections and dropped grants.
    requeued: Vec<NegotiationRequest>,
    round_limit: usize,
    sent_count: usize,
}

impl NegotiationSession {
    pub fn start(core: &mut Core) -> NegotiationSession {
        let requests = core.take_requests();
        log::info!("Starting negotiation round with {} request(s)", requests.len());
        NegotiationSession {
            round_limit: requests.len(),
            pending: requests.into(),
            sent: Vec::new(),
            requeued: Vec::new(),
            sent_count: 0,
        }
    }

    pub fn on_command(
        &mut self,
        core: &mut Core,
        comm: &mut impl Comm,
        command: MatchmakerCommand,
        now: Instant,
    ) -> SessionStep {
        match command {
            MatchmakerCommand::SendJobInfo => self.send_next_request(core, comm),
            MatchmakerCommand::PermissionGranted(msg) => self.on_granted(core, comm, msg, now),
            MatchmakerCommand::Rejected(msg) => self.on_rejected(msg, now),
            MatchmakerCommand::EndNegotiation => {
                self.requeue_unresolved(core);
                comm.ask_for_scheduling();
                SessionStep::Finished
            }
        }
    }

    /// A malformed or out-of-order message, or any transport error. The
    /// session is over; unresolved requests survive for the next round.
    pub fn on_transport_error(&mut self, core: &mut Core) -> SessionStep {
        log::warn!("Negotiation aborted by communication error");
        self.requeue_unresolved(core);
        SessionStep::Aborted
    }

    fn send_next_request(&mut self, core: &mut Core, comm: &mut impl Comm) -> SessionStep {
        while let Some(request) = self.pending.pop_front() {
            // The job may have been removed or satisfied since the request
            // was generated.
            let cluster_id = request.proc.cluster_id();
            if core.find_cluster(cluster_id).is_none() || core.allocations().contains(cluster_id) {
                log::debug!("Dropping request for vanished job {}", request.proc);
                continue;
            }
            let Some(record) = derive_request_record(core, &request) else {
                log::debug!("Cannot derive request record for {}", request.proc);
                continue;
            };
            assert!(self.sent_count < self.round_limit);
            self.sent_count += 1;
            comm.send_matchmaker_message(&ToMatchmakerMessage::JobInfo(record));
            self.sent.push(request);
            return SessionStep::Continue;
        }
        comm.send_matchmaker_message(&ToMatchmakerMessage::NoMoreRequests);
        SessionStep::Continue
    }

    fn on_granted(
        &mut self,
        core: &mut Core,
        comm: &mut impl Comm,
        msg: PermissionGrantedMsg,
        now: Instant,
    ) -> SessionStep {
        let PermissionGrantedMsg {
            proc,
            claim_token,
            resource,
        } = msg;
        log::debug!("Received grant for job {proc}: {claim_token}");

        let request = take_request(&mut self.sent, proc);
        let resource = match ResourceRecord::from_record(resource) {
            Ok(resource) => resource,
            Err(e) => {
                log::error!("Malformed resource record in grant: {e}");
                self.requeued.extend(request);
                return SessionStep::Continue;
            }
        };
        if core.claims().find_by_name(&resource.name).is_some() {
            log::info!(
                "Matchmaker sent grant for {}, but we've already got it, ignoring",
                resource.name
            );
            self.requeued.extend(request);
            return SessionStep::Continue;
        }
        if core.claims().contains(&claim_token) {
            log::error!("Grant reuses a known claim token {claim_token}, ignoring");
            self.requeued.extend(request);
            return SessionStep::Continue;
        }

        let claim = Claim::new(claim_token.clone(), resource, ClaimStatus::ContactPending, now);
        let addr = claim.owner_addr.clone();
        core.claims_mut().insert(claim);

        let contact = ToOwnerMessage::Claim(ClaimMsg {
            token: claim_token.clone(),
            scheduler: core.config().scheduler_name.clone(),
        });
        match comm.send_owner_message(&addr, &contact) {
            Ok(()) => SessionStep::Continue,
            Err(e) => {
                log::warn!("Cannot start claim protocol with {addr}: {e}");
                core.claims_mut().remove(&claim_token);
                self.requeued.extend(request);
                self.requeue_unresolved(core);
                SessionStep::Aborted
            }
        }
    }

    fn on_rejected(&mut self, msg: RejectedMsg, now: Instant) -> SessionStep {
        let RejectedMsg { proc, reason } = msg;
        // The matchmaker may reject a request it learned about from the
        // demand record before we offered it this round.
        let request = take_request(&mut self.sent, proc).or_else(|| {
            let pos = self.pending.iter().position(|r| r.proc == proc)?;
            self.pending.remove(pos)
        });
        match request {
            Some(mut request) => {
                log::debug!(
                    "Job {proc} rejected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                request.last_reject_reason = reason;
                request.last_reject_time = Some(now);
                self.requeued.push(request);
            }
            None => log::debug!("Rejection for job {proc} without an outstanding request"),
        }
        SessionStep::Continue
    }

    fn requeue_unresolved(&mut self, core: &mut Core) {
        let unresolved = self
            .pending
            .drain(..)
            .chain(self.sent.drain(..))
            .chain(self.requeued.drain(..));
        core.requeue_requests(unresolved);
        log::info!(
            "Negotiation round over: {} sent, {} request(s) left for the next round",
            self.sent_count,
            core.requests().len()
        );
    }
}

fn take_request(requests: &mut Vec<NegotiationRequest>, proc: ProcRef) -> Option<NegotiationRequest> {
    let pos = requests.iter().position(|r| r.proc == proc)?;
    Some(requests.remove(pos))
}

/// The record sent to the matchmaker: the proc's own record with the node
/// count forced to one and requirements augmented to demand a resource that
/// accepts this scheduler and is not already running one of our nodes.
fn derive_request_record(core: &Core, request: &NegotiationRequest) -> Option<Record> {
    let cluster = core.find_cluster(request.proc.cluster_id())?;
    let proc = cluster.find_proc(request.proc.proc_id())?;
    let name = core.config().scheduler_name.as_str();

    let mut record = proc.record.clone();
    record.assign(ATTR_NODE_COUNT, 1u32);
    record.assign(ATTR_CURRENT_NODES, 0u32);
    record.assign(ATTR_SCHEDULER, name);

    let accepts_us = Expr::Cmp(
        CmpOp::Eq,
        Box::new(target_attr(ATTR_DEDICATED_SCHEDULER)),
        Box::new(lit(name)),
    );
    let not_ours_already = Expr::Cmp(
        CmpOp::IsNot,
        Box::new(target_attr(ATTR_REMOTE_OWNER)),
        Box::new(lit(name)),
    );
    record.assign_expr(
        ATTR_REQUIREMENTS,
        accepts_us.and(not_ours_already).and(proc.requirements.clone()),
    );
    Some(record)
}
