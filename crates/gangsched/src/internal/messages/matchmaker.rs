use crate::internal::common::ids::{ClaimToken, ProcRef};
use crate::internal::record::Record;
use serde::{Deserialize, Serialize};

/// One command of a negotiation round. The matchmaker drives the session;
/// commands arrive strictly sequentially over a single connection.
#[derive(Serialize, Deserialize, Debug)]
pub enum MatchmakerCommand {
    SendJobInfo,
    PermissionGranted(PermissionGrantedMsg),
    Rejected(RejectedMsg),
    EndNegotiation,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PermissionGrantedMsg {
    pub proc: ProcRef,
    pub claim_token: ClaimToken,
    pub resource: Record,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RejectedMsg {
    pub proc: ProcRef,
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum ToMatchmakerMessage {
    /// Reply to `SendJobInfo`: the derived single-node request record.
    JobInfo(Record),
    /// Reply to `SendJobInfo` when every request of the round was already sent.
    NoMoreRequests,
}

/// Published periodically so the matchmaker knows whether to invite us
/// into a negotiation round.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DemandMsg {
    pub scheduler: String,
    pub pending_requests: u32,
}
