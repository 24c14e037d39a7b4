use crate::internal::common::ids::{ClaimToken, ClusterId};
use crate::internal::record::Record;
use serde::{Deserialize, Serialize};
use thin_vec::ThinVec;

#[derive(Serialize, Deserialize, Debug)]
pub struct ClaimMsg {
    pub token: ClaimToken,
    pub scheduler: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClaimTokenMsg {
    pub token: ClaimToken,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CoalesceMsg {
    /// Echoed back in the reply for correlation.
    pub now_job: ClusterId,
    pub tokens: ThinVec<ClaimToken>,
    pub job: Record,
}

/// Requests sent to the network address of a resource owner.
#[derive(Serialize, Deserialize, Debug)]
pub enum ToOwnerMessage {
    Claim(ClaimMsg),
    Deactivate(ClaimTokenMsg),
    /// Best-effort; the reply (if any) is ignored.
    Release(ClaimTokenMsg),
    KeepAlive(ClaimTokenMsg),
    Coalesce(CoalesceMsg),
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
pub enum CoalesceResult {
    Ok,
    /// Transient; the owner was mid-transition, the request may be retried.
    WrongState,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CoalesceReplyMsg {
    pub now_job: ClusterId,
    pub result: CoalesceResult,
    pub merged_token: Option<ClaimToken>,
    pub resource: Option<Record>,
}

/// Owner-side events delivered back into the reactor by the transport layer.
#[derive(Serialize, Deserialize, Debug)]
pub enum FromOwnerMessage {
    /// The asynchronous claim protocol finished; the lease is ours.
    ClaimConfirmed(ClaimTokenMsg),
    /// The claim protocol failed; the token is void.
    ClaimRefused(ClaimTokenMsg),
    /// A previously active claim was vacated (deactivation finished).
    Vacated(ClaimTokenMsg),
    CoalesceReply(CoalesceReplyMsg),
}
