#![deny(clippy::await_holding_refcell_ref)]

#[macro_use]
pub mod internal;

pub use crate::internal::common::WrappedRcRefCell;
pub use crate::internal::common::index::AsIdVec;
pub use crate::internal::common::{Map, Set};

pub use crate::internal::common::ids::{ClaimToken, ClusterId, ProcId, ProcRef};

// Priority: Bigger number -> Higher priority
pub type Priority = i32;

pub type Error = internal::common::error::SchedError;
pub type Result<T> = std::result::Result<T, Error>;

pub const MAX_FRAME_SIZE: usize = 128 * 1024 * 1024;

pub mod record {
    pub use crate::internal::record::{
        ArithOp, AttrValue, CmpOp, Expr, Record, eval_rank, eval_req,
    };
    pub use crate::internal::record::expr::{attr, lit, target_attr};
}

pub mod server {
    pub use crate::internal::scheduler::main::scheduler_loop;
    pub use crate::internal::server::claim::{Claim, ClaimFlags, ClaimStatus};
    pub use crate::internal::server::cluster::{JobCluster, JobProc};
    pub use crate::internal::server::comm::{
        Comm, CommSender, CommSenderRef, ExecutorSpawn, JobAttrUpdate, JobStatus, SpawnProc,
        ToStoreMessage,
    };
    pub use crate::internal::server::core::{Core, CoreRef, SchedConfig};
    pub use crate::internal::server::executor::ExitReason;
    pub use crate::internal::server::negotiation::{NegotiationSession, SessionStep};
    pub use crate::internal::server::recovery::ReconnectJob;
    pub use crate::internal::server::resource::ResourceRecord;
}

pub mod messages {
    pub use crate::internal::messages::matchmaker::{
        DemandMsg, MatchmakerCommand, PermissionGrantedMsg, RejectedMsg, ToMatchmakerMessage,
    };
    pub use crate::internal::messages::owner::{
        ClaimMsg, ClaimTokenMsg, CoalesceMsg, CoalesceReplyMsg, CoalesceResult, FromOwnerMessage,
        ToOwnerMessage,
    };
}

pub mod events {
    pub use crate::internal::server::coalesce::start_coalesce;
    pub use crate::internal::server::reactor::{
        on_claim_confirmed, on_claim_refused, on_claim_vacated, on_cluster_held,
        on_cluster_removed, on_new_cluster, on_owner_message, on_resource_snapshot,
    };
    pub use crate::internal::server::executor::on_executor_exit;
    pub use crate::internal::server::recovery::enqueue_reconnect_jobs;
}
