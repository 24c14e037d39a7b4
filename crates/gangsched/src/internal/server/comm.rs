use std::rc::Rc;

use bincode::Options;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;

use crate::internal::common::Map;
use crate::internal::common::ids::{ClaimToken, ClusterId, ProcRef};
use crate::internal::common::wrapped::WrappedRcRefCell;
use crate::internal::messages::matchmaker::{DemandMsg, ToMatchmakerMessage};
use crate::internal::messages::owner::ToOwnerMessage;
use crate::internal::record::Record;
use thin_vec::ThinVec;

pub fn serialize<T>(value: &T) -> crate::Result<Vec<u8>>
where
    T: serde::Serialize + ?Sized,
{
    bincode::DefaultOptions::new()
        .with_limit(crate::MAX_FRAME_SIZE as u64)
        .with_fixint_encoding()
        .serialize(value)
        .map_err(|e| format!("Serialization failed: {e:?}").into())
}

pub fn deserialize<'a, T>(bytes: &'a [u8]) -> crate::Result<T>
where
    T: Deserialize<'a>,
{
    bincode::DefaultOptions::new()
        .with_limit(crate::MAX_FRAME_SIZE as u64)
        .with_fixint_encoding()
        .deserialize(bytes)
        .map_err(|e| format!("Deserialization failed: {e:?}, data {bytes:?}").into())
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Removed,
    Held,
}

/// Attribute writes pushed to the durable job-record store.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct JobAttrUpdate {
    pub node_count: Option<u32>,
    pub claim_tokens: Option<ThinVec<ClaimToken>>,
    pub remote_hosts: Option<ThinVec<String>>,
    pub scheduler: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum ToStoreMessage {
    UpdateAttrs(ProcRef, JobAttrUpdate),
    SetStatus(ClusterId, JobStatus, Option<String>),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SpawnProc {
    pub job: Record,
    pub claims: ThinVec<ClaimToken>,
}

/// Everything the external job executor needs to run one cluster.
#[derive(Serialize, Deserialize, Debug)]
pub struct ExecutorSpawn {
    pub cluster_id: ClusterId,
    /// Claim the executor attaches through (node 0 of proc 0).
    pub attachment: ClaimToken,
    pub procs: Vec<SpawnProc>,
    /// Re-attach to an already running computation instead of starting one.
    pub is_reconnect: bool,
}

/// Outbound side of the engine. All remote calls are asynchronous; replies
/// come back as reactor events, never through these methods.
pub trait Comm {
    /// Enqueue a message towards a resource owner. May fail when the owner
    /// cannot be reached at all (no route/queue); the caller decides what
    /// that does to the operation.
    fn send_owner_message(&mut self, addr: &str, message: &ToOwnerMessage) -> crate::Result<()>;
    fn send_matchmaker_message(&mut self, message: &ToMatchmakerMessage);
    fn publish_demand(&mut self, demand: DemandMsg);
    fn spawn_executor(&mut self, spawn: ExecutorSpawn) -> crate::Result<()>;
    fn update_job(&mut self, proc: ProcRef, update: JobAttrUpdate);
    fn set_job_status(&mut self, cluster_id: ClusterId, status: JobStatus, reason: Option<&str>);
    /// Outcome of a coalesce operation for the given now-job.
    fn coalesce_finished(&mut self, cluster_id: ClusterId, merged: Option<&ClaimToken>);
    fn ask_for_scheduling(&mut self);
}

pub struct CommSender {
    owners: Map<String, UnboundedSender<Bytes>>,
    matchmaker: Option<UnboundedSender<Bytes>>,
    store: Option<UnboundedSender<Bytes>>,
    executor: Option<UnboundedSender<Bytes>>,
    need_scheduling: bool,
    scheduler_wakeup: Rc<Notify>,
}

pub type CommSenderRef = WrappedRcRefCell<CommSender>;

impl CommSenderRef {
    pub fn new(scheduler_wakeup: Rc<Notify>) -> Self {
        WrappedRcRefCell::wrap(CommSender {
            owners: Default::default(),
            matchmaker: None,
            store: None,
            executor: None,
            need_scheduling: false,
            scheduler_wakeup,
        })
    }
}

impl CommSender {
    pub fn add_owner(&mut self, addr: String, sender: UnboundedSender<Bytes>) {
        self.owners.insert(addr, sender);
    }

    pub fn remove_owner(&mut self, addr: &str) {
        self.owners.remove(addr);
    }

    pub fn set_matchmaker(&mut self, sender: Option<UnboundedSender<Bytes>>) {
        self.matchmaker = sender;
    }

    pub fn set_store(&mut self, sender: UnboundedSender<Bytes>) {
        self.store = Some(sender);
    }

    pub fn set_executor(&mut self, sender: Option<UnboundedSender<Bytes>>) {
        self.executor = sender;
    }

    pub fn reset_scheduling_flag(&mut self) {
        self.need_scheduling = false
    }

    pub fn get_scheduling_flag(&self) -> bool {
        self.need_scheduling
    }

    fn send_store_message(&mut self, message: &ToStoreMessage) {
        let data = serialize(&message).unwrap();
        if let Some(store) = &self.store {
            if store.send(data.into()).is_err() {
                log::error!("Job store connection lost; dropping update");
            }
        }
    }
}

impl Comm for CommSender {
    fn send_owner_message(&mut self, addr: &str, message: &ToOwnerMessage) -> crate::Result<()> {
        let data = serialize(&message)?;
        let sender = self
            .owners
            .get(addr)
            .ok_or_else(|| format!("No route to resource owner {addr}"))?;
        sender
            .send(data.into())
            .map_err(|_| format!("Enqueue to resource owner {addr} failed").into())
    }

    fn send_matchmaker_message(&mut self, message: &ToMatchmakerMessage) {
        let data = serialize(&message).unwrap();
        if let Some(matchmaker) = &self.matchmaker {
            if matchmaker.send(data.into()).is_err() {
                log::debug!("Matchmaker connection closed while sending");
            }
        }
    }

    fn publish_demand(&mut self, demand: DemandMsg) {
        log::debug!(
            "Publishing demand of {} pending request(s)",
            demand.pending_requests
        );
        if let Some(matchmaker) = &self.matchmaker {
            let data = serialize(&demand).unwrap();
            let _ = matchmaker.send(data.into());
        }
    }

    fn spawn_executor(&mut self, spawn: ExecutorSpawn) -> crate::Result<()> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| format!("No job executor available for {}", spawn.cluster_id))?;
        let data = serialize(&spawn)?;
        executor
            .send(data.into())
            .map_err(|_| "Job executor channel closed".into())
    }

    fn update_job(&mut self, proc: ProcRef, update: JobAttrUpdate) {
        self.send_store_message(&ToStoreMessage::UpdateAttrs(proc, update));
    }

    fn set_job_status(&mut self, cluster_id: ClusterId, status: JobStatus, reason: Option<&str>) {
        self.send_store_message(&ToStoreMessage::SetStatus(
            cluster_id,
            status,
            reason.map(|r| r.to_string()),
        ));
    }

    fn coalesce_finished(&mut self, cluster_id: ClusterId, merged: Option<&ClaimToken>) {
        match merged {
            Some(token) => log::info!("Coalesce for {cluster_id} produced {token}"),
            None => log::info!("Coalesce for {cluster_id} failed"),
        }
    }

    #[inline]
    fn ask_for_scheduling(&mut self) {
        if !self.need_scheduling {
            self.need_scheduling = true;
            self.scheduler_wakeup.notify_one();
        }
    }
}
