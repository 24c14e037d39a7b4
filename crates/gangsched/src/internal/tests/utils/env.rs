use crate::internal::common::ids::{ClaimToken, ClusterId, ProcRef};
use crate::internal::common::{Map, Set};
use crate::internal::messages::matchmaker::{DemandMsg, ToMatchmakerMessage};
use crate::internal::messages::owner::ToOwnerMessage;
use crate::internal::scheduler::main::run_scheduling;
use crate::internal::scheduler::planner::compute_schedule;
use crate::internal::server::claim::{Claim, ClaimStatus};
use crate::internal::server::comm::{Comm, ExecutorSpawn, JobAttrUpdate, JobStatus};
use crate::internal::server::core::{Core, SchedConfig};
use crate::internal::server::pool::ResourcePool;
use crate::internal::server::resource::ResourceRecord;
use crate::internal::tests::utils::resource::resource;
use std::time::Instant;

/// Recording Comm implementation for tests; every outbound effect lands in
/// a vector with a matching `take_*` helper.
#[derive(Default, Debug)]
pub struct TestComm {
    pub owner_msgs: Map<String, Vec<ToOwnerMessage>>,
    pub matchmaker_msgs: Vec<ToMatchmakerMessage>,
    pub demands: Vec<DemandMsg>,
    pub spawns: Vec<ExecutorSpawn>,
    pub job_updates: Vec<(ProcRef, JobAttrUpdate)>,
    pub status_changes: Vec<(ClusterId, JobStatus, Option<String>)>,
    pub coalesce_results: Vec<(ClusterId, Option<ClaimToken>)>,

    /// Owners listed here refuse message enqueues.
    pub unreachable_owners: Set<String>,
    /// Makes spawn_executor fail, simulating a missing executor capability.
    pub fail_spawn: bool,

    pub need_scheduling: bool,
}

pub fn create_test_comm() -> TestComm {
    TestComm::default()
}

impl TestComm {
    pub fn take_owner_msgs(&mut self, addr: &str, len: usize) -> Vec<ToOwnerMessage> {
        let msgs = self.owner_msgs.remove(addr).unwrap_or_default();
        if len != 0 {
            assert_eq!(msgs.len(), len);
        }
        msgs
    }

    pub fn take_matchmaker_msgs(&mut self, len: usize) -> Vec<ToMatchmakerMessage> {
        assert_eq!(self.matchmaker_msgs.len(), len);
        std::mem::take(&mut self.matchmaker_msgs)
    }

    pub fn take_demands(&mut self) -> Vec<DemandMsg> {
        std::mem::take(&mut self.demands)
    }

    pub fn take_spawns(&mut self, len: usize) -> Vec<ExecutorSpawn> {
        assert_eq!(self.spawns.len(), len);
        std::mem::take(&mut self.spawns)
    }

    pub fn take_job_updates(&mut self) -> Vec<(ProcRef, JobAttrUpdate)> {
        std::mem::take(&mut self.job_updates)
    }

    pub fn take_status_changes(&mut self, len: usize) -> Vec<(ClusterId, JobStatus, Option<String>)> {
        assert_eq!(self.status_changes.len(), len);
        std::mem::take(&mut self.status_changes)
    }

    pub fn take_coalesce_results(&mut self, len: usize) -> Vec<(ClusterId, Option<ClaimToken>)> {
        assert_eq!(self.coalesce_results.len(), len);
        std::mem::take(&mut self.coalesce_results)
    }

    pub fn check_need_scheduling(&mut self) {
        assert!(self.need_scheduling);
        self.need_scheduling = false;
    }

    pub fn emptiness_check(&self) {
        if !self.owner_msgs.is_empty() {
            let addrs: Vec<_> = self.owner_msgs.keys().collect();
            panic!("Unexpected owner messages for: {addrs:?}");
        }
        assert!(self.matchmaker_msgs.is_empty());
        assert!(self.spawns.is_empty());
        assert!(self.status_changes.is_empty());
        assert!(self.coalesce_results.is_empty());
    }
}

impl Comm for TestComm {
    fn send_owner_message(&mut self, addr: &str, message: &ToOwnerMessage) -> crate::Result<()> {
        if self.unreachable_owners.contains(addr) {
            return Err(format!("No route to resource owner {addr}").into());
        }
        // Round-trip through serde like the real CommSender does
        let data = crate::internal::server::comm::serialize(message).unwrap();
        let message = crate::internal::server::comm::deserialize(&data).unwrap();
        self.owner_msgs.entry(addr.to_string()).or_default().push(message);
        Ok(())
    }

    fn send_matchmaker_message(&mut self, message: &ToMatchmakerMessage) {
        let data = crate::internal::server::comm::serialize(message).unwrap();
        self.matchmaker_msgs
            .push(crate::internal::server::comm::deserialize(&data).unwrap());
    }

    fn publish_demand(&mut self, demand: DemandMsg) {
        self.demands.push(demand);
    }

    fn spawn_executor(&mut self, spawn: ExecutorSpawn) -> crate::Result<()> {
        if self.fail_spawn {
            return Err("No job executor available".into());
        }
        self.spawns.push(spawn);
        Ok(())
    }

    fn update_job(&mut self, proc: ProcRef, update: JobAttrUpdate) {
        self.job_updates.push((proc, update));
    }

    fn set_job_status(&mut self, cluster_id: ClusterId, status: JobStatus, reason: Option<&str>) {
        self.status_changes
            .push((cluster_id, status, reason.map(|r| r.to_string())));
    }

    fn coalesce_finished(&mut self, cluster_id: ClusterId, merged: Option<&ClaimToken>) {
        self.coalesce_results.push((cluster_id, merged.cloned()));
    }

    fn ask_for_scheduling(&mut self) {
        self.need_scheduling = true;
    }
}

pub struct TestEnv {
    core: Core,
    token_counter: u32,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> TestEnv {
        Self::with_config(Default::default())
    }

    pub fn with_config(config: SchedConfig) -> TestEnv {
        TestEnv {
            core: Core::with_config(config),
            token_counter: 100,
        }
    }

    pub fn core(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Installs a snapshot built from the given resources.
    pub fn set_snapshot(&mut self, resources: Vec<ResourceRecord>) {
        self.core.set_resource_snapshot(resources);
    }

    /// Creates a claim in the given status for a plain resource of this
    /// name, inserts it and returns its token.
    pub fn new_claim(&mut self, name: &str, status: ClaimStatus, now: Instant) -> ClaimToken {
        self.new_claim_on(resource(name), status, now)
    }

    pub fn new_claim_on(
        &mut self,
        resource: ResourceRecord,
        status: ClaimStatus,
        now: Instant,
    ) -> ClaimToken {
        self.token_counter += 1;
        let token = ClaimToken::new(format!("tok-{}", self.token_counter));
        self.core
            .claims_mut()
            .insert(Claim::new(token.clone(), resource, status, now));
        token
    }

    /// Runs classification and one planner pass, without spawning.
    pub fn plan(&mut self) {
        let snapshot = self.core.resource_snapshot().to_vec();
        let mut pool = ResourcePool::classify(&snapshot, self.core.claims());
        compute_schedule(&mut self.core, &mut pool);
        self.core.sanity_check();
    }

    /// Runs a full scheduling pass including spawns and maintenance.
    pub fn schedule(&mut self, comm: &mut TestComm, now: Instant) {
        run_scheduling(&mut self.core, comm, now);
        self.core.sanity_check();
    }
}
