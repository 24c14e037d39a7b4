use crate::internal::common::Map;
use crate::internal::common::ids::{ClaimToken, ClusterId};
use crate::internal::common::wrapped::WrappedRcRefCell;
use crate::internal::record::Expr;
use crate::internal::server::allocation::AllocationMap;
use crate::internal::server::claimmap::ClaimMap;
use crate::internal::server::cluster::JobCluster;
use crate::internal::server::coalesce::CoalesceOp;
use crate::internal::server::negotiation::NegotiationRequest;
use crate::internal::server::recovery::ReconnectJob;
use crate::internal::server::resource::ResourceRecord;
use crate::Priority;
use priority_queue::PriorityQueue;
use serde_json::json;
use std::cmp::Reverse;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Already-parsed configuration knobs, handed in by the config layer.
pub struct SchedConfig {
    /// Identity stamped on managed jobs and required of claimed resources.
    pub scheduler_name: String,
    /// Ceiling on how long a leased resource may sit idle before release.
    pub unused_claim_timeout: Option<Duration>,
    /// Both preemption expressions must be set for preemption to happen.
    pub preemption_requirements: Option<Expr>,
    pub preemption_rank: Option<Expr>,
    /// Strict FIFO (head-of-line blocking) vs. best-fit planning.
    pub fifo: bool,
    pub coalesce_retry_limit: u32,
    pub reconnect_retry_limit: u32,
    pub keepalive_interval: Option<Duration>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            scheduler_name: "gangsched".to_string(),
            unused_claim_timeout: None,
            preemption_requirements: None,
            preemption_rank: None,
            fifo: true,
            coalesce_retry_limit: 3,
            reconnect_retry_limit: 5,
            keepalive_interval: None,
        }
    }
}

/// Ordering of idle clusters: priority descending, then submit time ascending.
pub type ClusterOrder = (Priority, Reverse<u64>);

/// The scheduler context: every table the engine owns, mutated only by the
/// reactor thread. Constructed once per process and threaded through all
/// handlers.
#[derive(Default)]
pub struct Core {
    clusters: Map<ClusterId, JobCluster>,
    idle_queue: PriorityQueue<ClusterId, ClusterOrder, fxhash::FxBuildHasher>,
    claims: ClaimMap,
    allocations: AllocationMap,
    requests: Vec<NegotiationRequest>,
    pending_preemptions: Vec<ClaimToken>,
    reconnect_queue: Vec<ReconnectJob>,
    coalesce_ops: Map<ClusterId, CoalesceOp>,
    resource_snapshot: Vec<Rc<ResourceRecord>>,

    last_keepalive: Option<Instant>,
    config: SchedConfig,
}

pub type CoreRef = WrappedRcRefCell<Core>;

impl CoreRef {
    pub fn new(config: SchedConfig) -> Self {
        CoreRef::wrap(Core {
            config,
            ..Default::default()
        })
    }
}

impl Core {
    pub fn with_config(config: SchedConfig) -> Self {
        Core {
            config,
            ..Default::default()
        }
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    // Clusters -----------------------------------------------------------

    pub fn add_cluster(&mut self, cluster: JobCluster) {
        let order = (cluster.priority, Reverse(cluster.submit_time));
        self.idle_queue.push(cluster.id, order);
        assert!(self.clusters.insert(cluster.id, cluster).is_none());
    }

    pub fn remove_cluster(&mut self, cluster_id: ClusterId) -> Option<JobCluster> {
        self.idle_queue.remove(&cluster_id);
        self.reconnect_queue.retain(|r| r.cluster_id != cluster_id);
        self.clusters.remove(&cluster_id)
    }

    #[inline]
    pub fn find_cluster(&self, cluster_id: ClusterId) -> Option<&JobCluster> {
        self.clusters.get(&cluster_id)
    }

    #[inline]
    pub fn get_cluster(&self, cluster_id: ClusterId) -> &JobCluster {
        self.clusters.get(&cluster_id).unwrap_or_else(|| {
            panic!("Asking for invalid cluster id={cluster_id}");
        })
    }

    pub fn requeue_cluster(&mut self, cluster_id: ClusterId) {
        if let Some(cluster) = self.clusters.get(&cluster_id) {
            let order = (cluster.priority, Reverse(cluster.submit_time));
            self.idle_queue.push(cluster_id, order);
        }
    }

    pub fn dequeue_cluster(&mut self, cluster_id: ClusterId) {
        self.idle_queue.remove(&cluster_id);
    }

    /// Idle clusters in planning order (priority desc, submit time asc).
    pub fn sorted_idle_clusters(&self) -> Vec<ClusterId> {
        self.idle_queue
            .clone()
            .into_sorted_iter()
            .map(|(id, _)| id)
            .collect()
    }

    // Claims & allocations ----------------------------------------------

    #[inline]
    pub fn claims(&self) -> &ClaimMap {
        &self.claims
    }

    #[inline]
    pub fn claims_mut(&mut self) -> &mut ClaimMap {
        &mut self.claims
    }

    #[inline]
    pub fn allocations(&self) -> &AllocationMap {
        &self.allocations
    }

    #[inline]
    pub fn allocations_mut(&mut self) -> &mut AllocationMap {
        &mut self.allocations
    }

    pub fn split_claims_allocations_mut(&mut self) -> (&mut ClaimMap, &mut AllocationMap) {
        (&mut self.claims, &mut self.allocations)
    }

    // Negotiation requests ----------------------------------------------

    #[inline]
    pub fn requests(&self) -> &[NegotiationRequest] {
        &self.requests
    }

    pub fn push_request(&mut self, request: NegotiationRequest) {
        self.requests.push(request);
    }

    pub fn take_requests(&mut self) -> Vec<NegotiationRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn requeue_requests<I: IntoIterator<Item = NegotiationRequest>>(&mut self, requests: I) {
        self.requests.extend(requests);
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn cancel_requests_for(&mut self, cluster_id: ClusterId) {
        self.requests.retain(|r| r.proc.cluster_id() != cluster_id);
    }

    // Preemption ---------------------------------------------------------

    pub fn set_pending_preemptions(&mut self, victims: Vec<ClaimToken>) {
        self.pending_preemptions = victims;
    }

    pub fn add_pending_preemptions<I: IntoIterator<Item = ClaimToken>>(&mut self, victims: I) {
        self.pending_preemptions.extend(victims);
    }

    pub fn take_pending_preemptions(&mut self) -> Vec<ClaimToken> {
        std::mem::take(&mut self.pending_preemptions)
    }

    // Recovery -----------------------------------------------------------

    pub fn reconnect_queue(&self) -> &[ReconnectJob] {
        &self.reconnect_queue
    }

    pub fn push_reconnect(&mut self, job: ReconnectJob) {
        self.reconnect_queue.push(job);
    }

    pub fn take_reconnect_queue(&mut self) -> Vec<ReconnectJob> {
        std::mem::take(&mut self.reconnect_queue)
    }

    pub fn is_waiting_for_reconnect(&self, cluster_id: ClusterId) -> bool {
        self.reconnect_queue.iter().any(|r| r.cluster_id == cluster_id)
    }

    // Coalescing ---------------------------------------------------------

    pub fn coalesce_ops(&self) -> &Map<ClusterId, CoalesceOp> {
        &self.coalesce_ops
    }

    pub fn coalesce_ops_mut(&mut self) -> &mut Map<ClusterId, CoalesceOp> {
        &mut self.coalesce_ops
    }

    // Resource snapshot ---------------------------------------------------

    pub fn set_resource_snapshot(&mut self, resources: Vec<ResourceRecord>) {
        self.resource_snapshot = resources.into_iter().map(Rc::new).collect();
    }

    #[inline]
    pub fn resource_snapshot(&self) -> &[Rc<ResourceRecord>] {
        &self.resource_snapshot
    }

    // Maintenance timers --------------------------------------------------

    pub fn last_keepalive(&self) -> Option<Instant> {
        self.last_keepalive
    }

    pub fn set_last_keepalive(&mut self, now: Instant) {
        self.last_keepalive = Some(now);
    }

    /// The nearest moment any maintenance action (idle sweep, coalesce
    /// deadline, keepalive) becomes due. The event loop never has to wake
    /// up more often than this.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut consider = |deadline: Instant| {
            next = Some(match next {
                Some(cur) => cur.min(deadline),
                None => deadline,
            });
        };
        if let Some(ceiling) = self.config.unused_claim_timeout {
            for claim in self.claims.claims() {
                if claim.unused_time(now).is_some() {
                    consider(claim.status_entered() + ceiling);
                }
            }
        }
        for op in self.coalesce_ops.values() {
            consider(op.deadline);
        }
        if let Some(interval) = self.config.keepalive_interval {
            consider(self.last_keepalive.map_or(now, |last| last + interval));
        }
        next
    }

    /// Consistency check used by tests; panics on violated invariants.
    #[cfg(test)]
    pub fn sanity_check(&self) {
        use crate::internal::server::allocation::AllocationStatus;

        for allocation in self.allocations.allocations() {
            let cluster = self.clusters.get(&allocation.cluster_id);
            for (proc_id, claims) in allocation.procs() {
                // Dying allocations may be partially unlinked already
                if allocation.status == AllocationStatus::Running {
                    if let Some(cluster) = cluster {
                        let proc = cluster.find_proc(proc_id).unwrap();
                        assert_eq!(claims.len() as u32, proc.node_count);
                    }
                }
                for token in claims {
                    let claim = self.claims.find(token).unwrap_or_else(|| {
                        panic!(
                            "Allocation {} references unknown claim {}",
                            allocation.cluster_id, token
                        )
                    });
                    assert!(claim.is_allocated());
                    assert_eq!(
                        claim.assigned.map(|p| (p.cluster_id(), p.proc_id())),
                        Some((allocation.cluster_id, proc_id))
                    );
                }
            }
        }
        // No claim may be referenced by two allocations
        let mut seen = crate::internal::common::Set::default();
        for allocation in self.allocations.allocations() {
            for token in allocation.all_claims() {
                assert!(seen.insert(token.clone()), "Claim {token} shared");
            }
        }
        for claim in self.claims.claims() {
            if let Some(proc) = claim.assigned {
                assert!(self.allocations.contains(proc.cluster_id()));
            }
        }
    }

    pub fn dump(&self, now: Instant) -> serde_json::Value {
        json!({
            "clusters": self.clusters.values().map(|c| json!({
                "id": c.id,
                "procs": c.procs.iter().map(|p| p.node_count).collect::<Vec<_>>(),
                "priority": c.priority,
            })).collect::<Vec<_>>(),
            "claims": self.claims.claims().map(|c| json!({
                "token": c.token,
                "resource": c.name(),
                "status": format!("{:?}", c.status()),
                "assigned": c.assigned.map(|p| p.to_string()),
                "unused_secs": c.unused_time(now).map(|d| d.as_secs()),
            })).collect::<Vec<_>>(),
            "allocations": self.allocations.allocations().map(|a| json!({
                "cluster": a.cluster_id,
                "status": format!("{:?}", a.status),
                "claims": a.all_claims().collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "pending_requests": self.requests.len(),
        })
    }
}
