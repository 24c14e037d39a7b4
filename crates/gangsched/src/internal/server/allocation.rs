use crate::internal::common::Map;
use crate::internal::common::ids::{ClaimToken, ClusterId, ProcId};
use smallvec::SmallVec;

pub type NodeClaims = SmallVec<[ClaimToken; 4]>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AllocationStatus {
    /// Fully matched, executor not spawned yet.
    New,
    Running,
    Dying,
}

/// The complete bound resource set for one parallel job: the ordered claim
/// list of every proc, plus executor bookkeeping. Claims are referenced by
/// token and must be resolved through the claim table on every access.
pub struct AllocationNode {
    pub cluster_id: ClusterId,
    claims: Vec<NodeClaims>,
    pub status: AllocationStatus,
    /// Claim used as the executor's attachment point (node 0 of proc 0).
    pub attachment: Option<ClaimToken>,
    /// Rebuilt by recovery instead of the planner.
    pub is_recovered: bool,
}

impl AllocationNode {
    pub fn new(cluster_id: ClusterId, n_procs: usize) -> Self {
        AllocationNode {
            cluster_id,
            claims: (0..n_procs).map(|_| NodeClaims::new()).collect(),
            status: AllocationStatus::New,
            attachment: None,
            is_recovered: false,
        }
    }

    pub fn push_claim(&mut self, proc_id: ProcId, token: ClaimToken) {
        self.claims[proc_id.as_num() as usize].push(token);
    }

    #[inline]
    pub fn n_procs(&self) -> usize {
        self.claims.len()
    }

    pub fn proc_claims(&self, proc_id: ProcId) -> &[ClaimToken] {
        &self.claims[proc_id.as_num() as usize]
    }

    pub fn procs(&self) -> impl Iterator<Item = (ProcId, &[ClaimToken])> {
        self.claims
            .iter()
            .enumerate()
            .map(|(i, claims)| (ProcId::new(i as u32), claims.as_slice()))
    }

    pub fn all_claims(&self) -> impl Iterator<Item = &ClaimToken> {
        self.claims.iter().flatten()
    }

    /// Detaches the given claim from whatever proc holds it. Used when a
    /// claim leaves a job early (release, coalescing).
    pub fn unlink_claim(&mut self, token: &ClaimToken) -> bool {
        for claims in &mut self.claims {
            if let Some(pos) = claims.iter().position(|t| t == token) {
                claims.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn total_claims(&self) -> usize {
        self.claims.iter().map(|c| c.len()).sum()
    }
}

#[derive(Default)]
pub struct AllocationMap {
    allocations: Map<ClusterId, AllocationNode>,
}

impl AllocationMap {
    pub fn insert(&mut self, allocation: AllocationNode) {
        assert!(
            self.allocations
                .insert(allocation.cluster_id, allocation)
                .is_none()
        );
    }

    pub fn remove(&mut self, cluster_id: ClusterId) -> Option<AllocationNode> {
        self.allocations.remove(&cluster_id)
    }

    #[inline]
    pub fn find(&self, cluster_id: ClusterId) -> Option<&AllocationNode> {
        self.allocations.get(&cluster_id)
    }

    #[inline]
    pub fn find_mut(&mut self, cluster_id: ClusterId) -> Option<&mut AllocationNode> {
        self.allocations.get_mut(&cluster_id)
    }

    #[inline]
    pub fn get(&self, cluster_id: ClusterId) -> &AllocationNode {
        self.allocations.get(&cluster_id).unwrap_or_else(|| {
            panic!("Asking for invalid allocation cluster={cluster_id}");
        })
    }

    #[inline]
    pub fn contains(&self, cluster_id: ClusterId) -> bool {
        self.allocations.contains_key(&cluster_id)
    }

    #[inline]
    pub fn allocations(&self) -> impl Iterator<Item = &AllocationNode> {
        self.allocations.values()
    }

    #[inline]
    pub fn allocations_mut(&mut self) -> impl Iterator<Item = &mut AllocationNode> {
        self.allocations.values_mut()
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.allocations.keys().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}
