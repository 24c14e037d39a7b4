use crate::internal::record::eval_rank;
use crate::internal::server::claim::ClaimStatus;
use crate::internal::server::claimmap::ClaimMap;
use crate::internal::server::cluster::JobProc;
use crate::internal::server::resource::ResourceRecord;
use std::rc::Rc;

/// An ordered list of candidate resources consumed by matching. Matched
/// entries are removed; it is the caller's responsibility to put them back
/// if the schedule they were held for falls through.
#[derive(Default)]
pub struct ResList {
    resources: Vec<Rc<ResourceRecord>>,
}

impl ResList {
    pub fn push(&mut self, resource: Rc<ResourceRecord>) {
        self.resources.push(resource);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<ResourceRecord>> {
        self.resources.iter()
    }

    /// Removes and returns the first resource satisfying the predicate.
    pub fn take_first<F: Fn(&ResourceRecord) -> bool>(
        &mut self,
        pred: F,
    ) -> Option<Rc<ResourceRecord>> {
        let pos = self.resources.iter().position(|r| pred(r))?;
        Some(self.resources.remove(pos))
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Rc<ResourceRecord>> {
        self.take_first(|r| r.name == name)
    }

    /// Sorts the list by the job's Rank expression, descending. A rank that
    /// is missing or does not evaluate to a number counts as 0.
    pub fn sort_by_rank(&mut self, proc: &JobProc) {
        let rank_of = |res: &ResourceRecord| -> f64 {
            proc.rank
                .as_ref()
                .and_then(|rank| eval_rank(rank, &proc.record, Some(&res.record)))
                .unwrap_or(0.0)
        };
        self.resources
            .sort_by(|a, b| rank_of(b).total_cmp(&rank_of(a)));
    }

    /// Resources belonging to the given scheduling group. Does not remove
    /// them from this list.
    pub fn select_group(&self, group: &str) -> ResList {
        ResList {
            resources: self
                .resources
                .iter()
                .filter(|r| r.group.as_deref() == Some(group))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<Rc<ResourceRecord>> for ResList {
    fn from_iter<I: IntoIterator<Item = Rc<ResourceRecord>>>(iter: I) -> Self {
        ResList {
            resources: iter.into_iter().collect(),
        }
    }
}

/// Snapshot of all known resources, partitioned by what the live claim table
/// says about them. The record's own state attribute may be stale, so it is
/// never consulted.
#[derive(Default)]
pub struct ResourcePool {
    /// Leased by us and idle (Claimed).
    pub free: ResList,
    /// Lease in flight (ContactPending).
    pub pending: ResList,
    /// Never leased by us.
    pub unclaimed: ResList,
    /// Leased and running a node (Active).
    pub busy: ResList,
    /// Names of every scheduling group seen in the snapshot.
    pub groups: Vec<String>,
    all: Vec<Rc<ResourceRecord>>,
}

impl ResourcePool {
    pub fn classify(resources: &[Rc<ResourceRecord>], claims: &ClaimMap) -> ResourcePool {
        let mut pool = ResourcePool {
            all: resources.to_vec(),
            ..Default::default()
        };
        for resource in resources {
            if let Some(group) = &resource.group {
                if !pool.groups.contains(group) {
                    pool.groups.push(group.clone());
                }
            }
            match claims.find_by_name(&resource.name) {
                None => pool.unclaimed.push(resource.clone()),
                Some(claim) => match claim.status() {
                    ClaimStatus::Active => pool.busy.push(resource.clone()),
                    ClaimStatus::Claimed => pool.free.push(resource.clone()),
                    ClaimStatus::ContactPending => pool.pending.push(resource.clone()),
                    ClaimStatus::Unclaimed => {
                        log::debug!(
                            "Resource {} has an unclaimed claim record, treating as unclaimed",
                            resource.name
                        );
                        pool.unclaimed.push(resource.clone());
                    }
                },
            }
        }
        log::debug!(
            "Pool classified: {} free, {} pending, {} unclaimed, {} busy",
            pool.free.len(),
            pool.pending.len(),
            pool.unclaimed.len(),
            pool.busy.len()
        );
        pool
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.all.len()
    }

    /// Every resource of the snapshot regardless of classification.
    #[inline]
    pub fn all(&self) -> &[Rc<ResourceRecord>] {
        &self.all
    }
}
