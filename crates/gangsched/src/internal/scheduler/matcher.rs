use crate::internal::record::eval_req;
use crate::internal::server::claimmap::ClaimMap;
use crate::internal::server::cluster::JobProc;
use crate::internal::server::pool::ResList;
use crate::internal::server::resource::ResourceRecord;
use std::rc::Rc;

/// One matched (node request, resource) pair.
pub struct Candidate {
    pub proc: Rc<JobProc>,
    pub resource: Rc<ResourceRecord>,
}

/// Candidates held while a multi-tier match is being assembled.
#[derive(Default)]
pub struct CandidateList {
    candidates: Vec<Candidate>,
}

impl CandidateList {
    #[inline]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    /// Marks the claim of every held resource as reserved for the pending
    /// schedule. Panics if a held resource has no claim: the pool listed it
    /// as leased, so a missing claim is table corruption.
    pub fn mark_scheduled(&self, claims: &mut ClaimMap) {
        for candidate in &self.candidates {
            let token = claims
                .token_by_name(&candidate.resource.name)
                .unwrap_or_else(|| {
                    panic!(
                        "No claim for {}, but listed as available",
                        candidate.resource.name
                    )
                })
                .clone();
            claims.get_mut(&token).set_scheduled(true);
        }
    }

    /// Returns the held resources to the given pool list.
    pub fn return_to(self, pool: &mut ResList) {
        for candidate in self.candidates {
            pool.push(candidate.resource);
        }
    }
}

/// Does the node request's Requirements expression accept this resource?
/// Undefined evaluates to false.
pub fn node_satisfies(proc: &JobProc, resource: &ResourceRecord) -> bool {
    eval_req(&proc.requirements, &proc.record, Some(&resource.record))
}

/// Greedy bipartite assignment: for each node request in order, take the
/// first candidate whose Requirements accept it. Matched resources move from
/// `pool` into `candidates`, matched requests are removed from `nodes`.
/// Returns true only if every node request was satisfied; on false, partial
/// matches stay in `candidates` and `nodes` keeps the unmatched remainder.
pub fn satisfy_nodes(
    nodes: &mut Vec<Rc<JobProc>>,
    pool: &mut ResList,
    candidates: &mut CandidateList,
    sort_by_rank: bool,
) -> bool {
    if pool.is_empty() {
        return false;
    }
    log::debug!(
        "Matching {} node request(s) against {} resource(s)",
        nodes.len(),
        pool.len()
    );

    if sort_by_rank {
        // Rank the pool once, by the first node's Rank; ranks should rarely
        // differ between procs of one cluster.
        if let Some(first) = nodes.first() {
            pool.sort_by_rank(first);
        }
    }

    nodes.retain(|proc| {
        match pool.take_first(|resource| node_satisfies(proc, resource)) {
            Some(resource) => {
                log::debug!("Node of {} satisfied with {}", proc.id, resource.name);
                candidates.push(Candidate {
                    proc: proc.clone(),
                    resource,
                });
                false
            }
            None => true,
        }
    });
    nodes.is_empty()
}

/// Exhaustive feasibility check against every resource we know about,
/// leased or not. Used to decide whether an unsatisfied job could *ever*
/// run, which drives head-of-line blocking. Returns the resource names that
/// a full assignment would use.
pub fn possible_assignment(
    nodes: &[Rc<JobProc>],
    all: &[Rc<ResourceRecord>],
) -> Option<Vec<String>> {
    let mut available: Vec<&ResourceRecord> = all.iter().map(|r| r.as_ref()).collect();
    let mut names = Vec::with_capacity(nodes.len());
    for proc in nodes {
        let pos = available
            .iter()
            .position(|resource| node_satisfies(proc, resource))?;
        names.push(available.swap_remove(pos).name.clone());
    }
    Some(names)
}
