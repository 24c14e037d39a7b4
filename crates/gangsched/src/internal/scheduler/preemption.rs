use crate::internal::common::Set;
use crate::internal::common::ids::ClusterId;
use crate::internal::record::{Expr, eval_rank, eval_req};
use crate::internal::scheduler::matcher::node_satisfies;
use crate::internal::server::cluster::JobProc;
use crate::internal::server::pool::ResList;
use crate::internal::server::resource::ResourceRecord;
use std::rc::Rc;

struct PreemptCandidate {
    resource: Rc<ResourceRecord>,
    rank: f64,
    cluster_id: ClusterId,
}

/// Rank descending, cluster id as tie-break.
fn rank_order(lhs: &PreemptCandidate, rhs: &PreemptCandidate) -> std::cmp::Ordering {
    rhs.rank
        .total_cmp(&lhs.rank)
        .then_with(|| lhs.cluster_id.cmp(&rhs.cluster_id))
}

fn collect_candidates(
    proc: &JobProc,
    busy: &ResList,
    taken: &Set<String>,
    requirements: &Expr,
    rank: &Expr,
) -> Vec<PreemptCandidate> {
    let mut candidates = Vec::new();
    for resource in busy.iter() {
        if taken.contains(&resource.name) {
            continue;
        }
        // Admin expressions are evaluated with the busy machine as the
        // primary record and the pending job as the context.
        if !eval_req(requirements, &resource.record, Some(&proc.record)) {
            continue;
        }
        let rank = match eval_rank(rank, &resource.record, Some(&proc.record)) {
            Some(rank) => rank,
            None => {
                log::info!(
                    "Preemption rank did not evaluate to a number on job {} for machine {}",
                    proc.id,
                    resource.name
                );
                continue;
            }
        };
        candidates.push(PreemptCandidate {
            resource: resource.clone(),
            rank,
            cluster_id: proc.id.cluster_id(),
        });
    }
    candidates.sort_by(rank_order);
    candidates
}

/// Chooses preemption victims for the given unsatisfied node requests from
/// the busy pool. Victims must pass the admin Requirements expression and
/// the job's own Requirements; highest admin Rank goes first. If the
/// remainder cannot be fully covered, no preemption happens and the busy
/// pool is left untouched. On success the victims are removed from `busy`.
pub fn select_victims(
    nodes: &[Rc<JobProc>],
    busy: &mut ResList,
    requirements: &Expr,
    rank: &Expr,
) -> Option<Vec<Rc<ResourceRecord>>> {
    let mut victims: Vec<Rc<ResourceRecord>> = Vec::with_capacity(nodes.len());
    let mut taken: Set<String> = Set::default();

    for proc in nodes {
        let candidates = collect_candidates(proc, busy, &taken, requirements, rank);
        let victim = candidates
            .into_iter()
            .find(|c| node_satisfies(proc, &c.resource))?;
        taken.insert(victim.resource.name.clone());
        victims.push(victim.resource);
    }

    for victim in &victims {
        busy.remove_by_name(&victim.name);
    }
    Some(victims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::record::expr::{attr, lit};
    use crate::internal::record::{CmpOp, Expr};
    use crate::internal::tests::utils::cluster::cluster_with_procs;
    use crate::internal::tests::utils::resource::{res_list, resource_with_attr};

    fn admin_exprs() -> (Expr, Expr) {
        // Requirements: machine attribute Preemptable is set; Rank: machine's Value
        let req = Expr::Cmp(CmpOp::Eq, Box::new(attr("Preemptable")), Box::new(lit(1i64)));
        let rank = attr("Value");
        (req, rank)
    }

    #[test]
    fn highest_rank_victim_wins() {
        let (req, rank) = admin_exprs();
        let a = resource_with_attr("busy1", &[("Preemptable", 1), ("Value", 5)]);
        let b = resource_with_attr("busy2", &[("Preemptable", 1), ("Value", 2)]);
        let mut busy = res_list(vec![a, b]);

        let cluster = cluster_with_procs(1, &[1]);
        let nodes = cluster.node_requests();

        let victims = select_victims(&nodes, &mut busy, &req, &rank).unwrap();
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].name, "busy1");
        assert_eq!(busy.len(), 1);
    }

    #[test]
    fn no_partial_preemption() {
        let (req, rank) = admin_exprs();
        let a = resource_with_attr("busy1", &[("Preemptable", 1), ("Value", 5)]);
        let mut busy = res_list(vec![a]);

        let cluster = cluster_with_procs(2, &[2]);
        let nodes = cluster.node_requests();

        assert!(select_victims(&nodes, &mut busy, &req, &rank).is_none());
        assert_eq!(busy.len(), 1);
    }

    #[test]
    fn victims_must_satisfy_the_job_too() {
        let (req, rank) = admin_exprs();
        // Preemptable by admin policy, but the job's own requirements reject it
        let a = resource_with_attr("busy1", &[("Preemptable", 1), ("Value", 5)]);
        let mut busy = res_list(vec![a]);

        let mut cluster = cluster_with_procs(1, &[1]);
        // Job requires machine attribute Fast == 1
        let proc = std::rc::Rc::get_mut(&mut cluster.procs[0]).unwrap();
        proc.requirements = Expr::Cmp(CmpOp::Eq, Box::new(attr("Fast")), Box::new(lit(1i64)));
        let nodes = cluster.node_requests();

        assert!(select_victims(&nodes, &mut busy, &req, &rank).is_none());
    }
}
