use crate::internal::common::ids::{ClusterId, ProcId, ProcRef};
use crate::internal::record::{
    ATTR_CLUSTER_ID, ATTR_NODE_COUNT, ATTR_PREFER_GROUPS, ATTR_RANK, ATTR_REQUIREMENTS,
    ATTR_PRIORITY, ATTR_SUBMIT_TIME, ATTR_WANT_GROUPS, Expr, Record,
};
use crate::Priority;
use std::rc::Rc;

/// One node class of a parallel job: every node of the proc shares the same
/// requirements, rank and record.
pub struct JobProc {
    pub id: ProcRef,
    pub node_count: u32,
    pub requirements: Expr,
    pub rank: Option<Expr>,
    pub record: Record,
}

impl JobProc {
    pub fn from_record(id: ProcRef, record: Record) -> crate::Result<JobProc> {
        let node_count = record
            .lookup_u32(ATTR_NODE_COUNT)
            .ok_or_else(|| format!("Proc {id} without {ATTR_NODE_COUNT}"))?;
        let requirements = record
            .lookup(ATTR_REQUIREMENTS)
            .cloned()
            .ok_or_else(|| format!("Proc {id} without {ATTR_REQUIREMENTS}"))?;
        let rank = record.lookup(ATTR_RANK).cloned();
        Ok(JobProc {
            id,
            node_count,
            requirements,
            rank,
            record,
        })
    }
}

/// A submitted parallel job. All procs of one cluster are allocated
/// atomically: either every required node across every proc is bound, or
/// none are.
pub struct JobCluster {
    pub id: ClusterId,
    pub procs: Vec<Rc<JobProc>>,
    pub priority: Priority,
    pub submit_time: u64,
    pub want_groups: bool,
    pub prefer_groups: bool,
}

impl JobCluster {
    /// Builds a cluster from one record per proc, in proc order. Priority,
    /// submit time and group flags are read from proc 0.
    pub fn from_records(id: ClusterId, proc_records: Vec<Record>) -> crate::Result<JobCluster> {
        if proc_records.is_empty() {
            return Err(format!("Cluster {id} has no procs").into());
        }
        let head = &proc_records[0];
        if let Some(rec_id) = head.lookup_u32(ATTR_CLUSTER_ID) {
            if ClusterId::new(rec_id) != id {
                return Err(format!("Cluster {id} record claims id {rec_id}").into());
            }
        }
        let priority = head
            .lookup_i64(ATTR_PRIORITY)
            .map(|p| p as Priority)
            .unwrap_or(0);
        let submit_time = head.lookup_i64(ATTR_SUBMIT_TIME).unwrap_or(0) as u64;
        let want_groups = head.lookup_bool(ATTR_WANT_GROUPS).unwrap_or(false);
        let prefer_groups = head.lookup_bool(ATTR_PREFER_GROUPS).unwrap_or(false);

        let procs = proc_records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                JobProc::from_record(ProcRef::new(id, ProcId::new(i as u32)), record).map(Rc::new)
            })
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(JobCluster {
            id,
            procs,
            priority,
            submit_time,
            want_groups,
            prefer_groups,
        })
    }

    pub fn total_nodes(&self) -> u32 {
        self.procs.iter().map(|p| p.node_count).sum()
    }

    /// The flat per-node request list: one entry per required node, proc
    /// order, repeating the proc for each of its nodes.
    pub fn node_requests(&self) -> Vec<Rc<JobProc>> {
        let mut nodes = Vec::with_capacity(self.total_nodes() as usize);
        for proc in &self.procs {
            for _ in 0..proc.node_count {
                nodes.push(proc.clone());
            }
        }
        nodes
    }

    pub fn find_proc(&self, proc_id: ProcId) -> Option<&Rc<JobProc>> {
        self.procs.get(proc_id.as_num() as usize)
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::tests::utils::cluster::cluster_with_procs;

    #[test]
    fn node_request_list_repeats_procs() {
        let cluster = cluster_with_procs(3, &[2, 1]);
        let nodes = cluster.node_requests();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].id, nodes[1].id);
        assert_ne!(nodes[1].id, nodes[2].id);
        assert_eq!(cluster.total_nodes(), 3);
    }
}
