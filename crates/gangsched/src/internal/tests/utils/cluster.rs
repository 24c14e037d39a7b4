use crate::internal::common::ids::ClusterId;
use crate::internal::record::expr::lit;
use crate::internal::record::{
    ATTR_CLUSTER_ID, ATTR_NODE_COUNT, ATTR_PREFER_GROUPS, ATTR_PRIORITY, ATTR_PROC_ID, ATTR_RANK,
    ATTR_REQUIREMENTS, ATTR_SUBMIT_TIME, ATTR_WANT_GROUPS, Expr, Record,
};
use crate::internal::server::cluster::JobCluster;
use crate::Priority;

pub struct ProcDef {
    nodes: u32,
    requirements: Expr,
    rank: Option<Expr>,
    extra: Vec<(String, i64)>,
}

pub struct ClusterBuilder {
    id: u32,
    procs: Vec<ProcDef>,
    priority: Priority,
    submit_time: u64,
    want_groups: bool,
    prefer_groups: bool,
}

impl ClusterBuilder {
    pub fn new(id: u32) -> Self {
        ClusterBuilder {
            id,
            procs: Vec::new(),
            priority: 0,
            submit_time: 0,
            want_groups: false,
            prefer_groups: false,
        }
    }

    /// Adds a proc with the given node count and always-true requirements.
    pub fn proc(mut self, nodes: u32) -> Self {
        self.procs.push(ProcDef {
            nodes,
            requirements: lit(true),
            rank: None,
            extra: Vec::new(),
        });
        self
    }

    pub fn proc_with_req(mut self, nodes: u32, requirements: Expr) -> Self {
        self.procs.push(ProcDef {
            nodes,
            requirements,
            rank: None,
            extra: Vec::new(),
        });
        self
    }

    /// Sets the Rank expression of the last added proc.
    pub fn rank(mut self, rank: Expr) -> Self {
        self.procs.last_mut().unwrap().rank = Some(rank);
        self
    }

    pub fn attr(mut self, name: &str, value: i64) -> Self {
        self.procs
            .last_mut()
            .unwrap()
            .extra
            .push((name.to_string(), value));
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn submitted_at(mut self, submit_time: u64) -> Self {
        self.submit_time = submit_time;
        self
    }

    pub fn want_groups(mut self) -> Self {
        self.want_groups = true;
        self
    }

    pub fn prefer_groups(mut self) -> Self {
        self.want_groups = true;
        self.prefer_groups = true;
        self
    }

    pub fn build(self) -> JobCluster {
        assert!(!self.procs.is_empty());
        let records = self
            .procs
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let mut record = Record::default();
                record.assign(ATTR_CLUSTER_ID, self.id);
                record.assign(ATTR_PROC_ID, i as u32);
                record.assign(ATTR_NODE_COUNT, def.nodes);
                record.assign_expr(ATTR_REQUIREMENTS, def.requirements.clone());
                if let Some(rank) = &def.rank {
                    record.assign_expr(ATTR_RANK, rank.clone());
                }
                if i == 0 {
                    record.assign(ATTR_PRIORITY, self.priority as i64);
                    record.assign(ATTR_SUBMIT_TIME, self.submit_time as i64);
                    record.assign(ATTR_WANT_GROUPS, self.want_groups);
                    record.assign(ATTR_PREFER_GROUPS, self.prefer_groups);
                }
                for (name, value) in &def.extra {
                    record.assign(name, *value);
                }
                record
            })
            .collect();
        JobCluster::from_records(ClusterId::new(self.id), records).unwrap()
    }
}

/// Cluster with always-true requirements and the given node count per proc.
pub fn cluster_with_procs(id: u32, nodes: &[u32]) -> JobCluster {
    let mut builder = ClusterBuilder::new(id);
    for &n in nodes {
        builder = builder.proc(n);
    }
    builder.build()
}
