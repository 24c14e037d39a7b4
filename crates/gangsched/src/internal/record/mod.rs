pub mod expr;

pub use expr::{ArithOp, AttrValue, CmpOp, Expr};

use crate::internal::common::Map;
use serde::{Deserialize, Serialize};

// Job-side attributes
pub const ATTR_CLUSTER_ID: &str = "ClusterId";
pub const ATTR_PROC_ID: &str = "ProcId";
pub const ATTR_NODE_COUNT: &str = "NodeCount";
pub const ATTR_CURRENT_NODES: &str = "CurrentNodes";
pub const ATTR_REQUIREMENTS: &str = "Requirements";
pub const ATTR_RANK: &str = "Rank";
pub const ATTR_PRIORITY: &str = "Priority";
pub const ATTR_SUBMIT_TIME: &str = "SubmitTime";
pub const ATTR_SCHEDULER: &str = "Scheduler";
pub const ATTR_WANT_GROUPS: &str = "WantSchedulingGroups";
pub const ATTR_PREFER_GROUPS: &str = "PreferSchedulingGroup";

// Resource-side attributes
pub const ATTR_NAME: &str = "Name";
pub const ATTR_OWNER_ADDRESS: &str = "OwnerAddress";
pub const ATTR_STATE: &str = "State";
pub const ATTR_SCHEDULING_GROUP: &str = "SchedulingGroup";
pub const ATTR_DEDICATED_SCHEDULER: &str = "DedicatedScheduler";
pub const ATTR_REMOTE_OWNER: &str = "RemoteOwner";

/// A dynamically-typed record with named fields. Fields hold expressions;
/// a literal value is just a literal expression. Jobs and resources are
/// both represented this way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    attrs: Map<String, Expr>,
}

impl Record {
    pub fn assign<V: Into<AttrValue>>(&mut self, name: &str, value: V) {
        self.attrs.insert(name.to_string(), Expr::Lit(value.into()));
    }

    pub fn assign_expr(&mut self, name: &str, expr: Expr) {
        self.attrs.insert(name.to_string(), expr);
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<&Expr> {
        self.attrs.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Expr> {
        self.attrs.remove(name)
    }

    /// Evaluates the named attribute with this record as the primary scope.
    pub fn eval(&self, name: &str, target: Option<&Record>) -> AttrValue {
        match self.attrs.get(name) {
            Some(expr) => expr.eval(self, target),
            None => AttrValue::Undefined,
        }
    }

    pub fn lookup_bool(&self, name: &str) -> Option<bool> {
        self.eval(name, None).as_bool()
    }

    pub fn lookup_i64(&self, name: &str) -> Option<i64> {
        self.eval(name, None).as_i64()
    }

    pub fn lookup_u32(&self, name: &str) -> Option<u32> {
        self.lookup_i64(name).and_then(|v| u32::try_from(v).ok())
    }

    pub fn lookup_f64(&self, name: &str) -> Option<f64> {
        self.eval(name, None).as_f64()
    }

    pub fn lookup_str(&self, name: &str) -> Option<String> {
        match self.eval(name, None) {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(|k| k.as_str())
    }
}

/// Evaluates a requirements-style expression; undefined counts as false.
pub fn eval_req(expr: &Expr, my: &Record, target: Option<&Record>) -> bool {
    expr.eval(my, target).as_bool().unwrap_or(false)
}

/// Evaluates a rank-style expression to a float; non-numeric results are `None`.
pub fn eval_rank(expr: &Expr, my: &Record, target: Option<&Record>) -> Option<f64> {
    expr.eval(my, target).as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::record::expr::{attr, lit, target_attr};

    #[test]
    fn undefined_requirements_is_false() {
        let job = Record::default();
        let machine = Record::default();
        assert!(!eval_req(&attr("NoSuchAttr"), &job, Some(&machine)));
    }

    #[test]
    fn requirements_against_target() {
        let mut job = Record::default();
        job.assign("WantMemory", 8i64);
        let mut machine = Record::default();
        machine.assign("Memory", 16i64);

        let req = Expr::Cmp(
            CmpOp::Ge,
            Box::new(target_attr("Memory")),
            Box::new(attr("WantMemory")),
        );
        assert!(eval_req(&req, &job, Some(&machine)));

        machine.assign("Memory", 4i64);
        assert!(!eval_req(&req, &job, Some(&machine)));
    }

    #[test]
    fn rank_defaults_to_undefined() {
        let job = Record::default();
        assert_eq!(eval_rank(&attr("Rank"), &job, None), None);
        assert_eq!(eval_rank(&lit(2.5f64), &job, None), Some(2.5));
    }

    #[test]
    fn attr_reference_chases_record_exprs() {
        let mut machine = Record::default();
        machine.assign("Cpus", 8i64);
        machine.assign_expr(
            "BigSlot",
            Expr::Cmp(CmpOp::Gt, Box::new(attr("Cpus")), Box::new(lit(4i64))),
        );
        assert_eq!(machine.eval("BigSlot", None), AttrValue::Bool(true));
    }
}
