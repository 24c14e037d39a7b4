use crate::internal::record::Record;
use serde::{Deserialize, Serialize};

/// Attribute references may chase chains of record expressions; cycles are cut
/// off at this depth and evaluate to Undefined.
const MAX_EVAL_DEPTH: u32 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, AttrValue::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}
impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}
impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(v as i64)
    }
}
impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}
impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}
impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Meta equality: total over values, Undefined is Undefined.
    Is,
    IsNot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Expression tree evaluated against a primary record and an optional
/// context ("target") record. Logic is three-valued: Undefined propagates
/// except where And/Or can already decide the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(AttrValue),
    /// Unqualified reference: primary scope first, then target.
    Attr(String),
    /// Reference into the context record.
    Target(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
}

pub fn lit<V: Into<AttrValue>>(value: V) -> Expr {
    Expr::Lit(value.into())
}

pub fn attr(name: &str) -> Expr {
    Expr::Attr(name.to_string())
}

pub fn target_attr(name: &str) -> Expr {
    Expr::Target(name.to_string())
}

impl Expr {
    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    pub fn eval(&self, my: &Record, target: Option<&Record>) -> AttrValue {
        self.eval_at(my, target, 0)
    }

    fn eval_at(&self, my: &Record, target: Option<&Record>, depth: u32) -> AttrValue {
        if depth > MAX_EVAL_DEPTH {
            log::debug!("Expression evaluation exceeded depth limit");
            return AttrValue::Undefined;
        }
        match self {
            Expr::Lit(value) => value.clone(),
            Expr::Attr(name) => {
                if let Some(expr) = my.lookup(name) {
                    expr.eval_at(my, target, depth + 1)
                } else {
                    // Fall through into the target scope; references found
                    // there evaluate with the scopes swapped.
                    match target {
                        Some(t) => match t.lookup(name) {
                            Some(expr) => expr.eval_at(t, Some(my), depth + 1),
                            None => AttrValue::Undefined,
                        },
                        None => AttrValue::Undefined,
                    }
                }
            }
            Expr::Target(name) => match target {
                Some(t) => match t.lookup(name) {
                    Some(expr) => expr.eval_at(t, Some(my), depth + 1),
                    None => AttrValue::Undefined,
                },
                None => AttrValue::Undefined,
            },
            Expr::Not(inner) => match inner.eval_at(my, target, depth + 1) {
                AttrValue::Bool(v) => AttrValue::Bool(!v),
                _ => AttrValue::Undefined,
            },
            Expr::And(a, b) => {
                let lhs = a.eval_at(my, target, depth + 1);
                if lhs == AttrValue::Bool(false) {
                    return AttrValue::Bool(false);
                }
                let rhs = b.eval_at(my, target, depth + 1);
                if rhs == AttrValue::Bool(false) {
                    return AttrValue::Bool(false);
                }
                match (lhs.as_bool(), rhs.as_bool()) {
                    (Some(true), Some(true)) => AttrValue::Bool(true),
                    _ => AttrValue::Undefined,
                }
            }
            Expr::Or(a, b) => {
                let lhs = a.eval_at(my, target, depth + 1);
                if lhs == AttrValue::Bool(true) {
                    return AttrValue::Bool(true);
                }
                let rhs = b.eval_at(my, target, depth + 1);
                if rhs == AttrValue::Bool(true) {
                    return AttrValue::Bool(true);
                }
                match (lhs.as_bool(), rhs.as_bool()) {
                    (Some(false), Some(false)) => AttrValue::Bool(false),
                    _ => AttrValue::Undefined,
                }
            }
            Expr::Cmp(op, a, b) => {
                let lhs = a.eval_at(my, target, depth + 1);
                let rhs = b.eval_at(my, target, depth + 1);
                eval_cmp(*op, &lhs, &rhs)
            }
            Expr::Arith(op, a, b) => {
                let lhs = a.eval_at(my, target, depth + 1);
                let rhs = b.eval_at(my, target, depth + 1);
                eval_arith(*op, &lhs, &rhs)
            }
        }
    }
}

fn values_identical(lhs: &AttrValue, rhs: &AttrValue) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    }
}

fn eval_cmp(op: CmpOp, lhs: &AttrValue, rhs: &AttrValue) -> AttrValue {
    match op {
        CmpOp::Is => return AttrValue::Bool(values_identical(lhs, rhs)),
        CmpOp::IsNot => return AttrValue::Bool(!values_identical(lhs, rhs)),
        _ => {}
    }
    if lhs.is_undefined() || rhs.is_undefined() {
        return AttrValue::Undefined;
    }
    let ord = match (lhs, rhs) {
        (AttrValue::Str(a), AttrValue::Str(b)) => a.cmp(b),
        (AttrValue::Bool(a), AttrValue::Bool(b)) => a.cmp(b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => match a.partial_cmp(&b) {
                Some(ord) => ord,
                None => return AttrValue::Undefined,
            },
            _ => return AttrValue::Undefined,
        },
    };
    let result = match op {
        CmpOp::Eq => ord.is_eq(),
        CmpOp::Ne => ord.is_ne(),
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Le => ord.is_le(),
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Ge => ord.is_ge(),
        CmpOp::Is | CmpOp::IsNot => unreachable!(),
    };
    AttrValue::Bool(result)
}

fn eval_arith(op: ArithOp, lhs: &AttrValue, rhs: &AttrValue) -> AttrValue {
    // Integer arithmetic stays integral; anything else promotes to float.
    if let (AttrValue::Int(a), AttrValue::Int(b)) = (lhs, rhs) {
        return match op {
            ArithOp::Add => AttrValue::Int(a.wrapping_add(*b)),
            ArithOp::Sub => AttrValue::Int(a.wrapping_sub(*b)),
            ArithOp::Mul => AttrValue::Int(a.wrapping_mul(*b)),
            ArithOp::Div => {
                if *b == 0 {
                    AttrValue::Undefined
                } else {
                    AttrValue::Int(a / b)
                }
            }
        };
    }
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => match op {
            ArithOp::Add => AttrValue::Float(a + b),
            ArithOp::Sub => AttrValue::Float(a - b),
            ArithOp::Mul => AttrValue::Float(a * b),
            ArithOp::Div => {
                if b == 0.0 {
                    AttrValue::Undefined
                } else {
                    AttrValue::Float(a / b)
                }
            }
        },
        _ => AttrValue::Undefined,
    }
}
