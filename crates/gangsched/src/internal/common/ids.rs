use crate::define_id_type;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

define_id_type!(ClusterId, u32);
define_id_type!(ProcId, u32);

/// Identifies one proc (node class) of a parallel job cluster.
#[derive(Default, Copy, Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcRef {
    cluster_id: ClusterId,
    proc_id: ProcId,
}

impl Display for ProcRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cluster_id, self.proc_id)
    }
}

impl Debug for ProcRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl ProcRef {
    #[inline]
    pub fn new(cluster_id: ClusterId, proc_id: ProcId) -> Self {
        Self {
            cluster_id,
            proc_id,
        }
    }

    #[inline]
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    #[inline]
    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }
}

/// Opaque lease token handed out by the matchmaker or a resource owner.
/// Tokens are globally unique; equality on the full token string.
#[derive(Clone, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimToken(Arc<str>);

impl ClaimToken {
    pub fn new<S: Into<Arc<str>>>(token: S) -> Self {
        ClaimToken(token.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClaimToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for ClaimToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "claim({})", &self.0)
    }
}

impl From<&str> for ClaimToken {
    fn from(value: &str) -> Self {
        ClaimToken::new(value)
    }
}
