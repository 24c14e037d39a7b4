use crate::internal::common::ids::{ClaimToken, ProcRef};
use crate::internal::server::resource::ResourceRecord;
use std::time::{Duration, Instant};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClaimStatus {
    Unclaimed,
    /// The asynchronous claim protocol against the resource owner is running.
    ContactPending,
    Claimed,
    Active,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClaimFlags: u32 {
        /// Reserved by the current schedule for a pending allocation.
        const SCHEDULED = 0b00000001;
        /// Bound into an allocation node.
        const ALLOCATED = 0b00000010;
    }
}

/// Exclusive lease on one resource. Status transitions are owned by the
/// reactor; everything else reads.
pub struct Claim {
    pub token: ClaimToken,
    pub owner_addr: String,
    pub resource: ResourceRecord,
    status: ClaimStatus,
    /// Proc this claim is serving, if bound into an allocation.
    pub assigned: Option<ProcRef>,
    flags: ClaimFlags,
    status_entered: Instant,
}

impl Claim {
    pub fn new(
        token: ClaimToken,
        resource: ResourceRecord,
        status: ClaimStatus,
        now: Instant,
    ) -> Self {
        log::debug!("New claim {} on {} ({:?})", token, resource.name, status);
        Claim {
            token,
            owner_addr: resource.owner_addr.clone(),
            resource,
            status,
            assigned: None,
            flags: ClaimFlags::empty(),
            status_entered: now,
        }
    }

    #[inline]
    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    /// Every status change resets the entry timestamp used for idle-timeout
    /// accounting.
    pub fn set_status(&mut self, status: ClaimStatus, now: Instant) {
        if self.status != status {
            log::debug!("Claim {}: {:?} -> {:?}", self.token, self.status, status);
            self.status = status;
            self.status_entered = now;
        }
    }

    #[inline]
    pub fn status_entered(&self) -> Instant {
        self.status_entered
    }

    #[inline]
    pub fn is_scheduled(&self) -> bool {
        self.flags.contains(ClaimFlags::SCHEDULED)
    }

    #[inline]
    pub fn set_scheduled(&mut self, value: bool) {
        self.flags.set(ClaimFlags::SCHEDULED, value);
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.flags.contains(ClaimFlags::ALLOCATED)
    }

    #[inline]
    pub fn set_allocated(&mut self, value: bool) {
        self.flags.set(ClaimFlags::ALLOCATED, value);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.resource.name
    }

    /// How long this claim has been leased but idle. Claims that are in use,
    /// reserved, or still in flight never accumulate unused time.
    pub fn unused_time(&self, now: Instant) -> Option<Duration> {
        if self.is_scheduled() || self.is_allocated() {
            return None;
        }
        match self.status {
            ClaimStatus::Claimed => Some(now.saturating_duration_since(self.status_entered)),
            ClaimStatus::Unclaimed | ClaimStatus::ContactPending | ClaimStatus::Active => None,
        }
    }
}
