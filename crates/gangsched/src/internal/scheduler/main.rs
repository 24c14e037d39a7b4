use crate::internal::messages::matchmaker::DemandMsg;
use crate::internal::scheduler::planner::compute_schedule;
use crate::internal::server::coalesce;
use crate::internal::server::comm::{Comm, CommSenderRef};
use crate::internal::server::core::{Core, CoreRef};
use crate::internal::server::executor::spawn_allocations;
use crate::internal::server::pool::ResourcePool;
use crate::internal::server::reactor::{
    check_idle_claims, preempt_resources, send_alives,
};
use crate::internal::server::recovery::check_reconnect_queue;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;

/// One full scheduling pass plus the periodic maintenance that hangs off
/// it: reconnects, executor spawns, demand publication, preemption, the
/// idle-claim sweep and keepalives.
pub(crate) fn run_scheduling(core: &mut Core, comm: &mut impl Comm, now: Instant) {
    log::debug!("Starting scheduling pass");
    check_reconnect_queue(core, now);

    let snapshot = core.resource_snapshot().to_vec();
    let mut pool = ResourcePool::classify(&snapshot, core.claims());
    compute_schedule(core, &mut pool);

    spawn_allocations(core, comm, now);
    request_resources(core, comm);
    preempt_resources(core, comm);
    coalesce::check_deadlines(core, comm, now);
    check_idle_claims(core, comm, now);
    send_alives(core, comm, now);
    log::debug!("Finished scheduling pass");
}

/// Publishes how many negotiation requests are waiting. Sent even when
/// zero, so the matchmaker learns we are satisfied.
fn request_resources(core: &Core, comm: &mut impl Comm) {
    comm.publish_demand(DemandMsg {
        scheduler: core.config().scheduler_name.clone(),
        pending_requests: core.requests().len() as u32,
    });
}

/// The reactor's scheduling driver: waits for a wakeup or the nearest
/// maintenance deadline, rate-limits passes by `minimum_delay`, then runs
/// one pass with exclusive access to the Core.
pub async fn scheduler_loop(
    core_ref: CoreRef,
    comm_ref: CommSenderRef,
    scheduler_wakeup: Rc<Notify>,
    minimum_delay: Duration,
) {
    let mut last_schedule: Option<Instant> = None;
    loop {
        let deadline = core_ref.get().next_wakeup(Instant::now());
        match deadline {
            Some(when) => {
                tokio::select! {
                    _ = scheduler_wakeup.notified() => {}
                    _ = tokio::time::sleep_until(when.into()) => {}
                }
            }
            None => scheduler_wakeup.notified().await,
        }
        if let Some(last) = last_schedule {
            let since = last.elapsed();
            if since < minimum_delay {
                sleep(minimum_delay - since).await;
            }
        }
        let mut comm = comm_ref.get_mut();
        let mut core = core_ref.get_mut();
        run_scheduling(&mut core, &mut *comm, Instant::now());
        comm.reset_scheduling_flag();
        last_schedule = Some(Instant::now());
    }
}
