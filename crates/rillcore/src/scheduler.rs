use crate::fei::Fei;
use std::time::Duration;

/// Token identifying a scheduled wake-up.
pub type JobId = String;

/// Timed wake-ups for expression timeouts
///
/// `schedule` arranges for a timeout-flavoured cancel to be routed to `fei`
/// after `delay`; `unschedule` revokes it (a normal reply arriving first
/// does this).
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, fei: Fei) -> JobId;
    fn unschedule(&self, job: &JobId);
}
