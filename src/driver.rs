//! The callback driver thread (component C5).
//!
//! Exactly one OS thread is spawned per stream opened in callback mode, living from
//! `open` until `close`. It blocks on the stream's condition variable while `Stopped`,
//! ticks continuously while `Running`, and drains queued output while `Stopping`
//! before transitioning itself back to `Stopped` (`spec.md` §4.5).

use std::thread::{self, JoinHandle};

use crate::options::StreamOptionFlags;
use crate::stream::{CallbackAction, StreamCore};
use std::sync::Arc;

/// Spawns the driver thread for `core`. The returned handle is joined by
/// [`crate::stream::Stream::close`].
pub(crate) fn spawn(core: Arc<StreamCore>, priority: Option<i32>, flags: StreamOptionFlags) -> JoinHandle<()> {
    thread::Builder::new()
        .name("rtstream-driver".to_string())
        .spawn(move || {
            if flags.contains(StreamOptionFlags::SCHEDULE_REALTIME) {
                apply_realtime_priority(priority);
            }
            run(&core);
        })
        .expect("failed to spawn the stream driver thread")
}

fn run(core: &StreamCore) {
    loop {
        if !core.wait_until_active() {
            return;
        }
        if core.is_stopping() {
            if let Err(err) = core.drive_drain_step() {
                crate::error::report(err.kind(), err.message());
                core.abort_now();
            }
            continue;
        }
        match core.drive_tick() {
            Ok(CallbackAction::Continue) => {}
            Ok(CallbackAction::Complete) => core.begin_drain(),
            Ok(CallbackAction::Abort) => core.abort_now(),
            Err(err) => {
                crate::error::report(err.kind(), err.message());
                core.abort_now();
            }
        }
    }
}

/// Clamps `priority` to the platform's legal realtime range and applies it to the
/// calling (driver) thread. Best-effort: a failure to elevate scheduling is reported
/// as a warning rather than aborting the stream, since audio can still play (with a
/// higher chance of underflow) at the default scheduling class.
#[cfg(unix)]
fn apply_realtime_priority(priority: Option<i32>) {
    unsafe {
        let policy = libc::SCHED_FIFO;
        let min = libc::sched_get_priority_min(policy);
        let max = libc::sched_get_priority_max(policy);
        if min < 0 || max < 0 {
            crate::error::warn_noop("could not query realtime scheduling priority range");
            return;
        }
        let wanted = priority.unwrap_or(max);
        let clamped = wanted.clamp(min, max);
        let param = libc::sched_param { sched_priority: clamped };
        if libc::pthread_setschedparam(libc::pthread_self(), policy, &param) != 0 {
            crate::error::warn_noop("failed to set realtime scheduling priority for the driver thread");
        }
    }
}

#[cfg(not(unix))]
fn apply_realtime_priority(_priority: Option<i32>) {
    crate::error::warn_noop("realtime scheduling is not implemented for this platform");
}
