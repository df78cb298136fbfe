//! Stable exit codes for the botloop CLI and embedding hosts.

use crate::looping::LoopStop;

/// Command succeeded, or the loop stopped cleanly on request.
pub const OK: i32 = 0;
/// Invalid config, script definition or other errors.
pub const INVALID: i32 = 1;
/// The loop hit its tick limit, or was stopped while not safe to stop.
pub const INCOMPLETE: i32 = 2;
/// The loop ended in a fatal stop.
pub const FATAL: i32 = 3;

/// Exit code for a finished loop.
pub fn for_stop(stop: &LoopStop) -> i32 {
    match stop {
        LoopStop::Requested { clean: true } => OK,
        LoopStop::Requested { clean: false } | LoopStop::MaxTicks { .. } => INCOMPLETE,
        LoopStop::Fatal(_) => FATAL,
    }
}
