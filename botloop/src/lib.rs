//! Cooperative, single-threaded tick scheduler for game-automation scripts.
//!
//! A script is a phase state machine whose phases own prioritized, guarded
//! tasks, plus a set of interrupts that preempt any phase. The [`scheduler`]
//! runs exactly one action per tick against an [`io::environment::Environment`].
//!
//! - **[`core`]**: Pure, deterministic logic (ordering, triggers, streaks,
//!   time budgets). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting seams (clock, environment, events, jitter,
//!   configuration, tick journal). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`scheduler`], [`looping`]) coordinate scripts with
//! those seams; [`scripts`] holds the bundled scripts.

pub mod context;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod machine;
pub mod scheduler;
pub mod script;
pub mod scripts;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wait;
