//! I/O seams: clock, environment, events, jitter, configuration and journal.

pub mod clock;
pub mod config;
pub mod environment;
pub mod events;
pub mod jitter;
pub mod tick_log;
