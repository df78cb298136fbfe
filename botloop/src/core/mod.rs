//! Deterministic, pure logic shared by the scheduler.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and explicit instants and return deterministic outputs suitable for tests.

pub mod budget;
pub mod failures;
pub mod selector;
pub mod trigger;
pub mod types;
