//! Property-based tests for lane serialization and draining

mod drain_counter;
