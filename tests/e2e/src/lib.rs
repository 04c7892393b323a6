//! End-to-end test support for the Nexus memory engine.

pub mod fixtures;
