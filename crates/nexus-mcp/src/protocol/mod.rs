//! Protocol implementation.
//!
//! JSON-RPC 2.0 over stdio. Framing is line-delimited; one request per
//! line in, one response per line out.

pub mod messages;
pub mod stdio;
pub mod types;
