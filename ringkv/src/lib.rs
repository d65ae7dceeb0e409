//! A group of nodes that together behave as one replicated key-value store over an unreliable
//! network.
//!
//! Membership is kept by gossip: nodes join through an introducer, spread heartbeats to random
//! peers and evict whoever stops sending them (see [`cluster`]). The members are hashed onto a
//! ring, every key is stored on three consecutive ring members, and each client operation
//! succeeds once two of them answer (see [`kv`]). When the ring changes, keys are re-created on
//! their new owners.
//!
//! [`core::Node`] runs both protocols for one process. [`testkit`] runs many of them against an
//! emulated network.

pub mod cluster;
pub mod console;
pub mod core;
pub mod kv;
pub mod testkit;
