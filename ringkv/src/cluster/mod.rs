//! Group membership and failure detection.
//!
//! Every node keeps a [`MembershipTable`]: one row per known node holding the heartbeat that node
//! last reported and the local heartbeat at which that report arrived. Nodes join by asking a
//! well-known introducer, which answers with its table. From then on each node gossips its table
//! to a few random peers every tick and merges whatever tables it receives.
//!
//! ### Failure Detection
//! A node that keeps running keeps bumping its heartbeat, and gossip carries the new value around
//! the group. A row whose heartbeat has not moved for `t_fail` ticks is suspected: it is no longer
//! gossiped, and second-hand reports cannot refresh it. After `t_remove` ticks it is evicted.
//! There is no explicit leave message; a node that stops simply ages out everywhere.
//!
//! ### The Ring
//! The members are hashed onto a [`NodeRing`], which the key-value layer uses to place keys.
//! Two nodes with the same members always build the same ring.

mod gossip;
mod membership;
mod node_ring;
mod utils;

#[rustfmt::skip]
pub use {
  gossip::Gossip,
  gossip::GossipEntry,
  gossip::MembershipTable,
  membership::Membership,
  node_ring::NodeRing,
  node_ring::RingNode,
  node_ring::REPLICAS,
  utils::ClusterConfig,
  utils::ClusterEvent,
  utils::ConfigError,
  utils::MemberState,
  utils::MembershipEntry,
  utils::DEFAULT_INTRODUCER,
};
