//! The replicated key-value layer.
//!
//! Every key lives on three nodes, picked from the [`NodeRing`](crate::cluster::NodeRing): the
//! first node at or after the key's ring position is the primary, the next two are the
//! secondary and tertiary. Clients fan each operation out to all three and call it a success
//! once two of them answer. Nothing reconciles diverging replicas; when the ring changes, every
//! node re-creates the keys it holds on their current owners (see [`Replication`]).

mod quorum;
mod replication;
mod store;

use crate::core::Address;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

#[rustfmt::skip]
pub use {
  quorum::PendingOp,
  quorum::PendingOps,
  quorum::Resolution,
  quorum::QUORUM,
  replication::Replication,
  replication::ReplicationConfig,
  store::HashTable,
  store::LocalStore,
  store::StoredRecord,
};

/// Position of a node within a key's replica set.
#[derive(
  Clone,
  Copy,
  Debug,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  IntoPrimitive,
  TryFromPrimitive,
)]
#[repr(u8)]
pub enum ReplicaRole {
  Primary = 0,
  Secondary = 1,
  Tertiary = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
  Create,
  Read,
  Update,
  Delete,
}

/// Names a client operation. Sequence numbers are local to `origin`, so the pair is unique
/// across the whole group.
#[derive(
  Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TxnId {
  pub origin: Address,
  pub seq: u64,
}
impl fmt::Display for TxnId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.origin, self.seq)
  }
}

#[test]
fn test_roles_follow_ring_order() {
  use std::convert::TryFrom;
  assert_eq!(ReplicaRole::try_from(0u8).unwrap(), ReplicaRole::Primary);
  assert_eq!(ReplicaRole::try_from(2u8).unwrap(), ReplicaRole::Tertiary);
  assert!(ReplicaRole::try_from(3u8).is_err());
  assert_eq!(u8::from(ReplicaRole::Secondary), 1);
}
