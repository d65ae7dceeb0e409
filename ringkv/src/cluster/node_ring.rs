use crate::core::Address;
use itertools::Itertools;
use smallvec::SmallVec;
use std::hash::{Hash, Hasher};
use wyhash::WyHash;

/// Number of nodes holding each key.
pub const REPLICAS: usize = 3;

/// A member placed on the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RingNode {
  pub addr: Address,
  pub position: u64,
}

/// Member addresses hashed onto `[0, ring_size)` and sorted by position. Two positions that
/// collide are ordered by address, so every node with the same members builds the same ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRing {
  ring: Vec<RingNode>,
  ring_size: u64,
}
impl NodeRing {
  pub fn new(ring_size: u64) -> NodeRing {
    NodeRing {
      ring: Vec::new(),
      ring_size: ring_size,
    }
  }

  pub fn from_members<'a, I>(ring_size: u64, members: I) -> NodeRing
  where
    I: IntoIterator<Item = &'a Address>,
  {
    let ring = members
      .into_iter()
      .unique()
      .map(|addr| RingNode {
        addr: *addr,
        position: position(addr, ring_size),
      })
      .sorted_by_key(|n| (n.position, n.addr))
      .collect();
    NodeRing { ring, ring_size }
  }

  /// Replaces the ring with one built from `members`. Returns true if the sequence of addresses
  /// around the ring changed.
  pub fn rebuild<'a, I>(&mut self, members: I) -> bool
  where
    I: IntoIterator<Item = &'a Address>,
  {
    let next = NodeRing::from_members(self.ring_size, members);
    let changed = self.ring.len() != next.ring.len()
      || self.ring.iter().zip(next.ring.iter()).any(|(a, b)| a.addr != b.addr);
    *self = next;
    changed
  }

  pub fn nodes(&self) -> &[RingNode] {
    &self.ring
  }

  pub fn len(&self) -> usize {
    self.ring.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ring.is_empty()
  }

  /// Where `key` lands on the ring.
  pub fn key_position(&self, key: &str) -> u64 {
    position(key, self.ring_size)
  }

  /// The primary, secondary and tertiary holders of `key`, in that order. Empty while the ring
  /// has fewer than three members.
  pub fn find_replicas(&self, key: &str) -> SmallVec<[RingNode; REPLICAS]> {
    let mut replicas = SmallVec::new();
    let n = self.ring.len();
    if n < REPLICAS {
      return replicas;
    }
    let pos = self.key_position(key);
    let first = self.ring[0].position;
    let last = self.ring[n - 1].position;
    let primary = if pos <= first || pos > last {
      0
    } else {
      match self.ring.iter().position(|node| pos <= node.position) {
        Some(i) => i,
        None => 0,
      }
    };
    for i in 0..REPLICAS {
      replicas.push(self.ring[(primary + i) % n]);
    }
    replicas
  }

  pub fn is_replica(&self, key: &str, addr: &Address) -> bool {
    self.find_replicas(key).iter().any(|n| &n.addr == addr)
  }
}

fn hash_code<H: Hash + ?Sized>(item: &H) -> u64 {
  let mut hasher = WyHash::with_seed(0);
  item.hash(&mut hasher);
  hasher.finish()
}

fn position<H: Hash + ?Sized>(item: &H, ring_size: u64) -> u64 {
  hash_code(item) % ring_size
}

#[cfg(test)]
fn members(n: u32) -> Vec<Address> {
  (1..=n).map(|id| Address::new(id, 0)).collect()
}

#[test]
fn test_ring_is_sorted_and_deterministic() {
  let mut forward = members(10);
  let a = NodeRing::from_members(512, forward.iter());
  forward.reverse();
  let b = NodeRing::from_members(512, forward.iter());
  assert_eq!(a, b);
  assert_eq!(a.len(), 10);
  assert!(a
    .nodes()
    .windows(2)
    .all(|w| (w[0].position, w[0].addr) <= (w[1].position, w[1].addr)));
  assert!(a.nodes().iter().all(|n| n.position < 512));
}

#[test]
fn test_collisions_ordered_by_address() {
  // a ring of size one puts everybody at position zero
  let addrs = vec![Address::new(3, 0), Address::new(1, 0), Address::new(2, 0)];
  let ring = NodeRing::from_members(1, addrs.iter());
  let order = ring.nodes().iter().map(|n| n.addr.id).collect::<Vec<_>>();
  assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn test_no_replicas_below_three_members() {
  let ring = NodeRing::from_members(512, members(2).iter());
  assert!(ring.find_replicas("k").is_empty());
  assert!(NodeRing::new(512).find_replicas("k").is_empty());
}

#[test]
fn test_replica_placement() {
  let ring = NodeRing::from_members(512, members(8).iter());
  let nodes = ring.nodes().to_vec();
  let n = nodes.len();
  for k in 0..500 {
    let key = format!("key-{}", k);
    let pos = ring.key_position(&key);
    let replicas = ring.find_replicas(&key);
    assert_eq!(replicas.len(), 3);
    assert_eq!(replicas.iter().map(|r| r.addr).unique().count(), 3);
    let expected = if pos <= nodes[0].position || pos > nodes[n - 1].position {
      0
    } else {
      (1..n)
        .find(|&i| nodes[i - 1].position < pos && pos <= nodes[i].position)
        .unwrap()
    };
    for (j, r) in replicas.iter().enumerate() {
      assert_eq!(*r, nodes[(expected + j) % n], "key {} at {}", key, pos);
    }
  }
}

#[test]
fn test_rebuild_detects_changes() {
  let mut ring = NodeRing::new(512);
  let five = members(5);
  assert!(ring.rebuild(five.iter()));
  assert!(!ring.rebuild(five.iter().rev()));
  assert!(ring.rebuild(five[..4].iter()));
  let mut swapped = five[..4].to_vec();
  swapped[0] = Address::new(99, 0);
  assert!(ring.rebuild(swapped.iter()));
  assert!(ring.is_replica("anything", &ring.find_replicas("anything")[0].addr));
}
