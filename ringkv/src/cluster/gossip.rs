use crate::cluster::{ClusterEvent, MembershipEntry};
use crate::core::Address;
use serde::{Deserialize, Serialize};

/// One row of a gossiped membership table. Local timestamps are never sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEntry {
  pub addr: Address,
  pub heartbeat: u64,
}

/// A membership table in flight, carried by join replies and gossip rounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gossip {
  pub from: Address,
  pub heartbeat: u64,
  pub entries: Vec<GossipEntry>,
}

/// A node's view of the group: one entry per known address, including its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipTable {
  entries: im::OrdMap<Address, MembershipEntry>,
}
impl MembershipTable {
  pub fn new(local: Address, heartbeat: u64) -> MembershipTable {
    let mut entries = im::OrdMap::new();
    entries.insert(local, MembershipEntry::new(local, heartbeat, heartbeat));
    MembershipTable { entries }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn contains(&self, addr: &Address) -> bool {
    self.entries.contains_key(addr)
  }

  pub fn get(&self, addr: &Address) -> Option<&MembershipEntry> {
    self.entries.get(addr)
  }

  /// A point-in-time copy. Shares structure with the table, so it is cheap.
  pub fn snapshot(&self) -> im::OrdMap<Address, MembershipEntry> {
    self.entries.clone()
  }

  pub fn addresses(&self) -> impl Iterator<Item = &Address> {
    self.entries.keys()
  }

  /// Adds `addr` if it is unknown. Returns whether it was added.
  pub fn insert_new(&mut self, addr: Address, heartbeat: u64, now: u64) -> bool {
    if self.entries.contains_key(&addr) {
      return false;
    }
    self
      .entries
      .insert(addr, MembershipEntry::new(addr, heartbeat, now));
    true
  }

  /// Sets the local node's own entry to `heartbeat`.
  pub fn touch(&mut self, local: &Address, heartbeat: u64) {
    self
      .entries
      .insert(*local, MembershipEntry::new(*local, heartbeat, heartbeat));
  }

  /// The payload sent to `recipient`. Entries staler than `t_fail` are withheld so suspected
  /// nodes are not spread further, and the recipient's own entry is left out.
  pub fn gossip(
    &self,
    local: &Address,
    now: u64,
    t_fail: u64,
    recipient: &Address,
  ) -> Gossip {
    let entries = self
      .entries
      .values()
      .filter(|e| e.staleness(now) <= t_fail && &e.addr != recipient)
      .map(|e| GossipEntry {
        addr: e.addr,
        heartbeat: e.heartbeat,
      })
      .collect();
    Gossip {
      from: *local,
      heartbeat: now,
      entries,
    }
  }

  /// Folds a received table into this one. Unknown nodes are added. Known nodes take the
  /// incoming heartbeat only if it is newer and the entry is not already suspected; a suspected
  /// entry must not be revived by second-hand news that may be just as old.
  pub fn merge(
    &mut self,
    gossip: &Gossip,
    local: &Address,
    now: u64,
    t_fail: u64,
  ) -> Vec<ClusterEvent> {
    let mut events = Vec::new();
    for incoming in gossip.entries.iter().filter(|e| &e.addr != local) {
      match self.entries.get_mut(&incoming.addr) {
        Some(entry) => {
          if entry.heartbeat < incoming.heartbeat && entry.staleness(now) <= t_fail {
            entry.heartbeat = incoming.heartbeat;
            entry.local_timestamp = now;
          }
        }
        None => {
          self.entries.insert(
            incoming.addr,
            MembershipEntry::new(incoming.addr, incoming.heartbeat, now),
          );
          events.push(ClusterEvent::Added(incoming.addr));
        }
      }
    }
    events
  }

  /// Drops every entry that has gone `t_remove` ticks without news. The local entry stays.
  pub fn evict(&mut self, local: &Address, now: u64, t_remove: u64) -> Vec<ClusterEvent> {
    let dead = self
      .entries
      .values()
      .filter(|e| &e.addr != local && e.staleness(now) >= t_remove)
      .map(|e| e.addr)
      .collect::<Vec<_>>();
    dead
      .into_iter()
      .map(|addr| {
        self.entries.remove(&addr);
        ClusterEvent::Removed(addr)
      })
      .collect()
  }
}

#[cfg(test)]
use maplit::btreemap;

#[cfg(test)]
fn addr(n: u32) -> Address {
  Address::new(n, 0)
}

#[cfg(test)]
fn table_of(local: Address, rows: &[(u32, u64, u64)]) -> MembershipTable {
  let mut table = MembershipTable::new(local, 0);
  for (n, hb, ts) in rows {
    table.entries.insert(addr(*n), MembershipEntry::new(addr(*n), *hb, *ts));
  }
  table
}

#[test]
fn test_gossip_merge() {
  let local = addr(1);
  let mut table = table_of(local, &[(1, 10, 10), (2, 5, 9), (3, 7, 2), (4, 3, 10)]);
  let recvd = Gossip {
    from: addr(4),
    heartbeat: 30,
    entries: vec![
      // newer heartbeat for a fresh entry: taken
      GossipEntry {
        addr: addr(2),
        heartbeat: 6,
      },
      // newer heartbeat for a suspected entry (staleness 8 > t_fail): ignored
      GossipEntry {
        addr: addr(3),
        heartbeat: 8,
      },
      // older heartbeat: ignored
      GossipEntry {
        addr: addr(4),
        heartbeat: 1,
      },
      // unknown: added
      GossipEntry {
        addr: addr(5),
        heartbeat: 2,
      },
      // the local node itself is never overwritten
      GossipEntry {
        addr: local,
        heartbeat: 99,
      },
    ],
  };
  let events = table.merge(&recvd, &local, 10, 5);
  assert_eq!(events, vec![ClusterEvent::Added(addr(5))]);
  let rows = table
    .snapshot()
    .into_iter()
    .map(|(a, e)| (a.id, (e.heartbeat, e.local_timestamp)))
    .collect::<std::collections::BTreeMap<_, _>>();
  let expected = btreemap! {
    1 => (10, 10),
    2 => (6, 10),
    3 => (7, 2),
    4 => (3, 10),
    5 => (2, 10),
  };
  assert_eq!(rows, expected);
}

#[test]
fn test_gossip_withholds_stale_and_recipient() {
  let local = addr(1);
  let mut table = table_of(local, &[(2, 4, 20), (3, 4, 14), (4, 4, 15)]);
  table.touch(&local, 20);
  let g = table.gossip(&local, 20, 5, &addr(2));
  let sent = g.entries.iter().map(|e| e.addr.id).collect::<Vec<_>>();
  // 3 is 6 ticks stale, 4 is exactly t_fail stale, 2 is the recipient
  assert_eq!(sent, vec![1, 4]);
  assert_eq!(g.from, local);
  assert_eq!(g.heartbeat, 20);
}

#[test]
fn test_evict_at_t_remove() {
  let local = addr(1);
  let mut table = table_of(local, &[(2, 0, 0), (3, 0, 1)]);
  assert!(table.evict(&local, 19, 20).is_empty());
  assert_eq!(table.evict(&local, 20, 20), vec![ClusterEvent::Removed(addr(2))]);
  assert_eq!(table.evict(&local, 21, 20), vec![ClusterEvent::Removed(addr(3))]);
  // the local entry is never evicted, however old
  assert!(table.evict(&local, 1000, 20).is_empty());
  assert_eq!(table.len(), 1);
}

#[test]
fn test_insert_new_is_idempotent() {
  let local = addr(1);
  let mut table = MembershipTable::new(local, 0);
  assert!(table.insert_new(addr(2), 3, 7));
  assert!(!table.insert_new(addr(2), 9, 8));
  assert_eq!(table.get(&addr(2)).unwrap().heartbeat, 3);
  assert_eq!(table.get(&addr(2)).unwrap().local_timestamp, 7);
}
