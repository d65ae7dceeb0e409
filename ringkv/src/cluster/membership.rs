use crate::cluster::{
  ClusterConfig, ClusterEvent, Gossip, MemberState, MembershipEntry, MembershipTable,
};
use crate::core::{Address, EventLog, Message, Remote};
use rand::rngs::SmallRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use MemberState::*;

/// The membership and failure-detection side of a node.
///
/// Every tick a joined node sweeps out entries that went `t_remove` ticks without news, gossips
/// its fresh entries to a few random peers and then bumps its own heartbeat. A node that stops
/// ticking stops bumping its heartbeat, and everybody else eventually evicts it.
pub struct Membership {
  config: ClusterConfig,
  remote: Remote,
  log: Arc<dyn EventLog>,
  table: MembershipTable,
  heartbeat: u64,
  state: MemberState,
  rng: SmallRng,
  join_requests: usize,
  join_wait: u64,
}
impl Membership {
  pub fn new(config: ClusterConfig, remote: Remote, log: Arc<dyn EventLog>) -> Membership {
    let addr = *remote.addr();
    let rng = match config.seed {
      Some(seed) => SmallRng::seed_from_u64(seed ^ address_bits(&addr)),
      None => SmallRng::from_entropy(),
    };
    Membership {
      config,
      remote,
      log,
      table: MembershipTable::new(addr, 0),
      heartbeat: 0,
      state: Uninitialized,
      rng,
      join_requests: 0,
      join_wait: 0,
    }
  }

  pub fn address(&self) -> &Address {
    self.remote.addr()
  }

  pub fn heartbeat(&self) -> u64 {
    self.heartbeat
  }

  pub fn state(&self) -> MemberState {
    self.state
  }

  pub fn is_joined(&self) -> bool {
    self.state == Joined
  }

  pub fn table(&self) -> &MembershipTable {
    &self.table
  }

  /// A point-in-time copy of the membership list, the local node included.
  pub fn members(&self) -> im::OrdMap<Address, MembershipEntry> {
    self.table.snapshot()
  }

  /// Resets this node to a table holding only itself and starts joining. The introducer
  /// starts the group on its own.
  pub fn initialize(&mut self) {
    let addr = *self.address();
    self.heartbeat = 0;
    self.table = MembershipTable::new(addr, 0);
    self.join_requests = 0;
    self.join_wait = 0;
    if addr == self.config.introducer {
      debug!(node = %addr, "starting group as introducer");
      self.state = Joined;
    } else {
      self.state = Joining;
      self.request_join();
    }
  }

  /// Applies one membership message and returns the resulting changes to the table.
  pub fn handle(&mut self, msg: Message) -> Vec<ClusterEvent> {
    if self.state == Uninitialized {
      return Vec::new();
    }
    let addr = *self.address();
    match msg {
      Message::JoinRequest { from, heartbeat } => {
        let mut events = Vec::new();
        if self.table.insert_new(from, heartbeat, self.heartbeat) {
          self.log.node_added(&addr, &from);
          events.push(ClusterEvent::Added(from));
        } else {
          trace!(node = %addr, from = %from, "join request from known member");
        }
        let reply = self.table.gossip(&addr, self.heartbeat, self.config.t_fail, &from);
        self.remote.send(&from, &Message::JoinReply(reply));
        events
      }
      Message::JoinReply(gossip) => {
        if self.state == Joining {
          debug!(node = %addr, from = %gossip.from, "joined group");
          self.state = Joined;
        }
        self.merge(gossip)
      }
      Message::Gossip(gossip) => self.merge(gossip),
      Message::Kv(_) => Vec::new(),
    }
  }

  /// Runs one round of periodic duties.
  pub fn tick(&mut self) -> Vec<ClusterEvent> {
    match self.state {
      Uninitialized => Vec::new(),
      Joining => {
        self.retry_join();
        Vec::new()
      }
      Joined => {
        let addr = *self.address();
        let events = self.table.evict(&addr, self.heartbeat, self.config.t_remove);
        for event in &events {
          if let ClusterEvent::Removed(removed) = event {
            self.log.node_removed(&addr, removed);
          }
        }
        self.gossip();
        self.heartbeat += 1;
        self.table.touch(&addr, self.heartbeat);
        events
      }
    }
  }

  fn merge(&mut self, gossip: Gossip) -> Vec<ClusterEvent> {
    let addr = *self.address();
    let events = self
      .table
      .merge(&gossip, &addr, self.heartbeat, self.config.t_fail);
    for event in &events {
      if let ClusterEvent::Added(added) = event {
        self.log.node_added(&addr, added);
      }
    }
    events
  }

  fn gossip(&mut self) {
    let addr = *self.address();
    let targets = self
      .table
      .addresses()
      .filter(|a| **a != addr)
      .copied()
      .choose_multiple(&mut self.rng, self.config.gossip_fanout);
    for target in targets {
      let payload = self
        .table
        .gossip(&addr, self.heartbeat, self.config.t_fail, &target);
      self.remote.send(&target, &Message::Gossip(payload));
    }
  }

  fn request_join(&mut self) {
    let addr = *self.address();
    self.join_requests += 1;
    self.join_wait = 0;
    debug!(
      node = %addr,
      introducer = %self.config.introducer,
      attempt = self.join_requests,
      "requesting to join"
    );
    let msg = Message::JoinRequest {
      from: addr,
      heartbeat: self.heartbeat,
    };
    self.remote.send(&self.config.introducer, &msg);
  }

  fn retry_join(&mut self) {
    if self.join_requests > self.config.join_attempts {
      return;
    }
    self.join_wait += 1;
    if self.join_wait < self.config.join_timeout {
      return;
    }
    if self.join_requests < self.config.join_attempts {
      self.request_join();
    } else {
      warn!(
        node = %self.address(),
        introducer = %self.config.introducer,
        attempts = self.join_requests,
        "no reply from introducer, giving up on join requests"
      );
      // Stops further retries; a late reply still completes the join.
      self.join_requests += 1;
    }
  }
}

fn address_bits(addr: &Address) -> u64 {
  (addr.id as u64) << 16 | addr.port as u64
}

#[cfg(test)]
use crate::testkit::{LogRecord, RecordingLog, SimNet};

#[cfg(test)]
fn membership(
  id: u32,
  config: &ClusterConfig,
  net: &Arc<SimNet>,
  log: &Arc<RecordingLog>,
) -> (Membership, crossbeam::channel::Receiver<Vec<u8>>) {
  let remote = Remote::new(Address::new(id, 0), net.clone());
  let inbox = remote.register().unwrap();
  let log: Arc<dyn EventLog> = log.clone();
  (Membership::new(config.clone(), remote, log), inbox)
}

#[cfg(test)]
fn deliver(m: &mut Membership, inbox: &crossbeam::channel::Receiver<Vec<u8>>) {
  while let Ok(bytes) = inbox.try_recv() {
    m.handle(Message::decode(&bytes).unwrap());
  }
}

#[test]
fn test_introducer_joins_alone() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig {
    seed: Some(7),
    ..ClusterConfig::default()
  };
  let (mut intro, _) = membership(1, &config, &net, &log);
  assert_eq!(intro.state(), Uninitialized);
  intro.initialize();
  assert!(intro.is_joined());
  assert_eq!(intro.tick(), vec![]);
  assert_eq!(intro.heartbeat(), 1);
  assert_eq!(intro.members().len(), 1);
  assert_eq!(intro.members().get(&Address::new(1, 0)).unwrap().heartbeat, 1);
}

#[test]
fn test_join_handshake() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig {
    seed: Some(7),
    ..ClusterConfig::default()
  };
  let (mut intro, intro_inbox) = membership(1, &config, &net, &log);
  let (mut joiner, joiner_inbox) = membership(2, &config, &net, &log);
  intro.initialize();
  joiner.initialize();
  assert_eq!(joiner.state(), Joining);
  // a joining node neither gossips nor advances its heartbeat
  joiner.tick();
  assert_eq!(joiner.heartbeat(), 0);

  net.advance();
  deliver(&mut intro, &intro_inbox);
  assert!(intro.table().contains(&Address::new(2, 0)));
  assert_eq!(
    log.records(),
    vec![LogRecord::Added {
      observer: Address::new(1, 0),
      added: Address::new(2, 0),
    }]
  );

  net.advance();
  deliver(&mut joiner, &joiner_inbox);
  assert!(joiner.is_joined());
  assert!(joiner.table().contains(&Address::new(1, 0)));
  assert_eq!(log.records().len(), 2);
}

#[test]
fn test_repeated_join_request_is_answered_but_not_logged() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig::default();
  let (mut intro, _) = membership(1, &config, &net, &log);
  let (_, joiner_inbox) = membership(2, &config, &net, &log);
  intro.initialize();
  let request = Message::JoinRequest {
    from: Address::new(2, 0),
    heartbeat: 0,
  };
  assert_eq!(
    intro.handle(request.clone()),
    vec![ClusterEvent::Added(Address::new(2, 0))]
  );
  assert_eq!(intro.handle(request), vec![]);
  assert_eq!(log.records().len(), 1);
  net.advance();
  assert_eq!(joiner_inbox.try_iter().count(), 2);
}

#[test]
fn test_join_retries_then_gives_up() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig {
    join_timeout: 2,
    join_attempts: 3,
    ..ClusterConfig::default()
  };
  // nobody listens on the introducer address, so every request is lost
  let (mut joiner, _) = membership(2, &config, &net, &log);
  joiner.initialize();
  for _ in 0..20 {
    joiner.tick();
  }
  assert_eq!(joiner.state(), Joining);
  assert_eq!(net.sent(), 3);
}

#[test]
fn test_gossip_excludes_self_and_respects_fanout() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig {
    gossip_fanout: 2,
    seed: Some(3),
    ..ClusterConfig::default()
  };
  let (mut intro, _) = membership(1, &config, &net, &log);
  let inboxes = (2..=5)
    .map(|id| membership(id, &config, &net, &log).1)
    .collect::<Vec<_>>();
  intro.initialize();
  for id in 2..=5 {
    intro.handle(Message::JoinRequest {
      from: Address::new(id, 0),
      heartbeat: 0,
    });
  }
  net.advance();
  inboxes.iter().for_each(|i| i.try_iter().for_each(drop));
  intro.tick();
  net.advance();
  let gossiped = inboxes
    .iter()
    .map(|i| i.try_iter().count())
    .collect::<Vec<_>>();
  assert_eq!(gossiped.iter().sum::<usize>(), 2);
  assert!(gossiped.iter().all(|n| *n <= 1));
}

#[test]
fn test_silent_peer_is_evicted() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ClusterConfig::default();
  let (mut intro, _) = membership(1, &config, &net, &log);
  intro.initialize();
  intro.handle(Message::JoinRequest {
    from: Address::new(2, 0),
    heartbeat: 0,
  });
  let mut removed = Vec::new();
  for _ in 0..=config.t_remove {
    removed.extend(intro.tick());
  }
  assert_eq!(removed, vec![ClusterEvent::Removed(Address::new(2, 0))]);
  assert!(!intro.table().contains(&Address::new(2, 0)));
  assert!(log.records().contains(&LogRecord::Removed {
    observer: Address::new(1, 0),
    removed: Address::new(2, 0),
  }));
}
