use crate::cluster::{ClusterConfig, ConfigError, MemberState, Membership, MembershipEntry};
use crate::core::{Address, EventLog, Message, Remote, Transport, TransportError};
use crate::kv::{HashTable, LocalStore, Replication, ReplicationConfig, TxnId};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Everything needed to configure one node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
  pub cluster: ClusterConfig,
  pub replication: ReplicationConfig,
}
impl NodeConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.cluster.validate()?;
    self.replication.validate()
  }
}

#[derive(Debug, Error)]
pub enum JoinError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("{0} has already been started")]
  AlreadyStarted(Address),
}

/// One member of the group: a [`Membership`] and a [`Replication`] sharing an inbound queue.
///
/// A node does nothing on its own. Whoever owns it calls [`tick`](Node::tick) periodically, and
/// each call drains the inbound queue, resolves pending operations, runs the membership duties
/// and finally refreshes the ring.
pub struct Node {
  config: NodeConfig,
  remote: Remote,
  membership: Membership,
  replication: Replication,
  inbox: Option<Receiver<Vec<u8>>>,
}
impl Node {
  pub fn new(
    addr: Address,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    log: Arc<dyn EventLog>,
  ) -> Node {
    Node::with_store(addr, config, transport, log, Box::new(HashTable::new()))
  }

  pub fn with_store(
    addr: Address,
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    log: Arc<dyn EventLog>,
    store: Box<dyn LocalStore>,
  ) -> Node {
    let remote = Remote::new(addr, transport);
    let membership = Membership::new(config.cluster.clone(), remote.clone(), log.clone());
    let replication =
      Replication::new(config.replication.clone(), remote.clone(), log, store);
    Node {
      config,
      remote,
      membership,
      replication,
      inbox: None,
    }
  }

  /// Attaches the node to its transport and starts joining the group.
  pub fn start(&mut self) -> Result<(), JoinError> {
    if self.inbox.is_some() {
      return Err(JoinError::AlreadyStarted(*self.address()));
    }
    self.config.validate()?;
    self.inbox = Some(self.remote.register()?);
    self.membership.initialize();
    Ok(())
  }

  pub fn is_started(&self) -> bool {
    self.inbox.is_some()
  }

  pub fn tick(&mut self) {
    let inbox = match &self.inbox {
      Some(inbox) => inbox.clone(),
      None => return,
    };
    let now = self.membership.heartbeat();
    for bytes in inbox.try_iter() {
      match Message::decode(&bytes) {
        Ok(Message::Kv(msg)) => self.replication.handle(msg, now),
        Ok(msg) => {
          self.membership.handle(msg);
        }
        Err(err) => {
          warn!(node = %self.address(), error = %err, "dropping malformed datagram");
        }
      }
    }
    self.replication.check_quorum(now);
    self.membership.tick();
    let members = self.membership.members();
    self
      .replication
      .refresh_ring(members.keys(), self.membership.heartbeat());
  }

  pub fn create(&mut self, key: &str, value: &str) -> TxnId {
    let now = self.membership.heartbeat();
    self.replication.create(key, value, now)
  }

  pub fn read(&mut self, key: &str) -> TxnId {
    let now = self.membership.heartbeat();
    self.replication.read(key, now)
  }

  pub fn update(&mut self, key: &str, value: &str) -> TxnId {
    let now = self.membership.heartbeat();
    self.replication.update(key, value, now)
  }

  pub fn delete(&mut self, key: &str) -> TxnId {
    let now = self.membership.heartbeat();
    self.replication.delete(key, now)
  }

  pub fn address(&self) -> &Address {
    self.remote.addr()
  }

  pub fn heartbeat(&self) -> u64 {
    self.membership.heartbeat()
  }

  pub fn state(&self) -> MemberState {
    self.membership.state()
  }

  pub fn is_joined(&self) -> bool {
    self.membership.is_joined()
  }

  pub fn members(&self) -> im::OrdMap<Address, MembershipEntry> {
    self.membership.members()
  }

  pub fn membership(&self) -> &Membership {
    &self.membership
  }

  pub fn replication(&self) -> &Replication {
    &self.replication
  }
}

#[cfg(test)]
use crate::testkit::{RecordingLog, SimNet};

#[test]
fn test_start_validates_and_registers_once() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut config = NodeConfig::default();
  config.cluster.t_remove = config.cluster.t_fail;
  let mut bad = Node::new(Address::new(1, 0), config, net.clone(), log.clone());
  assert!(matches!(bad.start(), Err(JoinError::Config(_))));
  assert!(!bad.is_started());

  let mut node = Node::new(Address::new(1, 0), NodeConfig::default(), net.clone(), log.clone());
  node.start().unwrap();
  assert!(node.is_joined());
  assert!(matches!(node.start(), Err(JoinError::AlreadyStarted(_))));

  let mut twin = Node::new(Address::new(1, 0), NodeConfig::default(), net, log);
  assert!(matches!(
    twin.start(),
    Err(JoinError::Transport(TransportError::AddressInUse(_)))
  ));
}

#[test]
fn test_unstarted_node_does_not_tick() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut node = Node::new(Address::new(1, 0), NodeConfig::default(), net, log);
  node.tick();
  assert_eq!(node.heartbeat(), 0);
  assert_eq!(node.state(), MemberState::Uninitialized);
}

#[test]
fn test_malformed_datagram_is_dropped() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut node = Node::new(Address::new(1, 0), NodeConfig::default(), net.clone(), log);
  node.start().unwrap();
  net.send(&Address::new(9, 0), &Address::new(1, 0), vec![0xff, 0x13]);
  net.advance();
  node.tick();
  assert_eq!(node.heartbeat(), 1);
  assert_eq!(node.members().len(), 1);
}
