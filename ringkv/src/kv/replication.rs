use crate::cluster::{ConfigError, NodeRing, REPLICAS};
use crate::core::{Address, EventLog, KvEvent, KvMsg, KvOp, Message, Outcome, Remote, Side};
use crate::kv::{
  LocalStore, OpKind, PendingOps, ReplicaRole, Resolution, StoredRecord, TxnId,
};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
  /// Number of positions on the ring.
  ///
  /// default: `512`
  pub ring_size: u64,
  /// Ticks a client operation waits for a quorum before it is reported as failed.
  ///
  /// default: `5`
  pub fail_timeout: u64,
  /// Whether creates wait for a quorum of acknowledgements like every other operation. When
  /// `false`, a create is reported as successful as soon as it is sent.
  ///
  /// default: `false`
  pub quorum_create: bool,
}
impl Default for ReplicationConfig {
  fn default() -> Self {
    ReplicationConfig {
      ring_size: 512,
      fail_timeout: 5,
      quorum_create: false,
    }
  }
}
impl ReplicationConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.ring_size == 0 {
      return Err(ConfigError::Zero("ring_size"));
    }
    if self.fail_timeout == 0 {
      return Err(ConfigError::Zero("fail_timeout"));
    }
    Ok(())
  }
}

/// The key-value side of a node. It coordinates the operations its clients issue, serves the
/// operations other coordinators send to it, and moves keys around when the ring changes.
///
/// Every method that depends on time takes `now`, the node's current heartbeat.
pub struct Replication {
  config: ReplicationConfig,
  remote: Remote,
  log: Arc<dyn EventLog>,
  ring: NodeRing,
  store: Box<dyn LocalStore>,
  pending: PendingOps,
  next_seq: u64,
}
impl Replication {
  pub fn new(
    config: ReplicationConfig,
    remote: Remote,
    log: Arc<dyn EventLog>,
    store: Box<dyn LocalStore>,
  ) -> Replication {
    Replication {
      ring: NodeRing::new(config.ring_size),
      config,
      remote,
      log,
      store,
      pending: PendingOps::new(),
      next_seq: 0,
    }
  }

  pub fn address(&self) -> &Address {
    self.remote.addr()
  }

  pub fn ring(&self) -> &NodeRing {
    &self.ring
  }

  pub fn store(&self) -> &dyn LocalStore {
    self.store.as_ref()
  }

  pub fn pending(&self) -> &PendingOps {
    &self.pending
  }

  /// The value this node holds for `key`, if it holds one.
  pub fn local_value(&self, key: &str) -> Option<String> {
    self
      .store
      .read(key)
      .and_then(|bytes| StoredRecord::decode(&bytes).ok())
      .map(|record| record.value)
  }

  pub fn create(&mut self, key: &str, value: &str, now: u64) -> TxnId {
    let txn = self.next_txn();
    let ack = self.config.quorum_create;
    let sent = self.issue(txn, OpKind::Create, key, Some(value.to_string()), ack, now);
    if sent && !ack {
      let value = Some(value.to_string());
      self.log_coordinator(OpKind::Create, Outcome::Success, txn, key, value);
    }
    txn
  }

  pub fn read(&mut self, key: &str, now: u64) -> TxnId {
    let txn = self.next_txn();
    self.issue(txn, OpKind::Read, key, None, true, now);
    txn
  }

  pub fn update(&mut self, key: &str, value: &str, now: u64) -> TxnId {
    let txn = self.next_txn();
    self.issue(txn, OpKind::Update, key, Some(value.to_string()), true, now);
    txn
  }

  pub fn delete(&mut self, key: &str, now: u64) -> TxnId {
    let txn = self.next_txn();
    self.issue(txn, OpKind::Delete, key, None, true, now);
    txn
  }

  /// Serves one key-value message addressed to this node.
  pub fn handle(&mut self, msg: KvMsg, now: u64) {
    let KvMsg { txn, from, key, op } = msg;
    match op {
      KvOp::Create { value, role, ack } => {
        let created = match encode_record(&value, now, role) {
          Some(bytes) => self.store.create(&key, bytes),
          None => false,
        };
        self.log_replica(OpKind::Create, created, txn, &key, Some(value));
        if created && ack {
          self.reply(txn, from, key, KvOp::Reply, now);
        }
      }
      KvOp::Read => {
        let value = self.local_value(&key);
        self.log_replica(OpKind::Read, value.is_some(), txn, &key, value.clone());
        if let Some(value) = value {
          self.reply(txn, from, key, KvOp::ReadReply { value }, now);
        }
      }
      KvOp::Update { value, role } => {
        let updated = match encode_record(&value, now, role) {
          Some(bytes) => self.store.update(&key, bytes),
          None => false,
        };
        self.log_replica(OpKind::Update, updated, txn, &key, Some(value));
        if updated {
          self.reply(txn, from, key, KvOp::Reply, now);
        }
      }
      KvOp::Delete => {
        let deleted = self.store.delete(&key);
        self.log_replica(OpKind::Delete, deleted, txn, &key, None);
        if deleted {
          self.reply(txn, from, key, KvOp::Reply, now);
        }
      }
      KvOp::Reply => self.record_response(&txn, &from, None),
      KvOp::ReadReply { value } => self.record_response(&txn, &from, Some(value)),
    }
  }

  /// Reports every pending operation that reached a quorum or ran out of time.
  pub fn check_quorum(&mut self, now: u64) {
    for (txn, op, resolution) in self.pending.resolve(now, self.config.fail_timeout) {
      match resolution {
        Resolution::Success { value } => {
          let value = match op.kind {
            OpKind::Read => value,
            _ => op.value,
          };
          self.log_coordinator(op.kind, Outcome::Success, txn, &op.key, value);
        }
        Resolution::Failure => {
          self.log_coordinator(op.kind, Outcome::Failure, txn, &op.key, op.value);
        }
      }
    }
  }

  /// Rebuilds the ring from `members`. If it changed and this node holds any keys, every key
  /// is handed to its current replicas. While the ring is too small to place keys, local
  /// copies are kept as they are. Returns whether the ring changed.
  pub fn refresh_ring<'a, I>(&mut self, members: I, now: u64) -> bool
  where
    I: IntoIterator<Item = &'a Address>,
  {
    let changed = self.ring.rebuild(members);
    if changed {
      debug!(node = %self.address(), members = self.ring.len(), "ring changed");
      if !self.store.is_empty() {
        self.stabilize(now);
      }
    }
    changed
  }

  /// Drops the local copy of every key this node no longer replicates, then re-creates every
  /// held key on its current replicas. Replicas that already hold the key refuse the create.
  fn stabilize(&mut self, now: u64) {
    let addr = *self.address();
    let entries = self.store.entries();
    if self.ring.len() < REPLICAS {
      debug!(
        node = %addr,
        keys = entries.len(),
        members = self.ring.len(),
        "too few members to place keys, keeping local copies"
      );
      return;
    }
    debug!(node = %addr, keys = entries.len(), "stabilizing");
    for (key, bytes) in entries {
      let record = match StoredRecord::decode(&bytes) {
        Ok(record) => record,
        Err(err) => {
          warn!(node = %addr, key = %key, error = %err, "skipping undecodable record");
          continue;
        }
      };
      if !self.ring.is_replica(&key, &addr) {
        self.store.delete(&key);
      }
      self.create(&key, &record.value, now);
    }
  }

  fn next_txn(&mut self) -> TxnId {
    let txn = TxnId {
      origin: *self.address(),
      seq: self.next_seq,
    };
    self.next_seq += 1;
    txn
  }

  /// Fans an operation out to the replicas of `key`. Tracked operations are registered
  /// before anything is sent, since the local replica answers synchronously. Returns false if
  /// `key` has no replicas, in which case the operation has already been reported as failed.
  fn issue(
    &mut self,
    txn: TxnId,
    kind: OpKind,
    key: &str,
    value: Option<String>,
    tracked: bool,
    now: u64,
  ) -> bool {
    let replicas = self.ring.find_replicas(key);
    if replicas.is_empty() {
      self.log_coordinator(kind, Outcome::Failure, txn, key, value);
      return false;
    }
    if tracked {
      self
        .pending
        .insert(txn, kind, key.to_string(), value.clone(), now);
    }
    for (i, node) in replicas.iter().enumerate() {
      let role = match ReplicaRole::try_from(i as u8) {
        Ok(role) => role,
        Err(_) => break,
      };
      let op = match (kind, &value) {
        (OpKind::Create, Some(v)) => KvOp::Create {
          value: v.clone(),
          role,
          ack: tracked,
        },
        (OpKind::Update, Some(v)) => KvOp::Update {
          value: v.clone(),
          role,
        },
        (OpKind::Read, _) => KvOp::Read,
        (OpKind::Delete, _) => KvOp::Delete,
        _ => break,
      };
      let msg = KvMsg {
        txn,
        from: *self.address(),
        key: key.to_string(),
        op,
      };
      self.dispatch(node.addr, msg, now);
    }
    true
  }

  fn reply(&mut self, txn: TxnId, to: Address, key: String, op: KvOp, now: u64) {
    let msg = KvMsg {
      txn,
      from: *self.address(),
      key,
      op,
    };
    self.dispatch(to, msg, now);
  }

  /// Messages for this node never touch the transport.
  fn dispatch(&mut self, to: Address, msg: KvMsg, now: u64) {
    if &to == self.address() {
      self.handle(msg, now);
    } else {
      self.remote.send(&to, &Message::Kv(msg));
    }
  }

  fn record_response(&mut self, txn: &TxnId, from: &Address, value: Option<String>) {
    if !self.pending.respond(txn, from, value) {
      trace!(node = %self.address(), txn = %txn, from = %from, "ignoring stale or repeated reply");
    }
  }

  fn log_coordinator(
    &self,
    op: OpKind,
    outcome: Outcome,
    txn: TxnId,
    key: &str,
    value: Option<String>,
  ) {
    self.log.kv(KvEvent {
      node: *self.address(),
      side: Side::Coordinator,
      op,
      outcome,
      txn,
      key: key.to_string(),
      value,
    });
  }

  fn log_replica(
    &self,
    op: OpKind,
    success: bool,
    txn: TxnId,
    key: &str,
    value: Option<String>,
  ) {
    let outcome = if success {
      Outcome::Success
    } else {
      Outcome::Failure
    };
    self.log.kv(KvEvent {
      node: *self.address(),
      side: Side::Replica,
      op,
      outcome,
      txn,
      key: key.to_string(),
      value,
    });
  }
}

fn encode_record(value: &str, now: u64, role: ReplicaRole) -> Option<Vec<u8>> {
  let record = StoredRecord {
    value: value.to_string(),
    timestamp: now,
    role,
  };
  match record.encode() {
    Ok(bytes) => Some(bytes),
    Err(err) => {
      warn!(error = %err, "failed to encode record");
      None
    }
  }
}

#[cfg(test)]
use crate::kv::HashTable;
#[cfg(test)]
use crate::testkit::{RecordingLog, SimNet};

#[cfg(test)]
fn replication(
  net: &Arc<SimNet>,
  log: &Arc<RecordingLog>,
  config: ReplicationConfig,
  members: &[u32],
) -> Replication {
  let remote = Remote::new(Address::new(1, 0), net.clone());
  let log: Arc<dyn EventLog> = log.clone();
  let mut rep = Replication::new(config, remote, log, Box::new(HashTable::new()));
  let members = members.iter().map(|id| Address::new(*id, 0)).collect::<Vec<_>>();
  rep.refresh_ring(members.iter(), 0);
  rep
}

#[cfg(test)]
fn coordinator_outcomes(log: &RecordingLog) -> Vec<(OpKind, Outcome, Option<String>)> {
  log
    .kv_events()
    .into_iter()
    .filter(|e| e.side == Side::Coordinator)
    .map(|e| (e.op, e.outcome, e.value))
    .collect()
}

#[test]
fn test_no_replicas_fails_immediately() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2]);
  rep.create("k", "v", 0);
  rep.read("k", 0);
  assert_eq!(
    coordinator_outcomes(&log),
    vec![
      (OpKind::Create, Outcome::Failure, Some("v".to_string())),
      (OpKind::Read, Outcome::Failure, None),
    ]
  );
  assert_eq!(rep.pending().unresolved(), 0);
  assert_eq!(net.sent(), 0);
}

#[test]
fn test_local_replica_skips_transport() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  let txn = rep.create("k", "v", 0);
  assert_eq!(rep.local_value("k"), Some("v".to_string()));
  assert_eq!(net.sent(), 2);
  // creates are reported at once, without waiting for anybody
  assert_eq!(
    coordinator_outcomes(&log),
    vec![(OpKind::Create, Outcome::Success, Some("v".to_string()))]
  );
  assert!(rep.pending().get(&txn).is_none());
}

#[test]
fn test_read_resolves_on_second_reply() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  rep.create("k", "v", 0);
  log.clear();
  let txn = rep.read("k", 1);
  // the local replica has already answered
  assert_eq!(rep.pending().get(&txn).unwrap().responses.len(), 1);
  rep.check_quorum(1);
  assert!(coordinator_outcomes(&log).is_empty());
  rep.handle(
    KvMsg {
      txn,
      from: Address::new(2, 0),
      key: "k".to_string(),
      op: KvOp::ReadReply {
        value: "v".to_string(),
      },
    },
    2,
  );
  rep.check_quorum(2);
  assert_eq!(
    coordinator_outcomes(&log),
    vec![(OpKind::Read, Outcome::Success, Some("v".to_string()))]
  );
  // a third, late reply changes nothing
  rep.handle(
    KvMsg {
      txn,
      from: Address::new(3, 0),
      key: "k".to_string(),
      op: KvOp::ReadReply {
        value: "v".to_string(),
      },
    },
    3,
  );
  rep.check_quorum(3);
  assert_eq!(coordinator_outcomes(&log).len(), 1);
}

#[test]
fn test_update_times_out_without_quorum() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  rep.create("k", "v", 0);
  log.clear();
  rep.update("k", "w", 10);
  assert_eq!(rep.local_value("k"), Some("w".to_string()));
  rep.check_quorum(14);
  assert!(coordinator_outcomes(&log).is_empty());
  rep.check_quorum(15);
  assert_eq!(
    coordinator_outcomes(&log),
    vec![(OpKind::Update, Outcome::Failure, Some("w".to_string()))]
  );
}

#[test]
fn test_quorum_create_waits_for_acks() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let config = ReplicationConfig {
    quorum_create: true,
    ..ReplicationConfig::default()
  };
  let mut rep = replication(&net, &log, config, &[1, 2, 3]);
  let txn = rep.create("k", "v", 0);
  rep.check_quorum(0);
  assert!(coordinator_outcomes(&log).is_empty());
  rep.handle(
    KvMsg {
      txn,
      from: Address::new(3, 0),
      key: "k".to_string(),
      op: KvOp::Reply,
    },
    1,
  );
  rep.check_quorum(1);
  assert_eq!(
    coordinator_outcomes(&log),
    vec![(OpKind::Create, Outcome::Success, Some("v".to_string()))]
  );
}

#[test]
fn test_replica_failures_are_logged_without_reply() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  let txn = TxnId {
    origin: Address::new(2, 0),
    seq: 0,
  };
  for op in vec![KvOp::Read, KvOp::Delete] {
    rep.handle(
      KvMsg {
        txn,
        from: Address::new(2, 0),
        key: "missing".to_string(),
        op,
      },
      0,
    );
  }
  let outcomes = log
    .kv_events()
    .into_iter()
    .map(|e| (e.side, e.op, e.outcome))
    .collect::<Vec<_>>();
  assert_eq!(
    outcomes,
    vec![
      (Side::Replica, OpKind::Read, Outcome::Failure),
      (Side::Replica, OpKind::Delete, Outcome::Failure),
    ]
  );
  assert_eq!(net.sent(), 0);
}

#[test]
fn test_repeated_reply_counts_once() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  let txn = rep.update("missing", "v", 0);
  let reply = KvMsg {
    txn,
    from: Address::new(2, 0),
    key: "missing".to_string(),
    op: KvOp::Reply,
  };
  rep.handle(reply.clone(), 1);
  rep.handle(reply, 1);
  rep.check_quorum(1);
  assert!(coordinator_outcomes(&log)
    .iter()
    .all(|(op, _, _)| *op != OpKind::Update));
  assert_eq!(rep.pending().get(&txn).unwrap().responses.len(), 1);
}

#[test]
fn test_shrunken_ring_keeps_local_copies() {
  let net = Arc::new(SimNet::new(1));
  let log = Arc::new(RecordingLog::new());
  let mut rep = replication(&net, &log, ReplicationConfig::default(), &[1, 2, 3]);
  rep.create("k", "v", 0);
  log.clear();
  let sent = net.sent();

  let two = vec![Address::new(1, 0), Address::new(2, 0)];
  assert!(rep.refresh_ring(two.iter(), 5));
  assert_eq!(rep.local_value("k"), Some("v".to_string()));
  assert!(log.kv_events().is_empty());
  assert_eq!(net.sent(), sent);

  // once there are enough members again, the key is handed out as usual
  let three = vec![Address::new(1, 0), Address::new(2, 0), Address::new(4, 0)];
  assert!(rep.refresh_ring(three.iter(), 6));
  assert_eq!(rep.local_value("k"), Some("v".to_string()));
  assert_eq!(net.sent(), sent + 2);
}

#[test]
fn test_config_validation() {
  assert_eq!(ReplicationConfig::default().validate(), Ok(()));
  let config = ReplicationConfig {
    ring_size: 0,
    ..ReplicationConfig::default()
  };
  assert_eq!(config.validate(), Err(ConfigError::Zero("ring_size")));
}
