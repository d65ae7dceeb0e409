use crate::core::Address;
use crate::kv::{OpKind, TxnId};
use std::fmt;
use tracing::{info, warn};

/// Which end of an operation produced a [`KvEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
  /// The node that issued the operation and resolves its quorum.
  Coordinator,
  /// A node holding (or supposed to hold) a replica of the key.
  Replica,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
  Success,
  Failure,
}

/// One observable key-value outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEvent {
  pub node: Address,
  pub side: Side,
  pub op: OpKind,
  pub outcome: Outcome,
  pub txn: TxnId,
  pub key: String,
  pub value: Option<String>,
}
impl fmt::Display for KvEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:?} {:?} {:?} txn={} key={}",
      self.side, self.op, self.outcome, self.txn, self.key
    )?;
    if let Some(value) = &self.value {
      write!(f, " value={}", value)?;
    }
    Ok(())
  }
}

/// Observes protocol events. Implementations must never influence protocol state.
pub trait EventLog: Send + Sync {
  fn node_added(&self, observer: &Address, added: &Address);
  fn node_removed(&self, observer: &Address, removed: &Address);
  fn kv(&self, event: KvEvent);
}

/// Forwards every event to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;
impl EventLog for TracingLog {
  fn node_added(&self, observer: &Address, added: &Address) {
    info!(node = %observer, added = %added, "node joined");
  }

  fn node_removed(&self, observer: &Address, removed: &Address) {
    info!(node = %observer, removed = %removed, "node removed");
  }

  fn kv(&self, event: KvEvent) {
    match event.outcome {
      Outcome::Success => info!(node = %event.node, "{}", event),
      Outcome::Failure => warn!(node = %event.node, "{}", event),
    }
  }
}
