use crate::core::Address;
use crate::kv::{OpKind, TxnId};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Responses needed, out of the three replicas asked, before an operation succeeds.
pub const QUORUM: usize = 2;

/// A client operation waiting for its replicas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOp {
  pub kind: OpKind,
  pub key: String,
  /// The value written, for creates and updates.
  pub value: Option<String>,
  /// Heartbeat of the issuing node when the operation went out.
  pub issued_at: u64,
  /// One entry per responding replica, in arrival order. Reads carry the value the replica
  /// returned.
  pub responses: SmallVec<[(Address, Option<String>); 3]>,
  pub done: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
  /// `value` is the first value read, for reads.
  Success { value: Option<String> },
  Failure,
}

/// Operations issued by this node, by transaction. Resolved operations stay in the table so
/// late replies to them are recognised and ignored.
#[derive(Clone, Debug, Default)]
pub struct PendingOps {
  ops: BTreeMap<TxnId, PendingOp>,
}
impl PendingOps {
  pub fn new() -> PendingOps {
    PendingOps::default()
  }

  pub fn insert(
    &mut self,
    txn: TxnId,
    kind: OpKind,
    key: String,
    value: Option<String>,
    issued_at: u64,
  ) {
    self.ops.insert(
      txn,
      PendingOp {
        kind,
        key,
        value,
        issued_at,
        responses: SmallVec::new(),
        done: false,
      },
    );
  }

  /// Records `from`'s response. Returns false if the transaction is unknown or already
  /// resolved, or if `from` has already responded to it.
  pub fn respond(&mut self, txn: &TxnId, from: &Address, value: Option<String>) -> bool {
    match self.ops.get_mut(txn) {
      Some(op) if !op.done && op.responses.iter().all(|(a, _)| a != from) => {
        op.responses.push((*from, value));
        true
      }
      _ => false,
    }
  }

  pub fn get(&self, txn: &TxnId) -> Option<&PendingOp> {
    self.ops.get(txn)
  }

  pub fn unresolved(&self) -> usize {
    self.ops.values().filter(|op| !op.done).count()
  }

  /// Resolves every operation that reached quorum or timed out as of heartbeat `now`, marking
  /// them done.
  pub fn resolve(
    &mut self,
    now: u64,
    fail_timeout: u64,
  ) -> Vec<(TxnId, PendingOp, Resolution)> {
    let mut resolved = Vec::new();
    for (txn, op) in self.ops.iter_mut().filter(|(_, op)| !op.done) {
      let resolution = if op.responses.len() >= QUORUM {
        let value = match op.kind {
          OpKind::Read => op.responses[0].1.clone(),
          _ => None,
        };
        Resolution::Success { value }
      } else if now.saturating_sub(op.issued_at) >= fail_timeout {
        Resolution::Failure
      } else {
        continue;
      };
      op.done = true;
      resolved.push((*txn, op.clone(), resolution));
    }
    resolved
  }
}

#[cfg(test)]
fn replica(id: u32) -> Address {
  Address::new(id, 0)
}

#[cfg(test)]
fn txn(seq: u64) -> TxnId {
  TxnId {
    origin: Address::new(1, 0),
    seq,
  }
}

#[test]
fn test_quorum_reached_with_two_responses() {
  let mut ops = PendingOps::new();
  ops.insert(txn(1), OpKind::Update, "k".into(), Some("v".into()), 10);
  assert!(ops.respond(&txn(1), &replica(1), None));
  assert!(ops.resolve(11, 5).is_empty());
  assert!(ops.respond(&txn(1), &replica(2), None));
  let resolved = ops.resolve(11, 5);
  assert_eq!(resolved.len(), 1);
  assert_eq!(resolved[0].2, Resolution::Success { value: None });
  assert!(ops.get(&txn(1)).unwrap().done);
  assert_eq!(ops.unresolved(), 0);
}

#[test]
fn test_read_takes_first_response() {
  let mut ops = PendingOps::new();
  ops.insert(txn(2), OpKind::Read, "k".into(), None, 0);
  ops.respond(&txn(2), &replica(3), Some("old".into()));
  ops.respond(&txn(2), &replica(1), Some("new".into()));
  let resolved = ops.resolve(0, 5);
  assert_eq!(
    resolved[0].2,
    Resolution::Success {
      value: Some("old".into())
    }
  );
}

#[test]
fn test_timeout_after_fail_timeout_ticks() {
  let mut ops = PendingOps::new();
  ops.insert(txn(3), OpKind::Delete, "k".into(), None, 4);
  ops.respond(&txn(3), &replica(1), None);
  assert!(ops.resolve(8, 5).is_empty());
  let resolved = ops.resolve(9, 5);
  assert_eq!(resolved[0].2, Resolution::Failure);
  // Done operations are kept but never resolved twice, and late replies are refused.
  assert!(ops.resolve(100, 5).is_empty());
  assert!(!ops.respond(&txn(3), &replica(2), None));
  assert!(ops.get(&txn(3)).is_some());
}

#[test]
fn test_unknown_reply_is_ignored() {
  let mut ops = PendingOps::new();
  assert!(!ops.respond(&txn(9), &replica(1), Some("x".into())));
}

#[test]
fn test_repeated_reply_from_one_replica_counts_once() {
  let mut ops = PendingOps::new();
  ops.insert(txn(4), OpKind::Read, "k".into(), None, 0);
  assert!(ops.respond(&txn(4), &replica(2), Some("v".into())));
  assert!(!ops.respond(&txn(4), &replica(2), Some("v".into())));
  assert!(ops.resolve(1, 5).is_empty());
  assert_eq!(ops.get(&txn(4)).unwrap().responses.len(), 1);
  assert!(ops.respond(&txn(4), &replica(3), Some("v".into())));
  assert_eq!(
    ops.resolve(1, 5)[0].2,
    Resolution::Success {
      value: Some("v".into())
    }
  );
}
