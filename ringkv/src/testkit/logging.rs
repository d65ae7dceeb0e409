use crate::core::{Address, EventLog, KvEvent, Outcome, Side};
use crate::kv::{OpKind, TxnId};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
  Added { observer: Address, added: Address },
  Removed { observer: Address, removed: Address },
  Kv(KvEvent),
}

/// An [`EventLog`] that keeps everything it is told, in order, so tests can inspect it.
#[derive(Debug, Default)]
pub struct RecordingLog {
  records: Mutex<Vec<LogRecord>>,
}
impl RecordingLog {
  pub fn new() -> RecordingLog {
    RecordingLog::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
    self.records.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn records(&self) -> Vec<LogRecord> {
    self.lock().clone()
  }

  pub fn kv_events(&self) -> Vec<KvEvent> {
    self
      .lock()
      .iter()
      .filter_map(|r| match r {
        LogRecord::Kv(event) => Some(event.clone()),
        _ => None,
      })
      .collect()
  }

  /// The coordinator's verdict on `txn`, once there is one.
  pub fn outcome(&self, txn: &TxnId) -> Option<Outcome> {
    self.lock().iter().find_map(|r| match r {
      LogRecord::Kv(e) if e.side == Side::Coordinator && &e.txn == txn => Some(e.outcome),
      _ => None,
    })
  }

  /// The coordinator's full event for `txn`, once there is one.
  pub fn coordinator_event(&self, txn: &TxnId) -> Option<KvEvent> {
    self.lock().iter().find_map(|r| match r {
      LogRecord::Kv(e) if e.side == Side::Coordinator && &e.txn == txn => Some(e.clone()),
      _ => None,
    })
  }

  /// Replica-side events of kind `op` for `key` with the given outcome.
  pub fn replica_events(&self, op: OpKind, key: &str, outcome: Outcome) -> Vec<KvEvent> {
    self
      .lock()
      .iter()
      .filter_map(|r| match r {
        LogRecord::Kv(e)
          if e.side == Side::Replica && e.op == op && e.key == key && e.outcome == outcome =>
        {
          Some(e.clone())
        }
        _ => None,
      })
      .collect()
  }

  /// Nodes `observer` has seen removed.
  pub fn removed_by(&self, observer: &Address) -> Vec<Address> {
    self
      .lock()
      .iter()
      .filter_map(|r| match r {
        LogRecord::Removed {
          observer: o,
          removed,
        } if o == observer => Some(*removed),
        _ => None,
      })
      .collect()
  }

  pub fn clear(&self) {
    self.lock().clear();
  }
}
impl EventLog for RecordingLog {
  fn node_added(&self, observer: &Address, added: &Address) {
    trace!(node = %observer, added = %added, "node joined");
    self.lock().push(LogRecord::Added {
      observer: *observer,
      added: *added,
    });
  }

  fn node_removed(&self, observer: &Address, removed: &Address) {
    trace!(node = %observer, removed = %removed, "node removed");
    self.lock().push(LogRecord::Removed {
      observer: *observer,
      removed: *removed,
    });
  }

  fn kv(&self, event: KvEvent) {
    trace!(node = %event.node, "{}", event);
    self.lock().push(LogRecord::Kv(event));
  }
}
