use crate::core::CodecError;
use crate::kv::ReplicaRole;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Exact-match storage local to one node. Success is decided purely by key existence:
/// `create` fails if the key is present, `update` and `delete` fail if it is absent.
pub trait LocalStore: Send {
  fn create(&mut self, key: &str, record: Vec<u8>) -> bool;
  fn read(&self, key: &str) -> Option<Vec<u8>>;
  fn update(&mut self, key: &str, record: Vec<u8>) -> bool;
  fn delete(&mut self, key: &str) -> bool;
  /// Every stored pair, in key order.
  fn entries(&self) -> Vec<(String, Vec<u8>)>;
  fn is_empty(&self) -> bool;
}

/// In-memory [`LocalStore`].
#[derive(Clone, Debug, Default)]
pub struct HashTable {
  table: BTreeMap<String, Vec<u8>>,
}
impl HashTable {
  pub fn new() -> HashTable {
    HashTable::default()
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }
}
impl LocalStore for HashTable {
  fn create(&mut self, key: &str, record: Vec<u8>) -> bool {
    if self.table.contains_key(key) {
      return false;
    }
    self.table.insert(key.to_string(), record);
    true
  }

  fn read(&self, key: &str) -> Option<Vec<u8>> {
    self.table.get(key).cloned()
  }

  fn update(&mut self, key: &str, record: Vec<u8>) -> bool {
    match self.table.get_mut(key) {
      Some(slot) => {
        *slot = record;
        true
      }
      None => false,
    }
  }

  fn delete(&mut self, key: &str) -> bool {
    self.table.remove(key).is_some()
  }

  fn entries(&self) -> Vec<(String, Vec<u8>)> {
    self.table.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
  }

  fn is_empty(&self) -> bool {
    self.table.is_empty()
  }
}

/// What a replica keeps for each key. `role` only records which replica this copy was written
/// as; reads ignore it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
  pub value: String,
  pub timestamp: u64,
  pub role: ReplicaRole,
}
impl StoredRecord {
  pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
    serde_cbor::to_vec(self).map_err(CodecError::Encode)
  }

  pub fn decode(bytes: &[u8]) -> Result<StoredRecord, CodecError> {
    serde_cbor::from_slice(bytes).map_err(CodecError::Decode)
  }
}

#[test]
fn test_existence_semantics() {
  let mut ht = HashTable::new();
  assert!(ht.is_empty());
  assert!(!ht.update("a", vec![1]));
  assert!(!ht.delete("a"));
  assert!(ht.create("a", vec![1]));
  assert!(!ht.create("a", vec![2]));
  assert_eq!(ht.read("a"), Some(vec![1]));
  assert!(ht.update("a", vec![3]));
  assert_eq!(ht.read("a"), Some(vec![3]));
  assert!(ht.delete("a"));
  assert_eq!(ht.read("a"), None);
  assert!(ht.is_empty());
}

#[test]
fn test_entries_are_key_ordered() {
  let mut ht = HashTable::new();
  for k in &["b", "c", "a"] {
    ht.create(k, k.as_bytes().to_vec());
  }
  let keys = ht.entries().into_iter().map(|(k, _)| k).collect::<Vec<_>>();
  assert_eq!(keys, vec!["a", "b", "c"]);
  assert_eq!(ht.len(), 3);
}

#[test]
fn test_record_round_trip() {
  let record = StoredRecord {
    value: "v1".to_string(),
    timestamp: 17,
    role: ReplicaRole::Secondary,
  };
  let bytes = record.encode().unwrap();
  assert_eq!(StoredRecord::decode(&bytes).unwrap(), record);
}
