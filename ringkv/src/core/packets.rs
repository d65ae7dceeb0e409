use crate::cluster::Gossip;
use crate::core::Address;
use crate::kv::{ReplicaRole, TxnId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bumped whenever the layout of [`Message`] changes incompatibly.
pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
  #[error("encoding failed: {0}")]
  Encode(#[source] serde_cbor::Error),
  #[error("decoding failed: {0}")]
  Decode(#[source] serde_cbor::Error),
  #[error("unsupported wire version {found}, expected {expected}")]
  Version { found: u8, expected: u8 },
}

/// Everything one node can say to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
  JoinRequest { from: Address, heartbeat: u64 },
  JoinReply(Gossip),
  Gossip(Gossip),
  Kv(KvMsg),
}
impl Message {
  pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
    let envelope = Envelope {
      version: WIRE_VERSION,
      msg: self.clone(),
    };
    serde_cbor::to_vec(&envelope).map_err(CodecError::Encode)
  }

  pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    // The version is checked before the body so that a peer speaking a newer layout is
    // reported as such rather than as garbage.
    let header: EnvelopeHeader =
      serde_cbor::from_slice(bytes).map_err(CodecError::Decode)?;
    if header.version != WIRE_VERSION {
      return Err(CodecError::Version {
        found: header.version,
        expected: WIRE_VERSION,
      });
    }
    let envelope: Envelope =
      serde_cbor::from_slice(bytes).map_err(CodecError::Decode)?;
    Ok(envelope.msg)
  }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
  version: u8,
  msg: Message,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
  version: u8,
}

/// A key-value request or response. `txn` ties responses to the operation that caused them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvMsg {
  pub txn: TxnId,
  pub from: Address,
  pub key: String,
  pub op: KvOp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KvOp {
  /// `ack` asks the replica to confirm a successful insert with [`KvOp::Reply`].
  Create {
    value: String,
    role: ReplicaRole,
    ack: bool,
  },
  Read,
  Update {
    value: String,
    role: ReplicaRole,
  },
  Delete,
  Reply,
  ReadReply {
    value: String,
  },
}

#[cfg(test)]
use crate::cluster::GossipEntry;

#[test]
fn test_gossip_round_trip() {
  let msg = Message::Gossip(Gossip {
    from: Address::new(3, 0),
    heartbeat: 42,
    entries: vec![
      GossipEntry {
        addr: Address::new(1, 0),
        heartbeat: 40,
      },
      GossipEntry {
        addr: Address::new(2, 7),
        heartbeat: 0,
      },
    ],
  });
  let bytes = msg.encode().unwrap();
  assert_eq!(Message::decode(&bytes).unwrap(), msg);
}

#[test]
fn test_kv_round_trip_keeps_every_field() {
  let msg = Message::Kv(KvMsg {
    txn: TxnId {
      origin: Address::new(5, 1),
      seq: u64::MAX,
    },
    from: Address::new(5, 1),
    key: "k".to_string(),
    op: KvOp::Create {
      value: "".to_string(),
      role: ReplicaRole::Tertiary,
      ack: true,
    },
  });
  let bytes = msg.encode().unwrap();
  assert_eq!(Message::decode(&bytes).unwrap(), msg);
}

#[test]
fn test_rejects_foreign_version() {
  #[derive(Serialize)]
  struct Future {
    version: u8,
    msg: u32,
  }
  let bytes = serde_cbor::to_vec(&Future {
    version: WIRE_VERSION + 1,
    msg: 7,
  })
  .unwrap();
  match Message::decode(&bytes) {
    Err(CodecError::Version { found, expected }) => {
      assert_eq!(found, WIRE_VERSION + 1);
      assert_eq!(expected, WIRE_VERSION);
    }
    other => panic!("expected version error, got {:?}", other),
  }
}

#[test]
fn test_rejects_garbage() {
  assert!(matches!(
    Message::decode(&[0xff, 0x00, 0x13]),
    Err(CodecError::Decode(_))
  ));
}
