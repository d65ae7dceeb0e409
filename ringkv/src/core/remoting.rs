use crate::core::{CodecError, Message};
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Identifies one process in the group. The `id` is the IPv4 address of the process in network
/// byte order, so an [`Address`] converts losslessly to and from a [`SocketAddrV4`].
#[derive(
  Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize,
)]
pub struct Address {
  /// The host part of the address.
  pub id: u32,
  /// The port this process receives on.
  pub port: u16,
}
impl Address {
  /// Creates a new [`Address`].
  pub const fn new(id: u32, port: u16) -> Address {
    Address { id, port }
  }

  /// The host part of this address as an IPv4 address.
  pub fn ip(&self) -> Ipv4Addr {
    Ipv4Addr::from(self.id)
  }

  /// Where UDP datagrams for this address are sent.
  pub fn socket_addr(&self) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(self.ip(), self.port))
  }
}
impl From<SocketAddrV4> for Address {
  fn from(addr: SocketAddrV4) -> Self {
    Address::new(u32::from(*addr.ip()), addr.port())
  }
}
impl FromStr for Address {
  type Err = std::net::AddrParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SocketAddrV4::from_str(s).map(Address::from)
  }
}
impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.ip(), self.port)
  }
}

/// Failures raised while attaching a node to a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("failed to bind {addr}: {source}")]
  Bind {
    addr: Address,
    #[source]
    source: std::io::Error,
  },
  #[error("{requested} is not served by this transport (bound to {bound})")]
  NotLocal { requested: Address, bound: Address },
  #[error("{0} is already registered")]
  AddressInUse(Address),
}

/// The message-delivery substrate. Delivery is best-effort: datagrams may be dropped, delayed
/// or reordered.
pub trait Transport: Send + Sync {
  /// Supplies the inbound queue for `addr`. Each delivered item is one encoded datagram.
  fn register(&self, addr: &Address) -> Result<Receiver<Vec<u8>>, TransportError>;

  /// Sends `bytes` from `from` to `to`. Never blocks and never reports failure.
  fn send(&self, from: &Address, to: &Address, bytes: Vec<u8>);
}

/// A node's outbound handle: encodes [`Message`]s and hands them to the [`Transport`].
#[derive(Clone)]
pub struct Remote {
  addr: Address,
  transport: Arc<dyn Transport>,
}
impl Remote {
  pub fn new(addr: Address, transport: Arc<dyn Transport>) -> Remote {
    Remote { addr, transport }
  }

  pub fn addr(&self) -> &Address {
    &self.addr
  }

  pub fn register(&self) -> Result<Receiver<Vec<u8>>, TransportError> {
    self.transport.register(&self.addr)
  }

  /// Messages that fail to encode are dropped, like any other lost datagram.
  pub fn send(&self, to: &Address, msg: &Message) {
    match msg.encode() {
      Ok(bytes) => self.transport.send(&self.addr, to, bytes),
      Err(err) => log_encode_failure(&self.addr, to, err),
    }
  }
}

fn log_encode_failure(from: &Address, to: &Address, err: CodecError) {
  tracing::warn!(node = %from, to = %to, error = %err, "dropping unencodable message");
}

#[test]
fn test_address_socket_conversion() {
  let addr: Address = "127.0.0.1:7001".parse().unwrap();
  assert_eq!(addr.id, 0x7f00_0001);
  assert_eq!(addr.port, 7001);
  assert_eq!(addr.to_string(), "127.0.0.1:7001");
  assert_eq!(addr.socket_addr(), "127.0.0.1:7001".parse().unwrap());
  assert_eq!(Address::new(1, 0).to_string(), "0.0.0.1:0");
}

#[test]
fn test_address_order_is_id_then_port() {
  let mut addrs = vec![
    Address::new(2, 0),
    Address::new(1, 9),
    Address::new(1, 3),
  ];
  addrs.sort();
  assert_eq!(
    addrs,
    vec![Address::new(1, 3), Address::new(1, 9), Address::new(2, 0)]
  );
}
