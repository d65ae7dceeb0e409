//! The pieces every node is built from: addresses, the wire format, the transport a node sends
//! through, the log it reports to, and the [`Node`] driver tying membership and replication
//! together.
//!
//! ### Messages
//! Every datagram carries exactly one [`Message`], CBOR-encoded inside a small envelope that
//! names the wire version. A datagram with an unknown version or a body that does not decode is
//! dropped by the receiving node with a warning.
//!
//! ### Transports
//! A [`Transport`] hands each node the queue its datagrams arrive on and sends datagrams
//! best-effort. [`UdpTransport`] is the real one; the
//! [`SimNet`](crate::testkit::SimNet) in the testkit emulates a lossy network in memory.
//!
//! ### Driving a Node
//! Nodes are single-threaded and passive. The owner calls [`Node::tick`] periodically:
//!
//! ```ignore
//! let transport = Arc::new(UdpTransport::bind(addr).await?);
//! let mut node = Node::new(addr, NodeConfig::default(), transport, Arc::new(TracingLog));
//! node.start()?;
//! loop {
//!   interval.tick().await;
//!   node.tick();
//! }
//! ```

mod logging;
mod node;
mod packets;
mod remoting;
mod udp;

#[rustfmt::skip]
pub use {
  logging::EventLog,
  logging::KvEvent,
  logging::Outcome,
  logging::Side,
  logging::TracingLog,
  node::JoinError,
  node::Node,
  node::NodeConfig,
  packets::CodecError,
  packets::KvMsg,
  packets::KvOp,
  packets::Message,
  packets::WIRE_VERSION,
  remoting::Address,
  remoting::Remote,
  remoting::Transport,
  remoting::TransportError,
  udp::UdpTransport,
};
