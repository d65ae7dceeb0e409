use crate::core::{Address, Transport, TransportError};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM: usize = 65_507;

/// A [`Transport`] over one UDP socket. A background task moves every received datagram into
/// the queue handed out by [`register`](Transport::register).
///
/// Sends go through a non-blocking std handle on the same socket, so they never wait on the
/// runtime's readiness tracking.
pub struct UdpTransport {
  addr: Address,
  sender: std::net::UdpSocket,
  inbox: Mutex<Option<Receiver<Vec<u8>>>>,
}
impl UdpTransport {
  /// Binds `addr` and starts receiving. A port of zero picks a free one; see
  /// [`local_address`](UdpTransport::local_address). Must be called inside a tokio runtime.
  pub async fn bind(addr: Address) -> Result<UdpTransport, TransportError> {
    let bind_err = |source: std::io::Error| TransportError::Bind { addr, source };
    let std_socket = std::net::UdpSocket::bind(addr.socket_addr()).map_err(bind_err)?;
    std_socket.set_nonblocking(true).map_err(bind_err)?;
    let sender = std_socket.try_clone().map_err(bind_err)?;
    let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;
    let local = match socket.local_addr().map_err(bind_err)? {
      SocketAddr::V4(v4) => Address::from(v4),
      SocketAddr::V6(_) => addr,
    };
    let (tx, rx) = unbounded();
    tokio::spawn(recv_loop(local, socket, tx));
    Ok(UdpTransport {
      addr: local,
      sender,
      inbox: Mutex::new(Some(rx)),
    })
  }

  pub fn local_address(&self) -> &Address {
    &self.addr
  }
}
impl Transport for UdpTransport {
  fn register(&self, addr: &Address) -> Result<Receiver<Vec<u8>>, TransportError> {
    if addr != &self.addr {
      return Err(TransportError::NotLocal {
        requested: *addr,
        bound: self.addr,
      });
    }
    let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
    inbox.take().ok_or(TransportError::AddressInUse(*addr))
  }

  fn send(&self, _: &Address, to: &Address, bytes: Vec<u8>) {
    if let Err(err) = self.sender.send_to(&bytes, to.socket_addr()) {
      debug!(node = %self.addr, to = %to, error = %err, "datagram not sent");
    }
  }
}

async fn recv_loop(addr: Address, socket: UdpSocket, tx: Sender<Vec<u8>>) {
  let mut buf = vec![0u8; MAX_DATAGRAM];
  loop {
    match socket.recv_from(&mut buf).await {
      Ok((len, _)) => {
        if tx.send(buf[..len].to_vec()).is_err() {
          debug!(node = %addr, "inbox dropped, stopping receive loop");
          break;
        }
      }
      Err(err) => warn!(node = %addr, error = %err, "udp receive failed"),
    }
  }
}

#[cfg(test)]
use crate::core::Message;

#[test]
fn test_udp_delivery() {
  tokio_test::block_on(async {
    let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let a_addr = *a.local_address();
    let b_addr = *b.local_address();
    assert_ne!(b_addr.port, 0);

    let inbox = b.register(&b_addr).unwrap();
    assert!(matches!(
      b.register(&b_addr),
      Err(TransportError::AddressInUse(_))
    ));
    assert!(matches!(
      b.register(&a_addr),
      Err(TransportError::NotLocal { .. })
    ));

    let msg = Message::JoinRequest {
      from: a_addr,
      heartbeat: 3,
    };
    // straight after bind, with no chance for the runtime to poll either socket
    a.send(&a_addr, &b_addr, msg.encode().unwrap());
    let mut received = None;
    for _ in 0..200 {
      if let Ok(bytes) = inbox.try_recv() {
        received = Some(bytes);
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let bytes = received.expect("datagram never arrived");
    assert_eq!(Message::decode(&bytes).unwrap(), msg);
  });
}
