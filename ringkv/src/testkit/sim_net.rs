use crate::core::{Address, Transport, TransportError};
use crate::testkit::FailureConfigMap;
use crossbeam::channel::{unbounded, Receiver, Sender};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

struct InFlight {
  deliver_at: u64,
  to: Address,
  bytes: Vec<u8>,
}

struct NetState {
  now: u64,
  inboxes: BTreeMap<Address, Sender<Vec<u8>>>,
  in_flight: Vec<InFlight>,
  failures: FailureConfigMap,
  isolated: BTreeSet<Address>,
  rng: SmallRng,
  sent: u64,
  dropped: u64,
}

/// An in-memory network shared by every simulated node.
///
/// Nothing sent is visible before the next call to [`advance`](SimNet::advance). Datagrams to an
/// isolated node, from an isolated node, or to an address nobody registered are lost, as are
/// datagrams picked by the destination's [`FailureConfig`](crate::testkit::FailureConfig).
pub struct SimNet {
  state: Mutex<NetState>,
}
impl SimNet {
  pub fn new(seed: u64) -> SimNet {
    SimNet::with_failures(seed, FailureConfigMap::default())
  }

  pub fn with_failures(seed: u64, failures: FailureConfigMap) -> SimNet {
    SimNet {
      state: Mutex::new(NetState {
        now: 0,
        inboxes: BTreeMap::new(),
        in_flight: Vec::new(),
        failures,
        isolated: BTreeSet::new(),
        rng: SmallRng::seed_from_u64(seed),
        sent: 0,
        dropped: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, NetState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn set_failures(&self, failures: FailureConfigMap) {
    self.lock().failures = failures;
  }

  /// Cuts `addr` off in both directions. Datagrams already in flight to it are lost too.
  pub fn isolate(&self, addr: &Address) {
    self.lock().isolated.insert(*addr);
  }

  pub fn reconnect(&self, addr: &Address) {
    self.lock().isolated.remove(addr);
  }

  /// Moves the network one tick forward and delivers everything due by then.
  pub fn advance(&self) {
    let mut state = self.lock();
    state.now += 1;
    let now = state.now;
    let (due, later) = std::mem::take(&mut state.in_flight)
      .into_iter()
      .partition::<Vec<_>, _>(|d| d.deliver_at <= now);
    state.in_flight = later;
    for datagram in due {
      if state.isolated.contains(&datagram.to) {
        state.dropped += 1;
        continue;
      }
      let delivered = match state.inboxes.get(&datagram.to) {
        Some(inbox) => inbox.send(datagram.bytes).is_ok(),
        None => false,
      };
      if !delivered {
        state.dropped += 1;
      }
    }
  }

  /// Datagrams handed to the network so far.
  pub fn sent(&self) -> u64 {
    self.lock().sent
  }

  /// Datagrams lost so far, whatever the reason.
  pub fn dropped(&self) -> u64 {
    self.lock().dropped
  }

  pub fn in_flight(&self) -> usize {
    self.lock().in_flight.len()
  }
}
impl Transport for SimNet {
  fn register(&self, addr: &Address) -> Result<Receiver<Vec<u8>>, TransportError> {
    let mut state = self.lock();
    if state.inboxes.contains_key(addr) {
      return Err(TransportError::AddressInUse(*addr));
    }
    let (tx, rx) = unbounded();
    state.inboxes.insert(*addr, tx);
    Ok(rx)
  }

  fn send(&self, from: &Address, to: &Address, bytes: Vec<u8>) {
    let mut state = self.lock();
    state.sent += 1;
    if state.isolated.contains(from) || state.isolated.contains(to) {
      state.dropped += 1;
      return;
    }
    let cfg = *state.failures.get(to);
    if cfg.drop_prob > 0.0 && state.rng.gen::<f64>() < cfg.drop_prob {
      trace!(from = %from, to = %to, "dropping datagram");
      state.dropped += 1;
      return;
    }
    let delay = match cfg.delay {
      Some((min, max)) if min < max => state.rng.gen_range(min..=max),
      Some((min, _)) => min,
      None => 0,
    };
    let deliver_at = state.now + 1 + delay;
    state.in_flight.push(InFlight {
      deliver_at,
      to: *to,
      bytes,
    });
  }
}

#[cfg(test)]
use crate::testkit::FailureConfig;

#[cfg(test)]
fn addr(n: u32) -> Address {
  Address::new(n, 0)
}

#[test]
fn test_delivery_waits_for_advance() {
  let net = SimNet::new(0);
  let inbox = net.register(&addr(2)).unwrap();
  net.send(&addr(1), &addr(2), vec![1]);
  assert!(inbox.try_recv().is_err());
  net.advance();
  assert_eq!(inbox.try_recv().unwrap(), vec![1]);
  assert!(matches!(
    net.register(&addr(2)),
    Err(TransportError::AddressInUse(_))
  ));
}

#[test]
fn test_isolation_and_unknown_destinations() {
  let net = SimNet::new(0);
  let inbox = net.register(&addr(2)).unwrap();
  net.isolate(&addr(1));
  net.send(&addr(1), &addr(2), vec![1]);
  net.send(&addr(2), &addr(1), vec![2]);
  net.reconnect(&addr(1));
  net.send(&addr(1), &addr(3), vec![3]);
  net.advance();
  assert!(inbox.try_recv().is_err());
  assert_eq!(net.sent(), 3);
  assert_eq!(net.dropped(), 3);
}

#[test]
fn test_delay_and_loss() {
  let mut failures = FailureConfigMap::default();
  failures.node_wide.insert(
    addr(2),
    FailureConfig {
      drop_prob: 0.0,
      delay: Some((2, 2)),
    },
  );
  failures.node_wide.insert(addr(3), FailureConfig::lossy(1.0));
  let net = SimNet::with_failures(0, failures);
  let slow = net.register(&addr(2)).unwrap();
  let lossy = net.register(&addr(3)).unwrap();
  net.send(&addr(1), &addr(2), vec![1]);
  net.send(&addr(1), &addr(3), vec![1]);
  net.advance();
  net.advance();
  assert!(slow.try_recv().is_err());
  net.advance();
  assert_eq!(slow.try_recv().unwrap(), vec![1]);
  assert!(lossy.try_recv().is_err());
  assert_eq!(net.in_flight(), 0);
}
