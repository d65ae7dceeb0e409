use crate::core::{Address, EventLog, JoinError, Node, NodeConfig, Transport};
use crate::testkit::{FailureConfigMap, RecordingLog, SimNet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Many nodes over one [`SimNet`], all reporting to one [`RecordingLog`].
///
/// Each global tick runs every live node's [`tick`](Node::tick) in address order, then advances
/// the network. Failed nodes stay in the simulation but are never ticked again and are cut off
/// from the network.
pub struct Simulation {
  net: Arc<SimNet>,
  log: Arc<RecordingLog>,
  config: NodeConfig,
  nodes: BTreeMap<Address, Node>,
  failed: Vec<Address>,
  ticks: u64,
}
impl Simulation {
  pub fn new(config: NodeConfig, seed: u64) -> Simulation {
    Simulation::with_failures(config, seed, FailureConfigMap::default())
  }

  pub fn with_failures(config: NodeConfig, seed: u64, failures: FailureConfigMap) -> Simulation {
    Simulation {
      net: Arc::new(SimNet::with_failures(seed, failures)),
      log: Arc::new(RecordingLog::new()),
      config,
      nodes: BTreeMap::new(),
      failed: Vec::new(),
      ticks: 0,
    }
  }

  /// The address of the `n`th node; node 1 is the introducer under the default configuration.
  pub fn address(n: u32) -> Address {
    Address::new(n, 0)
  }

  /// Starts a node at `addr`.
  pub fn spawn(&mut self, addr: Address) -> Result<(), JoinError> {
    let transport: Arc<dyn Transport> = self.net.clone();
    let log: Arc<dyn EventLog> = self.log.clone();
    let mut node = Node::new(addr, self.config.clone(), transport, log);
    node.start()?;
    debug!(node = %addr, tick = self.ticks, "spawned");
    self.nodes.insert(addr, node);
    Ok(())
  }

  /// Starts nodes `1..=n`, one per tick so that the introducer is up before anybody asks it.
  pub fn spawn_group(&mut self, n: u32) -> Result<(), JoinError> {
    for i in 1..=n {
      self.spawn(Simulation::address(i))?;
      self.tick();
    }
    Ok(())
  }

  pub fn tick(&mut self) {
    let failed = &self.failed;
    for (addr, node) in self.nodes.iter_mut() {
      if !failed.contains(addr) {
        node.tick();
      }
    }
    self.net.advance();
    self.ticks += 1;
  }

  pub fn run(&mut self, ticks: u64) {
    for _ in 0..ticks {
      self.tick();
    }
  }

  /// Ticks until `done` holds, at most `limit` times. Returns whether it ever held.
  pub fn run_until<F>(&mut self, limit: u64, mut done: F) -> bool
  where
    F: FnMut(&Simulation) -> bool,
  {
    for _ in 0..limit {
      if done(self) {
        return true;
      }
      self.tick();
    }
    done(self)
  }

  /// Stops `addr` for good.
  pub fn fail(&mut self, addr: &Address) {
    if !self.is_failed(addr) {
      debug!(node = %addr, tick = self.ticks, "failing node");
      self.failed.push(*addr);
      self.net.isolate(addr);
    }
  }

  pub fn is_failed(&self, addr: &Address) -> bool {
    self.failed.contains(addr)
  }

  pub fn node(&self, addr: &Address) -> Option<&Node> {
    self.nodes.get(addr)
  }

  pub fn node_mut(&mut self, addr: &Address) -> Option<&mut Node> {
    self.nodes.get_mut(addr)
  }

  /// Every node that has not failed, in address order.
  pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
    self
      .nodes
      .iter()
      .filter(move |(addr, _)| !self.is_failed(addr))
      .map(|(_, node)| node)
  }

  pub fn live_addresses(&self) -> Vec<Address> {
    self.live_nodes().map(|n| *n.address()).collect()
  }

  /// Whether every live node knows exactly the live nodes.
  pub fn converged(&self) -> bool {
    let live = self.live_addresses();
    self.live_nodes().all(|node| {
      let members = node.members();
      members.len() == live.len() && live.iter().all(|a| members.contains_key(a))
    })
  }

  pub fn net(&self) -> &SimNet {
    &self.net
  }

  pub fn log(&self) -> &RecordingLog {
    &self.log
  }
}
