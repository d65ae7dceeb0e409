use ringkv::cluster::{ClusterConfig, MemberState};
use ringkv::core::{Address, NodeConfig};
use ringkv::testkit::{FailureConfig, FailureConfigMap, Simulation};

const CONVERGE_LIMIT: u64 = 200;

fn config() -> NodeConfig {
  NodeConfig {
    cluster: ClusterConfig {
      seed: Some(42),
      ..ClusterConfig::default()
    },
    ..NodeConfig::default()
  }
}

#[test]
fn membership_converges_without_churn() {
  let mut sim = Simulation::new(config(), 1);
  sim.spawn_group(8).unwrap();
  assert!(sim.run_until(CONVERGE_LIMIT, Simulation::converged));
  // stays converged
  sim.run(50);
  assert!(sim.converged());
  for node in sim.live_nodes() {
    assert_eq!(node.state(), MemberState::Joined);
    assert_eq!(node.members().len(), 8);
  }
  for observer in sim.live_addresses() {
    assert!(sim.log().removed_by(&observer).is_empty());
  }
}

#[test]
fn membership_converges_over_a_lossy_network() {
  let failures = FailureConfigMap {
    cluster_wide: FailureConfig {
      drop_prob: 0.05,
      delay: Some((0, 2)),
    },
    ..FailureConfigMap::default()
  };
  let mut sim = Simulation::with_failures(config(), 7, failures);
  sim.spawn_group(6).unwrap();
  assert!(sim.run_until(CONVERGE_LIMIT, Simulation::converged));
  assert!(sim.net().dropped() > 0);
}

#[test]
fn failed_node_is_evicted_everywhere() {
  let mut sim = Simulation::new(config(), 2);
  sim.spawn_group(6).unwrap();
  assert!(sim.run_until(CONVERGE_LIMIT, Simulation::converged));
  let dead = Simulation::address(4);
  sim.fail(&dead);
  let t_remove = config().cluster.t_remove;
  let gone = |sim: &Simulation| sim.live_nodes().all(|n| !n.members().contains_key(&dead));
  assert!(sim.run_until(t_remove + 20, gone));
  for observer in sim.live_addresses() {
    assert_eq!(sim.log().removed_by(&observer), vec![dead]);
  }
  // nobody gossips it back in
  sim.run(2 * t_remove);
  assert!(gone(&sim));
  assert!(sim.converged());
}

#[test]
fn lost_join_request_is_retried() {
  let mut sim = Simulation::new(config(), 3);
  sim.spawn(Simulation::address(1)).unwrap();
  sim.tick();
  let mut failures = FailureConfigMap::default();
  failures
    .node_wide
    .insert(Simulation::address(1), FailureConfig::lossy(1.0));
  sim.net().set_failures(failures);
  let joiner = Simulation::address(2);
  sim.spawn(joiner).unwrap();
  sim.run(3);
  assert_eq!(sim.node(&joiner).unwrap().state(), MemberState::Joining);
  assert_eq!(sim.node(&joiner).unwrap().heartbeat(), 0);

  sim.net().set_failures(FailureConfigMap::default());
  let join_timeout = config().cluster.join_timeout;
  assert!(sim.run_until(2 * join_timeout, |s| s
    .node(&joiner)
    .map_or(false, |n| n.is_joined())));
  assert!(sim.run_until(CONVERGE_LIMIT, Simulation::converged));
}

#[test]
fn rings_agree_once_tables_agree() {
  let mut sim = Simulation::new(config(), 4);
  sim.spawn_group(7).unwrap();
  assert!(sim.run_until(CONVERGE_LIMIT, Simulation::converged));
  let rings = sim
    .live_nodes()
    .map(|n| n.replication().ring().clone())
    .collect::<Vec<_>>();
  assert_eq!(rings[0].len(), 7);
  assert!(rings.iter().all(|r| r == &rings[0]));
  for k in 0..50 {
    let key = format!("key-{}", k);
    let expected = rings[0].find_replicas(&key);
    for node in sim.live_nodes() {
      assert_eq!(node.replication().ring().find_replicas(&key), expected);
    }
  }
}

#[test]
fn duplicate_address_cannot_join() {
  let mut sim = Simulation::new(config(), 5);
  sim.spawn(Address::new(1, 0)).unwrap();
  assert!(sim.spawn(Address::new(1, 0)).is_err());
}
