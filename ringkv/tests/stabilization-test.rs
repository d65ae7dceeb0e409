use ringkv::cluster::ClusterConfig;
use ringkv::core::{Address, NodeConfig, Outcome};
use ringkv::kv::OpKind;
use ringkv::testkit::Simulation;

const KEYS: usize = 24;

fn config() -> NodeConfig {
  NodeConfig {
    cluster: ClusterConfig {
      seed: Some(5),
      ..ClusterConfig::default()
    },
    ..NodeConfig::default()
  }
}

fn key(i: usize) -> String {
  format!("key-{}", i)
}

fn populated_group(n: u32) -> Simulation {
  let mut sim = Simulation::new(config(), 13);
  sim.spawn_group(n).unwrap();
  assert!(sim.run_until(200, Simulation::converged));
  let client = Simulation::address(1);
  for i in 0..KEYS {
    let value = format!("value-{}", i);
    sim.node_mut(&client).unwrap().create(&key(i), &value);
  }
  sim.run(3);
  assert_placement(&sim);
  sim
}

/// Every key is held by exactly its current replicas, with its original value.
fn assert_placement(sim: &Simulation) {
  let ring = sim.live_nodes().next().unwrap().replication().ring().clone();
  for i in 0..KEYS {
    let mut replicas = ring
      .find_replicas(&key(i))
      .iter()
      .map(|n| n.addr)
      .collect::<Vec<_>>();
    replicas.sort();
    let holders = sim
      .live_nodes()
      .filter(|n| n.replication().local_value(&key(i)).is_some())
      .map(|n| *n.address())
      .collect::<Vec<_>>();
    assert_eq!(holders, replicas, "placement of {}", key(i));
    for holder in holders {
      let value = sim.node(&holder).unwrap().replication().local_value(&key(i));
      assert_eq!(value, Some(format!("value-{}", i)));
    }
  }
}

fn settled(sim: &mut Simulation, limit: u64) {
  assert!(sim.run_until(limit, Simulation::converged));
  // let the last round of re-creates land
  sim.run(3);
}

#[test]
fn keys_move_off_a_failed_node() {
  let mut sim = populated_group(6);
  let ring = sim.live_nodes().next().unwrap().replication().ring().clone();
  let victim = ring.find_replicas(&key(0))[0].addr;
  let held = (0..KEYS)
    .filter(|i| ring.is_replica(&key(*i), &victim))
    .count();
  assert!(held > 0);

  sim.fail(&victim);
  settled(&mut sim, 100);
  assert!(sim.live_nodes().all(|n| n.replication().ring().len() == 5));
  assert_placement(&sim);
  // the keys stay readable through the usual quorum path
  let reader = sim.live_addresses()[0];
  let txn = sim.node_mut(&reader).unwrap().read(&key(0));
  assert!(sim.run_until(10, |s| s.log().outcome(&txn).is_some()));
  let read = sim.log().coordinator_event(&txn).unwrap();
  assert_eq!(read.outcome, Outcome::Success);
  assert_eq!(read.value.as_deref(), Some("value-0"));
}

#[test]
fn failing_a_bystander_leaves_a_key_in_place() {
  let mut sim = populated_group(6);
  let ring = sim.live_nodes().next().unwrap().replication().ring().clone();
  let owners = ring
    .find_replicas(&key(0))
    .iter()
    .map(|n| n.addr)
    .collect::<Vec<_>>();
  let bystander = sim
    .live_addresses()
    .into_iter()
    .find(|a| !owners.contains(a))
    .unwrap();

  sim.fail(&bystander);
  settled(&mut sim, 100);
  let ring = sim.live_nodes().next().unwrap().replication().ring().clone();
  assert_eq!(ring.len(), 5);
  let after = ring
    .find_replicas(&key(0))
    .iter()
    .map(|n| n.addr)
    .collect::<Vec<_>>();
  assert_eq!(after, owners);
  assert_placement(&sim);

  let reader = sim.live_addresses()[0];
  let txn = sim.node_mut(&reader).unwrap().read(&key(0));
  assert!(sim.run_until(10, |s| s.log().outcome(&txn).is_some()));
  let read = sim.log().coordinator_event(&txn).unwrap();
  assert_eq!(read.outcome, Outcome::Success);
  assert_eq!(read.value.as_deref(), Some("value-0"));
}

#[test]
fn keys_move_onto_a_new_node() {
  let mut sim = populated_group(5);
  let newcomer = Address::new(6, 0);
  sim.spawn(newcomer).unwrap();
  settled(&mut sim, 100);
  let ring = sim.node(&newcomer).unwrap().replication().ring().clone();
  assert_eq!(ring.len(), 6);
  let owned = (0..KEYS)
    .filter(|i| ring.is_replica(&key(*i), &newcomer))
    .count();
  assert!(owned > 0);
  assert_placement(&sim);
}

#[test]
fn unchanged_ring_does_not_stabilize() {
  let mut sim = populated_group(5);
  let created = sim
    .log()
    .replica_events(OpKind::Create, &key(0), Outcome::Success)
    .len();
  sim.run(30);
  assert_eq!(
    sim
      .log()
      .replica_events(OpKind::Create, &key(0), Outcome::Success)
      .len(),
    created
  );
  assert!(sim
    .log()
    .replica_events(OpKind::Create, &key(0), Outcome::Failure)
    .is_empty());
}
