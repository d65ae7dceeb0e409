use ringkv::cluster::ClusterConfig;
use ringkv::core::{Address, KvEvent, NodeConfig, Outcome};
use ringkv::kv::{OpKind, ReplicationConfig, TxnId};
use ringkv::testkit::Simulation;

const NODES: u32 = 5;

fn config(quorum_create: bool) -> NodeConfig {
  NodeConfig {
    cluster: ClusterConfig {
      seed: Some(11),
      ..ClusterConfig::default()
    },
    replication: ReplicationConfig {
      quorum_create,
      ..ReplicationConfig::default()
    },
  }
}

fn converged_group(quorum_create: bool) -> Simulation {
  let mut sim = Simulation::new(config(quorum_create), 9);
  sim.spawn_group(NODES).unwrap();
  assert!(sim.run_until(200, Simulation::converged));
  sim
}

fn replicas_of(sim: &Simulation, key: &str) -> Vec<Address> {
  let any = sim.live_addresses()[0];
  sim
    .node(&any)
    .unwrap()
    .replication()
    .ring()
    .find_replicas(key)
    .iter()
    .map(|n| n.addr)
    .collect()
}

fn holders_of(sim: &Simulation, key: &str) -> Vec<Address> {
  sim
    .live_nodes()
    .filter(|n| n.replication().local_value(key).is_some())
    .map(|n| *n.address())
    .collect()
}

/// Some live node that holds no replica of `key`.
fn outsider(sim: &Simulation, key: &str) -> Address {
  let replicas = replicas_of(sim, key);
  sim
    .live_addresses()
    .into_iter()
    .find(|a| !replicas.contains(a))
    .unwrap()
}

fn await_outcome(sim: &mut Simulation, txn: &TxnId) -> KvEvent {
  let timeout = config(false).replication.fail_timeout;
  assert!(sim.run_until(timeout + 5, |s| s.log().outcome(txn).is_some()));
  sim.log().coordinator_event(txn).unwrap()
}

#[test]
fn create_read_update_delete_round_trip() {
  let mut sim = converged_group(false);
  let client = Simulation::address(2);
  let mut sorted_replicas = replicas_of(&sim, "k");
  sorted_replicas.sort();

  let txn = sim.node_mut(&client).unwrap().create("k", "v1");
  let created = sim.log().coordinator_event(&txn).unwrap();
  assert_eq!(created.op, OpKind::Create);
  assert_eq!(created.outcome, Outcome::Success);
  sim.run(2);
  assert_eq!(holders_of(&sim, "k"), sorted_replicas);

  let txn = sim.node_mut(&client).unwrap().read("k");
  let read = await_outcome(&mut sim, &txn);
  assert_eq!(read.outcome, Outcome::Success);
  assert_eq!(read.value.as_deref(), Some("v1"));

  let txn = sim.node_mut(&client).unwrap().update("k", "v2");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Success);

  let txn = sim.node_mut(&client).unwrap().read("k");
  let read = await_outcome(&mut sim, &txn);
  assert_eq!(read.outcome, Outcome::Success);
  assert_eq!(read.value.as_deref(), Some("v2"));

  let txn = sim.node_mut(&client).unwrap().delete("k");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Success);
  assert!(holders_of(&sim, "k").is_empty());

  let txn = sim.node_mut(&client).unwrap().read("k");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Failure);
  assert_eq!(
    sim.log().replica_events(OpKind::Read, "k", Outcome::Failure).len(),
    3
  );
}

#[test]
fn update_of_missing_key_fails() {
  let mut sim = converged_group(false);
  let client = Simulation::address(3);
  let txn = sim.node_mut(&client).unwrap().update("nope", "v");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Failure);
  let txn = sim.node_mut(&client).unwrap().delete("nope");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Failure);
}

#[test]
fn quorum_survives_one_failed_replica() {
  let mut sim = converged_group(false);
  let client = outsider(&sim, "k");
  sim.node_mut(&client).unwrap().create("k", "v");
  sim.run(2);
  let replicas = replicas_of(&sim, "k");
  sim.fail(&replicas[0]);

  let txn = sim.node_mut(&client).unwrap().read("k");
  let read = await_outcome(&mut sim, &txn);
  assert_eq!(read.outcome, Outcome::Success);
  assert_eq!(read.value.as_deref(), Some("v"));

  let txn = sim.node_mut(&client).unwrap().update("k", "w");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Success);
}

#[test]
fn quorum_fails_with_two_failed_replicas() {
  let mut sim = converged_group(false);
  let client = outsider(&sim, "k");
  sim.node_mut(&client).unwrap().create("k", "v");
  sim.run(2);
  let replicas = replicas_of(&sim, "k");
  sim.fail(&replicas[0]);
  sim.fail(&replicas[1]);

  let issued_at = sim.node(&client).unwrap().heartbeat();
  let txn = sim.node_mut(&client).unwrap().read("k");
  let fail_timeout = config(false).replication.fail_timeout;
  sim.run(fail_timeout - 1);
  assert_eq!(sim.log().outcome(&txn), None);
  let read = await_outcome(&mut sim, &txn);
  assert_eq!(read.outcome, Outcome::Failure);
  assert!(sim.node(&client).unwrap().heartbeat() >= issued_at + fail_timeout);
}

#[test]
fn create_reports_success_even_when_no_replica_stores_it() {
  let mut sim = converged_group(false);
  let client = outsider(&sim, "k");
  for replica in replicas_of(&sim, "k") {
    sim.fail(&replica);
  }
  let txn = sim.node_mut(&client).unwrap().create("k", "v");
  assert_eq!(sim.log().outcome(&txn), Some(Outcome::Success));
  sim.run(2);
  assert!(holders_of(&sim, "k").is_empty());
}

#[test]
fn quorum_create_waits_for_acknowledgements() {
  let mut sim = converged_group(true);
  let client = outsider(&sim, "k");
  let txn = sim.node_mut(&client).unwrap().create("k", "v");
  assert_eq!(sim.log().outcome(&txn), None);
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Success);

  let replicas = replicas_of(&sim, "k2");
  let client = outsider(&sim, "k2");
  for replica in &replicas[..2] {
    sim.fail(replica);
  }
  let txn = sim.node_mut(&client).unwrap().create("k2", "v");
  assert_eq!(await_outcome(&mut sim, &txn).outcome, Outcome::Failure);
}

#[test]
fn operations_before_the_ring_fills_fail_at_once() {
  let mut sim = Simulation::new(config(false), 3);
  sim.spawn_group(2).unwrap();
  let txn = sim
    .node_mut(&Simulation::address(1))
    .unwrap()
    .create("k", "v");
  assert_eq!(sim.log().outcome(&txn), Some(Outcome::Failure));
}
