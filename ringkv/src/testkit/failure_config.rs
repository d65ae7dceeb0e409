use crate::core::Address;
use im::HashMap;
use serde::{Deserialize, Serialize};

/// How the emulated network mistreats datagrams headed for one node.
#[derive(Default, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FailureConfig {
  /// Probability that a datagram is lost.
  pub drop_prob: f64,
  /// Extra ticks a datagram spends in flight, drawn uniformly from the inclusive range.
  pub delay: Option<(u64, u64)>,
}
impl FailureConfig {
  pub fn lossy(drop_prob: f64) -> FailureConfig {
    FailureConfig {
      drop_prob,
      delay: None,
    }
  }
}

/// Failure settings for the whole group, overridden per destination.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FailureConfigMap {
  pub cluster_wide: FailureConfig,
  pub node_wide: HashMap<Address, FailureConfig>,
}
impl FailureConfigMap {
  pub fn get(&self, addr: &Address) -> &FailureConfig {
    self.node_wide.get(addr).unwrap_or(&self.cluster_wide)
  }
}

#[test]
fn test_node_wide_overrides_cluster_wide() {
  let mut map = FailureConfigMap {
    cluster_wide: FailureConfig::lossy(0.1),
    ..FailureConfigMap::default()
  };
  let slow = FailureConfig {
    drop_prob: 0.0,
    delay: Some((2, 4)),
  };
  map.node_wide.insert(Address::new(2, 0), slow);
  assert_eq!(map.get(&Address::new(1, 0)), &FailureConfig::lossy(0.1));
  assert_eq!(map.get(&Address::new(2, 0)), &slow);
}
