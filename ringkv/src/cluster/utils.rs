use crate::core::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The address every node contacts to join, unless configured otherwise.
pub const DEFAULT_INTRODUCER: Address = Address::new(1, 0);

/// Configures the membership protocol run by a [`Membership`](crate::cluster::Membership).
/// All durations are in ticks of the local heartbeat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
  /// The well-known node new members send their join request to. The node whose address equals
  /// this one starts the group instead of joining it.
  ///
  /// default: `0.0.0.1:0`
  pub introducer: Address,
  /// How stale an entry may get before it is suspected: it stops being gossiped and stops
  /// accepting second-hand heartbeats.
  ///
  /// default: `5`
  pub t_fail: u64,
  /// How stale an entry may get before it is removed. Must exceed `t_fail`.
  ///
  /// default: `20`
  pub t_remove: u64,
  /// The number of peers each gossip round is sent to.
  ///
  /// default: `3`
  pub gossip_fanout: usize,
  /// Ticks a joining node waits for a join reply before asking again.
  ///
  /// default: `10`
  pub join_timeout: u64,
  /// The maximum number of join requests sent before the node stops asking.
  ///
  /// default: `5`
  pub join_attempts: usize,
  /// Seeds gossip peer selection. `None` seeds from entropy.
  ///
  /// default: `None`
  pub seed: Option<u64>,
}
impl Default for ClusterConfig {
  fn default() -> Self {
    ClusterConfig {
      introducer: DEFAULT_INTRODUCER,
      t_fail: 5,
      t_remove: 20,
      gossip_fanout: 3,
      join_timeout: 10,
      join_attempts: 5,
      seed: None,
    }
  }
}
impl ClusterConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.t_remove <= self.t_fail {
      return Err(ConfigError::RemoveBeforeFail {
        t_fail: self.t_fail,
        t_remove: self.t_remove,
      });
    }
    if self.gossip_fanout == 0 {
      return Err(ConfigError::Zero("gossip_fanout"));
    }
    if self.join_timeout == 0 {
      return Err(ConfigError::Zero("join_timeout"));
    }
    if self.join_attempts == 0 {
      return Err(ConfigError::Zero("join_attempts"));
    }
    Ok(())
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("t_remove ({t_remove}) must be greater than t_fail ({t_fail})")]
  RemoveBeforeFail { t_fail: u64, t_remove: u64 },
  #[error("{0} must be greater than zero")]
  Zero(&'static str),
}

/// Where a node is in joining the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberState {
  Uninitialized,
  Joining,
  Joined,
}

/// What this node knows about one member of the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MembershipEntry {
  pub addr: Address,
  /// The heartbeat the member itself last reported.
  pub heartbeat: u64,
  /// This node's own heartbeat when the entry was last refreshed.
  pub local_timestamp: u64,
}
impl MembershipEntry {
  pub fn new(addr: Address, heartbeat: u64, local_timestamp: u64) -> MembershipEntry {
    MembershipEntry {
      addr,
      heartbeat,
      local_timestamp,
    }
  }

  /// Ticks since this entry was refreshed, as of local heartbeat `now`.
  pub fn staleness(&self, now: u64) -> u64 {
    now.saturating_sub(self.local_timestamp)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
  Added(Address),
  Removed(Address),
}

#[test]
fn test_default_config_is_valid() {
  assert_eq!(ClusterConfig::default().validate(), Ok(()));
}

#[test]
fn test_config_rejects_remove_before_fail() {
  let cfg = ClusterConfig {
    t_fail: 8,
    t_remove: 8,
    ..ClusterConfig::default()
  };
  assert_eq!(
    cfg.validate(),
    Err(ConfigError::RemoveBeforeFail {
      t_fail: 8,
      t_remove: 8
    })
  );
  let cfg = ClusterConfig {
    gossip_fanout: 0,
    ..ClusterConfig::default()
  };
  assert_eq!(cfg.validate(), Err(ConfigError::Zero("gossip_fanout")));
}
