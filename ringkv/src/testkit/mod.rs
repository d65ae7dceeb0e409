//! Running groups of nodes in one process, against a network that loses and delays datagrams
//! on request.

mod failure_config;
mod logging;
mod sim_net;
mod simulation;

#[rustfmt::skip]
pub use {
  failure_config::FailureConfig,
  failure_config::FailureConfigMap,
  logging::LogRecord,
  logging::RecordingLog,
  sim_net::SimNet,
  simulation::Simulation,
};
