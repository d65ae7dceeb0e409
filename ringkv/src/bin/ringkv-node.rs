//! Runs one node over UDP, with an interactive console on standard input.
//!
//! ```bash
//! # the introducer
//! ringkv-node --host 127.0.0.1 --port 7000 --introducer 127.0.0.1:7000
//! # everybody else
//! ringkv-node --host 127.0.0.1 --port 7001 --introducer 127.0.0.1:7000
//! ```

use clap::Parser;
use ringkv::cluster::ClusterConfig;
use ringkv::console::{ConsoleCommand, HELP};
use ringkv::core::{Address, Node, NodeConfig, TracingLog, UdpTransport};
use ringkv::kv::{ReplicationConfig, StoredRecord};
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one member of a ringkv group")]
struct Args {
  /// IPv4 address to bind.
  #[arg(long, default_value = "127.0.0.1")]
  host: Ipv4Addr,

  /// UDP port to bind.
  #[arg(long)]
  port: u16,

  /// Address of the node everybody joins through. A node started at this address founds the
  /// group.
  #[arg(long)]
  introducer: Address,

  /// Milliseconds between ticks.
  #[arg(long, default_value_t = 100)]
  tick_ms: u64,

  /// Ticks without news before a member is suspected.
  #[arg(long, default_value_t = ClusterConfig::default().t_fail)]
  t_fail: u64,

  /// Ticks without news before a member is removed.
  #[arg(long, default_value_t = ClusterConfig::default().t_remove)]
  t_remove: u64,

  /// Wait for a quorum of acknowledgements before reporting a create.
  #[arg(long)]
  quorum_create: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();
  let args = Args::parse();
  let addr = Address::from(std::net::SocketAddrV4::new(args.host, args.port));
  let config = NodeConfig {
    cluster: ClusterConfig {
      introducer: args.introducer,
      t_fail: args.t_fail,
      t_remove: args.t_remove,
      ..ClusterConfig::default()
    },
    replication: ReplicationConfig {
      quorum_create: args.quorum_create,
      ..ReplicationConfig::default()
    },
  };

  let transport = match UdpTransport::bind(addr).await {
    Ok(transport) => Arc::new(transport),
    Err(err) => {
      tracing::error!(node = %addr, error = %err, "could not bind");
      return ExitCode::FAILURE;
    }
  };
  let mut node = Node::new(addr, config, transport, Arc::new(TracingLog));
  if let Err(err) = node.start() {
    tracing::error!(node = %addr, error = %err, "could not join");
    return ExitCode::FAILURE;
  }
  println!("{} started. Type HELP (or h) for commands.", addr);

  let (tx, mut lines) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = stdin.next_line().await {
      if tx.send(line).is_err() {
        break;
      }
    }
  });

  let mut interval = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
  loop {
    tokio::select! {
      _ = interval.tick() => node.tick(),
      line = lines.recv() => {
        let line = match line {
          Some(line) => line,
          None => break,
        };
        if line.trim().is_empty() {
          continue;
        }
        match ConsoleCommand::parse(&line) {
          Ok(ConsoleCommand::Exit) => break,
          Ok(cmd) => execute(&mut node, cmd),
          Err(err) => println!("ERROR: {}", err),
        }
      }
    }
  }
  ExitCode::SUCCESS
}

fn execute(node: &mut Node, cmd: ConsoleCommand) {
  match cmd {
    ConsoleCommand::Create { key, value } => println!("issued {}", node.create(&key, &value)),
    ConsoleCommand::Read { key } => println!("issued {}", node.read(&key)),
    ConsoleCommand::Update { key, value } => println!("issued {}", node.update(&key, &value)),
    ConsoleCommand::Delete { key } => println!("issued {}", node.delete(&key)),
    ConsoleCommand::Members => {
      println!("{:?} at heartbeat {}", node.state(), node.heartbeat());
      for entry in node.members().values() {
        println!(
          "  {} heartbeat={} seen={}",
          entry.addr, entry.heartbeat, entry.local_timestamp
        );
      }
    }
    ConsoleCommand::Store => {
      let entries = node.replication().store().entries();
      if entries.is_empty() {
        println!("  store: empty");
      }
      for (key, bytes) in entries {
        match StoredRecord::decode(&bytes) {
          Ok(record) => println!(
            "  {} = {} ({:?}, written at {})",
            key, record.value, record.role, record.timestamp
          ),
          Err(err) => println!("  {} = <{}>", key, err),
        }
      }
    }
    ConsoleCommand::Help => println!("{}", HELP),
    ConsoleCommand::Exit => {}
  }
}
