//! Commands accepted on a node's standard input.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
  Create { key: String, value: String },
  Read { key: String },
  Update { key: String, value: String },
  Delete { key: String },
  Members,
  Store,
  Help,
  Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
  #[error("empty command")]
  Empty,
  #[error("{command} takes {usage}")]
  Arity {
    command: &'static str,
    usage: &'static str,
  },
  #[error("unknown command {0:?}, try HELP")]
  Unknown(String),
}

pub const HELP: &str = "\
Commands (case-insensitive):
  CREATE <key> <value>  (alias: c)  store a new key
  READ <key>            (alias: r)  read a key
  UPDATE <key> <value>  (alias: u)  overwrite an existing key
  DELETE <key>          (alias: d)  delete a key
  MEMBERS               (alias: m)  list known members
  STORE                 (alias: s)  list keys held by this node
  HELP                  (alias: h)  show this message
  EXIT                  (alias: e)  stop this node";

impl ConsoleCommand {
  /// Parses one line of input. Keys and values are single words.
  pub fn parse(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let parts = line.split_whitespace().collect::<Vec<_>>();
    let first = match parts.first() {
      Some(first) => first.to_uppercase(),
      None => return Err(ConsoleError::Empty),
    };
    let command = match first.as_str() {
      "C" | "CREATE" => "CREATE",
      "R" | "READ" => "READ",
      "U" | "UPDATE" => "UPDATE",
      "D" | "DELETE" => "DELETE",
      "M" | "MEMBERS" => "MEMBERS",
      "S" | "STORE" => "STORE",
      "H" | "HELP" => "HELP",
      "E" | "EXIT" => "EXIT",
      _ => return Err(ConsoleError::Unknown(parts[0].to_string())),
    };
    let args = &parts[1..];
    match (command, args) {
      ("CREATE", [key, value]) => Ok(ConsoleCommand::Create {
        key: key.to_string(),
        value: value.to_string(),
      }),
      ("READ", [key]) => Ok(ConsoleCommand::Read {
        key: key.to_string(),
      }),
      ("UPDATE", [key, value]) => Ok(ConsoleCommand::Update {
        key: key.to_string(),
        value: value.to_string(),
      }),
      ("DELETE", [key]) => Ok(ConsoleCommand::Delete {
        key: key.to_string(),
      }),
      ("MEMBERS", []) => Ok(ConsoleCommand::Members),
      ("STORE", []) => Ok(ConsoleCommand::Store),
      ("HELP", []) => Ok(ConsoleCommand::Help),
      ("EXIT", []) => Ok(ConsoleCommand::Exit),
      (command, _) => Err(ConsoleError::Arity {
        command,
        usage: usage(command),
      }),
    }
  }
}

fn usage(command: &str) -> &'static str {
  match command {
    "CREATE" | "UPDATE" => "a key and a value",
    "READ" | "DELETE" => "a key",
    _ => "no arguments",
  }
}

#[test]
fn test_commands_and_aliases() {
  assert_eq!(
    ConsoleCommand::parse("create k v"),
    Ok(ConsoleCommand::Create {
      key: "k".to_string(),
      value: "v".to_string()
    })
  );
  assert_eq!(
    ConsoleCommand::parse("  U   k  w "),
    Ok(ConsoleCommand::Update {
      key: "k".to_string(),
      value: "w".to_string()
    })
  );
  assert_eq!(
    ConsoleCommand::parse("r k"),
    Ok(ConsoleCommand::Read {
      key: "k".to_string()
    })
  );
  assert_eq!(
    ConsoleCommand::parse("Delete k"),
    Ok(ConsoleCommand::Delete {
      key: "k".to_string()
    })
  );
  assert_eq!(ConsoleCommand::parse("m"), Ok(ConsoleCommand::Members));
  assert_eq!(ConsoleCommand::parse("STORE"), Ok(ConsoleCommand::Store));
  assert_eq!(ConsoleCommand::parse("h"), Ok(ConsoleCommand::Help));
  assert_eq!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit));
}

#[test]
fn test_parse_errors() {
  assert_eq!(ConsoleCommand::parse("   "), Err(ConsoleError::Empty));
  assert_eq!(
    ConsoleCommand::parse("put k v"),
    Err(ConsoleError::Unknown("put".to_string()))
  );
  assert_eq!(
    ConsoleCommand::parse("c k"),
    Err(ConsoleError::Arity {
      command: "CREATE",
      usage: "a key and a value"
    })
  );
  assert_eq!(
    ConsoleCommand::parse("read"),
    Err(ConsoleError::Arity {
      command: "READ",
      usage: "a key"
    })
  );
  assert_eq!(
    ConsoleCommand::parse("exit now"),
    Err(ConsoleError::Arity {
      command: "EXIT",
      usage: "no arguments"
    })
  );
}
