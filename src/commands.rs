//! Console commands for `outpost run` and their prefix/alias matching.

use crate::control::ControlMessage;

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
}

/// All console commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "fetch",
    aliases: &["f", "get"],
    description: "GET a path or URL through the layer",
  },
  Command {
    name: "sync",
    aliases: &["s", "force-sync"],
    description: "Replay queued mutations now",
  },
  Command {
    name: "status",
    aliases: &["st", "queue"],
    description: "Lifecycle state and queue depth",
  },
  Command {
    name: "version",
    aliases: &["v", "ver"],
    description: "Active and current version",
  },
  Command {
    name: "skip-waiting",
    aliases: &["skip", "activate"],
    description: "Activate a waiting install now",
  },
  Command {
    name: "push",
    aliases: &["p", "notify"],
    description: "Deliver a push payload (JSON or text)",
  },
  Command {
    name: "online",
    aliases: &["o", "reconnect"],
    description: "Signal that connectivity is back",
  },
  Command {
    name: "evict",
    aliases: &["e", "sweep"],
    description: "Trim namespaces to capacity",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Stop the runtime and exit",
  },
];

/// A resolved console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
  Fetch(String),
  Control(ControlMessage),
  Push(String),
  Online,
  Evict,
  Help,
  Quit,
}

/// Get suggestions for a given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    if cmd.name == input_lower {
      matches.push((cmd, 0));
      continue;
    }

    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
    }
  }

  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve a console line. `Err` carries a message for the user.
pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
  let line = line.trim();
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };
  if word.is_empty() {
    return Err("Type 'help' for commands".to_string());
  }

  let Some(cmd) = get_suggestions(word).into_iter().next() else {
    return Err(format!("Unknown command '{}'", word));
  };

  let command = match cmd.name {
    "fetch" if rest.is_empty() => return Err("Usage: fetch <path-or-url>".to_string()),
    "fetch" => ConsoleCommand::Fetch(rest.to_string()),
    "push" if rest.is_empty() => return Err("Usage: push <payload>".to_string()),
    "push" => ConsoleCommand::Push(rest.to_string()),
    "sync" => ConsoleCommand::Control(ControlMessage::ForceSync),
    "status" => ConsoleCommand::Control(ControlMessage::GetStatus),
    "version" => ConsoleCommand::Control(ControlMessage::GetVersion),
    "skip-waiting" => ConsoleCommand::Control(ControlMessage::SkipWaiting),
    "online" => ConsoleCommand::Online,
    "evict" => ConsoleCommand::Evict,
    "help" => ConsoleCommand::Help,
    _ => ConsoleCommand::Quit,
  };
  Ok(command)
}

/// One line per command for `help`
pub fn help() -> String {
  COMMANDS
    .iter()
    .map(|cmd| format!("  {:<14} {:<18} {}", cmd.name, cmd.aliases.join(", "), cmd.description))
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    assert_eq!(get_suggestions("").len(), COMMANDS.len());
  }

  #[test]
  fn test_exact_and_alias_match() {
    assert_eq!(get_suggestions("sync")[0].name, "sync");
    assert_eq!(get_suggestions("s")[0].name, "sync");
    assert_eq!(get_suggestions("?")[0].name, "help");
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(get_suggestions("sta")[0].name, "status");
    assert_eq!(get_suggestions("skip-w")[0].name, "skip-waiting");
  }

  #[test]
  fn test_parse_with_arguments() {
    assert_eq!(
      parse("fetch /api/projects").unwrap(),
      ConsoleCommand::Fetch("/api/projects".to_string())
    );
    assert_eq!(
      parse("  p  Crew meeting at 7am ").unwrap(),
      ConsoleCommand::Push("Crew meeting at 7am".to_string())
    );
    assert!(parse("fetch").is_err());
  }

  #[test]
  fn test_parse_control_commands() {
    assert_eq!(
      parse("skip").unwrap(),
      ConsoleCommand::Control(ControlMessage::SkipWaiting)
    );
    assert_eq!(
      parse("v").unwrap(),
      ConsoleCommand::Control(ControlMessage::GetVersion)
    );
    assert_eq!(parse("exit").unwrap(), ConsoleCommand::Quit);
    assert!(parse("frobnicate").is_err());
    assert!(parse("").is_err());
  }
}
