/// Available commands and autocomplete logic

/// What running a command does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  /// Navigate to an app route
  Route(&'static str),
  /// Ask the worker to drop every cache
  CleanCaches,
  /// Reset offline state and re-check backend health
  Retry,
  Quit,
}

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  pub action: Action,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "dashboard",
    aliases: &["d", "home"],
    description: "Student dashboard",
    action: Action::Route("/dashboard"),
  },
  Command {
    name: "grades",
    aliases: &["g", "grade"],
    description: "Grades by subject",
    action: Action::Route("/grades"),
  },
  Command {
    name: "events",
    aliases: &["e", "event", "calendar"],
    description: "Upcoming events",
    action: Action::Route("/events"),
  },
  Command {
    name: "ratings",
    aliases: &["r", "rating"],
    description: "Staff ratings",
    action: Action::Route("/ratings"),
  },
  Command {
    name: "profile",
    aliases: &["p", "me"],
    description: "Your profile",
    action: Action::Route("/profile"),
  },
  Command {
    name: "superadmin",
    aliases: &["admin"],
    description: "School administration",
    action: Action::Route("/superadmin"),
  },
  Command {
    name: "login",
    aliases: &["signin"],
    description: "Sign-in page (not health-checked)",
    action: Action::Route("/login"),
  },
  Command {
    name: "clean",
    aliases: &["clear", "purge"],
    description: "Drop all offline caches",
    action: Action::CleanCaches,
  },
  Command {
    name: "retry",
    aliases: &["check"],
    description: "Re-check the backend now",
    action: Action::Retry,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit gbshell",
    action: Action::Quit,
  },
];

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve what the user typed. A leading `/` is taken as a literal route.
pub fn resolve(input: &str, selected: usize) -> Option<ResolvedAction> {
  let input = input.trim();
  if input.starts_with('/') {
    return Some(ResolvedAction::Path(input.to_string()));
  }
  let suggestions = get_suggestions(input);
  suggestions
    .get(selected)
    .or_else(|| suggestions.first())
    .map(|cmd| ResolvedAction::Command(cmd.action))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAction {
  Command(Action),
  /// A route typed out in full, e.g. `/grades/42`
  Path(String),
}
