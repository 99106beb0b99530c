//! Text command table.
//!
//! Commands are looked up by their normalized text. Each entry carries the
//! capabilities the event handler must check before running it, so adding a
//! command never means adding another ad hoc branch.

/// Every command the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Help,
    Ping,
    AmAdmin,
    Enable,
    Disable,
    Fire,
    Stop,
    Start,
}

/// Preconditions checked before a command runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub needs_admin: bool,
    pub needs_community_context: bool,
    pub dm_only: bool,
}

impl Capabilities {
    const OPEN: Self = Self {
        needs_admin: false,
        needs_community_context: false,
        dm_only: false,
    };

    const ADMIN: Self = Self {
        needs_admin: true,
        needs_community_context: false,
        dm_only: false,
    };

    /// Checks the context requirements (not the admin requirement).
    pub fn context_violation(&self, is_direct_message: bool, has_community: bool) -> Option<&'static str> {
        if self.dm_only && !is_direct_message {
            return Some("command is only available in direct messages");
        }
        if self.needs_community_context && !has_community {
            return Some("command must be used inside a server");
        }
        None
    }
}

/// One row of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub summary: &'static str,
    pub capabilities: Capabilities,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::Help,
        name: "help",
        aliases: &[],
        summary: "Show this menu",
        capabilities: Capabilities::OPEN,
    },
    CommandSpec {
        kind: CommandKind::Ping,
        name: "ping",
        aliases: &[],
        summary: "Check that I'm awake",
        capabilities: Capabilities::OPEN,
    },
    CommandSpec {
        kind: CommandKind::AmAdmin,
        name: "am-admin",
        aliases: &["amadmin"],
        summary: "Tell you if you are a server administrator",
        capabilities: Capabilities::OPEN,
    },
    CommandSpec {
        kind: CommandKind::Stop,
        name: "stop",
        aliases: &[],
        summary: "Stop sending you invitations",
        capabilities: Capabilities::OPEN,
    },
    CommandSpec {
        kind: CommandKind::Start,
        name: "start",
        aliases: &["fwiend?"],
        summary: "Send you invitations again",
        capabilities: Capabilities::OPEN,
    },
    CommandSpec {
        kind: CommandKind::Fire,
        name: "fire",
        aliases: &[],
        summary: "Send an invitation right now",
        capabilities: Capabilities::ADMIN,
    },
    CommandSpec {
        kind: CommandKind::Enable,
        name: "enable",
        aliases: &["activate"],
        summary: "Turn invitations on",
        capabilities: Capabilities::ADMIN,
    },
    CommandSpec {
        kind: CommandKind::Disable,
        name: "disable",
        aliases: &["deactivate"],
        summary: "Turn invitations off",
        capabilities: Capabilities::ADMIN,
    },
];

impl CommandSpec {
    fn matches(&self, normalized: &str) -> bool {
        self.name == normalized || self.aliases.contains(&normalized)
    }
}

/// Resolve raw message text to a command.
#[must_use]
pub fn parse(text: &str) -> Option<&'static CommandSpec> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    COMMANDS.iter().find(|spec| spec.matches(&normalized))
}

/// Lowercase, drop user mention tokens (`<@123>`, `<@!123>`) and a leading
/// `!`, and collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let without_mentions = strip_mentions(text);
    let joined = without_mentions.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = joined.strip_prefix('!').unwrap_or(&joined).trim_start();
    trimmed.to_lowercase()
}

fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start + 2..];
        match candidate.find('>') {
            Some(end) if is_mention_body(&candidate[..end]) => {
                out.push(' ');
                rest = &candidate[end + 1..];
            }
            _ => {
                out.push_str("<@");
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_mention_body(body: &str) -> bool {
    let digits = body.strip_prefix('!').unwrap_or(body);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Help text. Admin commands are appended only for callers who may use them.
#[must_use]
pub fn help_text(bot_name: &str, include_admin: bool) -> String {
    let mut text = format!(
        "Hi, I'm {bot_name}. Every now and then I invite someone from the server for a session.\n\
         I can do a couple of things, such as:\n"
    );
    for spec in COMMANDS.iter().filter(|s| !s.capabilities.needs_admin) {
        text.push_str(&format!(" - `{}`: {}\n", spec.name, spec.summary));
    }
    if include_admin {
        text.push_str("Additional commands for administrators (such as you):\n");
        for spec in COMMANDS.iter().filter(|s| s.capabilities.needs_admin) {
            text.push_str(&format!(" - `{}`: {}\n", spec.name, spec.summary));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn normalize_handles_case_bang_and_mentions() {
        assert_eq!(normalize("  !HELP "), "help");
        assert_eq!(normalize("<@123> fire"), "fire");
        assert_eq!(normalize("<@!123>   Am-Admin"), "am-admin");
        assert_eq!(normalize("<@123> !stop"), "stop");
        assert_eq!(normalize("<@abc> hi"), "<@abc> hi");
    }

    #[test]
    fn aliases_resolve_to_canonical_kind() {
        assert_eq!(parse("amadmin").map(|s| s.kind), Some(CommandKind::AmAdmin));
        assert_eq!(parse("activate").map(|s| s.kind), Some(CommandKind::Enable));
        assert_eq!(parse("Deactivate").map(|s| s.kind), Some(CommandKind::Disable));
        assert_eq!(parse("fwiend?").map(|s| s.kind), Some(CommandKind::Start));
    }

    #[test]
    fn unknown_or_empty_text_is_not_a_command() {
        assert!(parse("").is_none());
        assert!(parse("<@42>").is_none());
        assert!(parse("help me please").is_none());
    }

    #[test]
    fn privileged_commands_need_admin() {
        for kind in [CommandKind::Enable, CommandKind::Disable, CommandKind::Fire] {
            let spec = COMMANDS.iter().find(|s| s.kind == kind).unwrap();
            assert!(spec.capabilities.needs_admin, "{kind:?}");
        }
        for kind in [CommandKind::Stop, CommandKind::Start, CommandKind::Help] {
            let spec = COMMANDS.iter().find(|s| s.kind == kind).unwrap();
            assert!(!spec.capabilities.needs_admin, "{kind:?}");
        }
    }

    #[test]
    fn names_and_aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMANDS {
            assert!(seen.insert(spec.name));
            for alias in spec.aliases {
                assert!(seen.insert(alias));
            }
        }
    }

    #[test]
    fn context_rules_are_enforced() {
        let dm_only = Capabilities {
            dm_only: true,
            ..Capabilities::default()
        };
        assert!(dm_only.context_violation(false, true).is_some());
        assert!(dm_only.context_violation(true, false).is_none());

        let in_server = Capabilities {
            needs_community_context: true,
            ..Capabilities::default()
        };
        assert!(in_server.context_violation(true, false).is_some());
        assert!(in_server.context_violation(false, true).is_none());
    }

    #[test]
    fn help_lists_admin_commands_only_when_asked() {
        let plain = help_text("Nudge", false);
        assert!(plain.contains("`stop`"));
        assert!(!plain.contains("`fire`"));

        let admin = help_text("Nudge", true);
        assert!(admin.contains("`fire`"));
        assert!(admin.contains("`enable`"));
    }
}
