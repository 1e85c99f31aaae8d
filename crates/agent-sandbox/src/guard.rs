//! Best-effort dangerous-command filter.
//!
//! **This is a guardrail, not a security boundary.** It catches obvious
//! foot-guns an agent might type (fork bombs, `rm -rf /`, piping a download
//! into a shell) before they run. It is trivially bypassed by quoting,
//! variables, or encoding, and must never be relied on for isolation. The
//! container backend's namespaces and dropped capabilities are the actual
//! security mechanism.
//!
//! Both backends consult the guard before spawning anything; a match is
//! reported to the caller as a failed [`CommandResult`](crate::CommandResult),
//! and no process is started.

use std::sync::OnceLock;

use regex::Regex;

/// A named pattern.
#[derive(Debug)]
pub struct GuardRule {
    pub name: &'static str,
    pattern: Regex,
}

/// Which rule a command tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardMatch {
    pub rule: &'static str,
}

impl std::fmt::Display for GuardMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command blocked by safety guard ({})", self.rule)
    }
}

const RULES: &[(&str, &str)] = &[
    ("fork_bomb", r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    (
        "recursive_delete_root",
        r"\brm\s+(?:-[\w-]+\s+)*-[a-zA-Z]*[rR][a-zA-Z]*\s+(?:-[\w-]+\s+)*(?:/\*?|~/?|\$HOME/?)(?:[\s;&|]|$)",
    ),
    ("no_preserve_root", r"--no-preserve-root"),
    (
        "privilege_escalation",
        r"(?:^|[\s;&|(`])(?:sudo|su|doas|pkexec)(?:\s|$)",
    ),
    ("filesystem_format", r"\bmkfs(?:\.\w+)?\b"),
    ("disk_overwrite", r"\bdd\b[^\n]*\bof=/dev/"),
    (
        "raw_disk_redirect",
        r">\s*/dev/(?:sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|disk\d)",
    ),
    ("device_shred", r"\bshred\b[^\n]*\s/dev/"),
    (
        "download_piped_to_shell",
        r"\b(?:curl|wget)\b[^|\n]*\|\s*(?:sudo\s+)?(?:ba|z|da|k|fi)?sh\b",
    ),
    ("swap_manipulation", r"\b(?:mkswap|swapon|swapoff)\b"),
    (
        "world_writable_root",
        r"\bchmod\s+(?:-[a-zA-Z]*R[a-zA-Z]*\s+)+0?777\s+/(?:\s|$)",
    ),
    (
        "host_shutdown",
        r"(?:^|[\s;&|])(?:shutdown|reboot|halt|poweroff)(?:\s|$)",
    ),
];

/// An ordered list of rules; the first match wins.
#[derive(Debug)]
pub struct CommandGuard {
    rules: Vec<GuardRule>,
}

impl CommandGuard {
    /// The built-in rule set, compiled once per process.
    pub fn standard() -> &'static CommandGuard {
        static GUARD: OnceLock<CommandGuard> = OnceLock::new();
        GUARD.get_or_init(|| CommandGuard {
            rules: RULES
                .iter()
                .map(|(name, pattern)| GuardRule {
                    name,
                    pattern: Regex::new(pattern).expect("built-in guard pattern compiles"),
                })
                .collect(),
        })
    }

    pub fn rules(&self) -> &[GuardRule] {
        &self.rules
    }

    /// First rule `command` trips, if any.
    pub fn check(&self, command: &str) -> Option<GuardMatch> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(command))
            .map(|rule| GuardMatch { rule: rule.name })
    }
}
