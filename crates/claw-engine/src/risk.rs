use std::fmt;
use std::path::Path;

use claw_core::tools::{ToolArguments, ToolCategory};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SYSTEM_PATHS: &[&str] = &[
    r"(?i)^/etc/",
    r"(?i)^/usr/",
    r"(?i)^/bin/",
    r"(?i)^/sbin/",
    r"(?i)^/boot/",
    r"(?i)^C:\\Windows\\",
    r"(?i)^C:\\Program Files\\",
];

const DANGEROUS_COMMANDS: &[&str] = &[
    r"(?i)rm\s+-rf?\s+/",
    r"(?i)del\s+/s\s+/q\s+C:\\",
    r"(?i)\bformat\s+",
    r"(?i)\bfdisk\s+",
    r"(?i)\bmkfs\.",
    r"(?i)dd\s+if=.*of=/dev/",
    r"(?i)sudo\s+rm\s+-rf",
    r"(?i)chmod\s+777\s+/",
    r"(?i)chown\s+.*\s+/",
    // piping downloads into a shell
    r"(?i)(curl|wget)\s+.*\|\s*(ba|z)?sh",
    r"(?i)\b(nc|netcat)\s+-l",
];

const PRIVILEGED_COMMANDS: &[&str] = &[
    r"\bsudo\s+",
    r"\brunas\s+",
    r"\b(apt|apt-get|yum|dnf|brew|pip|pip3|npm|cargo)\s+(install|uninstall|remove)\b",
];

const SAFE_COMMANDS: &[&str] = &[
    r"^\s*(cat|less|head|tail|grep|rg|find|ls|dir|pwd|wc)(\s|$)",
];

const SAFE_PATHS: &[&str] = &[r"^\./", r"^~/", r"^/tmp/", r"^/var/tmp/"];

const IMPORTANT_FILES: &[&str] = &[
    "package.json",
    "requirements.txt",
    "Cargo.toml",
    "Cargo.lock",
    "go.mod",
    "Dockerfile",
    "docker-compose.yml",
    ".gitignore",
    "README.md",
];

const READ_TOOLS: &[&str] = &["read_file", "glob", "grep", "analyze_code", "analyze_project"];

const RISKY_GIT_COMMANDS: &[&str] = &["push", "reset", "rebase", "force-push"];

/// Heuristic risk rating of a tool call from its arguments.
///
/// Looks at the `path` and `command` arguments only. Never blocks anything by
/// itself; the orchestrator may use a `High` rating to ask before running.
pub struct RiskAssessor {
    system_paths: RegexSet,
    dangerous_commands: RegexSet,
    privileged_commands: RegexSet,
    safe_commands: RegexSet,
    safe_paths: RegexSet,
}

impl RiskAssessor {
    pub fn new() -> Self {
        Self {
            system_paths: compile("system_paths", SYSTEM_PATHS),
            dangerous_commands: compile("dangerous_commands", DANGEROUS_COMMANDS),
            privileged_commands: compile("privileged_commands", PRIVILEGED_COMMANDS),
            safe_commands: compile("safe_commands", SAFE_COMMANDS),
            safe_paths: compile("safe_paths", SAFE_PATHS),
        }
    }

    pub fn assess(&self, tool_name: &str, category: ToolCategory, arguments: &ToolArguments) -> RiskLevel {
        let path = string_arg(arguments, "path");
        let command = string_arg(arguments, "command");

        if self.is_high(tool_name, path, command) {
            return RiskLevel::High;
        }
        if self.is_medium(path, command) {
            return RiskLevel::Medium;
        }
        if self.is_low(tool_name, path, command) {
            return RiskLevel::Low;
        }
        match category {
            ToolCategory::Delete | ToolCategory::Execute => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    fn is_high(&self, tool_name: &str, path: Option<&str>, command: Option<&str>) -> bool {
        if path.is_some_and(|p| self.system_paths.is_match(p)) {
            return true;
        }
        if command.is_some_and(|c| self.dangerous_commands.is_match(c)) {
            return true;
        }
        tool_name == "git" && command.is_some_and(|c| RISKY_GIT_COMMANDS.contains(&c.trim()))
    }

    fn is_medium(&self, path: Option<&str>, command: Option<&str>) -> bool {
        let touches_important_file = path
            .and_then(|p| Path::new(p).file_name())
            .and_then(|name| name.to_str())
            .is_some_and(|name| IMPORTANT_FILES.contains(&name));
        touches_important_file || command.is_some_and(|c| self.privileged_commands.is_match(c))
    }

    fn is_low(&self, tool_name: &str, path: Option<&str>, command: Option<&str>) -> bool {
        READ_TOOLS.contains(&tool_name)
            || path.is_some_and(|p| self.safe_paths.is_match(p))
            || command.is_some_and(|c| self.safe_commands.is_match(c))
    }
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(group: &str, patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns).unwrap_or_else(|e| {
        warn!(group, error = %e, "invalid risk patterns, group disabled");
        RegexSet::empty()
    })
}

fn string_arg<'a>(arguments: &'a ToolArguments, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}
