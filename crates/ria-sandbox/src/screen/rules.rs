//! Screening rule sets
//!
//! Rules are plain regular expressions tagged with a threat category. The
//! defaults cover well-known manipulation phrasing and dangerous Python
//! constructs; deployments extend them through `ScreenerConfig`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Threat category attached to a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// Attempts to replace the system instructions
    InstructionOverride,
    /// Persona or "mode" jailbreaks
    RolePlay,
    /// Obfuscated or encoded payloads
    EncodedPayload,
    /// Unusual bracket density typical of template injection
    SuspiciousFormatting,
    /// Oversized prompt
    PromptStuffing,
    /// Paths outside the data/output mounts, or destructive file calls
    FilesystemEscape,
    /// Network access
    Network,
    /// Spawning processes
    ProcessSpawn,
    /// Runtime code evaluation
    DynamicEvaluation,
    /// Import of a denied module
    DisallowedImport,
}

impl ThreatCategory {
    /// Stable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RolePlay => "role_play",
            Self::EncodedPayload => "encoded_payload",
            Self::SuspiciousFormatting => "suspicious_formatting",
            Self::PromptStuffing => "prompt_stuffing",
            Self::FilesystemEscape => "filesystem_escape",
            Self::Network => "network",
            Self::ProcessSpawn => "process_spawn",
            Self::DynamicEvaluation => "dynamic_evaluation",
            Self::DisallowedImport => "disallowed_import",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable rule definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule identifier reported on match
    pub id: String,
    /// Category reported on match
    pub category: ThreatCategory,
    /// Case-insensitive regular expression
    pub pattern: String,
}

impl RuleSpec {
    /// Create rule definition
    #[must_use]
    pub fn new(id: impl Into<String>, category: ThreatCategory, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            pattern: pattern.into(),
        }
    }
}

/// Compiled rule
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub(crate) id: String,
    pub(crate) category: ThreatCategory,
    pub(crate) regex: Regex,
}

impl Rule {
    pub(crate) fn compile(spec: &RuleSpec) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            id: spec.id.clone(),
            category: spec.category,
            regex,
        })
    }
}

/// Built-in query rules
#[must_use]
pub fn default_query_rules() -> Vec<RuleSpec> {
    use ThreatCategory::*;
    vec![
        RuleSpec::new("ignore-previous", InstructionOverride, r"ignore\s+(all\s+)?(the\s+)?previous(\s+instructions)?"),
        RuleSpec::new("disregard", InstructionOverride, r"disregard\s+(all|any|the|previous|your)"),
        RuleSpec::new("forget-everything", InstructionOverride, r"forget\s+(everything|all|your\s+instructions)"),
        RuleSpec::new("new-instructions", InstructionOverride, r"new\s+instructions"),
        RuleSpec::new("system-prompt", InstructionOverride, r"system\s+prompt"),
        RuleSpec::new("you-are-now", RolePlay, r"you\s+are\s+now"),
        RuleSpec::new("act-as-if", RolePlay, r"act\s+as\s+(if|though)"),
        RuleSpec::new("pretend", RolePlay, r"pretend\s+(you\s+are|to\s+be)"),
        RuleSpec::new("roleplay", RolePlay, r"role-?\s?play\s+as"),
        RuleSpec::new("mode-switch", RolePlay, r"\b(sudo|developer|god|dan|evil)\s+mode\b"),
        RuleSpec::new("jailbreak", RolePlay, r"jailbreak"),
        RuleSpec::new("base64-blob", EncodedPayload, r"[A-Za-z0-9+/]{40,}={0,2}"),
        RuleSpec::new("hex-escapes", EncodedPayload, r"(\\x[0-9a-f]{2}){4,}"),
        RuleSpec::new("unicode-escapes", EncodedPayload, r"(\\u[0-9a-f]{4}){4,}"),
        RuleSpec::new("decode-instruction", EncodedPayload, r"(base64|rot13|hex)\s*(-d\b|decode|decoded)"),
    ]
}

/// Built-in code rules
#[must_use]
pub fn default_code_rules() -> Vec<RuleSpec> {
    use ThreatCategory::*;
    vec![
        RuleSpec::new("os-system", ProcessSpawn, r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork\w*|posix_spawn\w*|kill)\s*\("),
        RuleSpec::new("subprocess", ProcessSpawn, r"\bsubprocess\b"),
        RuleSpec::new("eval", DynamicEvaluation, r"\b(eval|exec|compile)\s*\("),
        RuleSpec::new("dunder-import", DynamicEvaluation, r"__import__|__builtins__|__subclasses__|__globals__"),
        RuleSpec::new("getattr-dynamic", DynamicEvaluation, r#"\bgetattr\s*\(\s*(os|sys|builtins|posix|subprocess|importlib|shutil|ctypes)\s*,|\bgetattr\s*\([^,()]+,\s*[^'"\s]|\bgetattr\s*\([^,()]+,\s*["'][^"']*["']\s*[+%]"#),
        RuleSpec::new("globals-lookup", DynamicEvaluation, r"\b(globals|locals|vars)\s*\(\s*\)\s*\["),
        RuleSpec::new("requests-call", Network, r"\b(requests|httpx|urllib\d?|aiohttp)\s*\.\s*\w+"),
        RuleSpec::new("socket-use", Network, r"\bsocket\s*\.\s*\w+"),
        RuleSpec::new("remote-read", Network, r#"read_\w+\s*\(\s*["'](https?|ftp|s3|gs)://"#),
        RuleSpec::new("destructive-fs", FilesystemEscape, r"\bos\s*\.\s*(remove|unlink|rmdir|removedirs|rename|replace|chmod|chown|symlink|link|chdir)\s*\("),
        RuleSpec::new("path-traversal", FilesystemEscape, r#"["'][^"'\n]*\.\./"#),
        RuleSpec::new("environment-read", FilesystemEscape, r"\bos\s*\.\s*(environ|getenv)\b"),
    ]
}

/// Modules generated code may never import
#[must_use]
pub fn default_denied_modules() -> Vec<String> {
    [
        "socket", "subprocess", "requests", "urllib", "urllib2", "urllib3", "http", "httpx",
        "aiohttp", "ftplib", "smtplib", "telnetlib", "paramiko", "ctypes", "cffi", "importlib",
        "pickle", "marshal", "shutil", "multiprocessing", "pty", "signal", "webbrowser",
        "asyncio", "code", "codeop", "builtins",
    ]
    .iter()
    .map(|m| (*m).to_string())
    .collect()
}
