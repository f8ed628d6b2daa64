use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KestrelError, Result};

/// Top-level Kestrel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// How whitelist entries are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistScope {
    /// One entry covers every tool in the session.
    #[default]
    Session,
    /// Entries cover a single tool within the session.
    SessionTool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Directory holding the approval record log.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    #[serde(default)]
    pub whitelist_scope: WhitelistScope,
    /// Whitelist TTL granted by approvals that don't specify one (0 = none).
    #[serde(default)]
    pub default_ttl_secs: u64,
    /// How often a blocked step re-checks its pending record.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sync every record write to disk before returning.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            whitelist_scope: WhitelistScope::default(),
            default_ttl_secs: 0,
            poll_interval_ms: default_poll_interval_ms(),
            fsync: default_fsync(),
        }
    }
}

impl ApprovalConfig {
    /// Resolve the store directory (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

fn default_store_dir() -> String { "~/.kestrel/approvals".to_string() }
fn default_poll_interval_ms() -> u64 { 50 }
fn default_fsync() -> bool { true }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Safety cap on node visits per run, across all branches. Unbounded when absent.
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Deadline applied to runs that don't bring their own.
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

impl WorkflowConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// EnvFilter directive, e.g. `kestrel=debug,warn`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl KestrelConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| KestrelError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| KestrelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.approval.store_dir.trim().is_empty() {
            return Err(KestrelError::Config(
                "approval.store_dir must not be empty".to_string(),
            ));
        }
        if self.workflow.max_steps == Some(0) {
            return Err(KestrelError::Config(
                "workflow.max_steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replace `${VAR}` with the variable's value; unset variables are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = KestrelConfig::default();
        assert_eq!(config.approval.whitelist_scope, WhitelistScope::Session);
        assert_eq!(config.approval.poll_interval_ms, 50);
        assert!(config.approval.fsync);
        assert_eq!(config.workflow.max_steps, None);
        assert!(config.log.filter.is_none());
    }

    #[test]
    fn empty_document_is_valid() {
        let config = KestrelConfig::parse("").unwrap();
        assert_eq!(config.approval.store_dir, "~/.kestrel/approvals");
    }

    #[test]
    fn zero_max_steps_rejected() {
        let err = KestrelConfig::parse("[workflow]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, KestrelError::Config(_)));
    }

    #[test]
    fn unset_env_var_kept() {
        let out = expand_env_vars("dir = \"${KESTREL_SURELY_UNSET_VAR}\"");
        assert_eq!(out, "dir = \"${KESTREL_SURELY_UNSET_VAR}\"");
    }

    #[test]
    fn poll_interval_never_zero() {
        let config = ApprovalConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn absolute_store_dir_untouched() {
        let config = ApprovalConfig {
            store_dir: "/var/lib/kestrel".into(),
            ..Default::default()
        };
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/kestrel"));
    }
}
