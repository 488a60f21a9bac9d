// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Allowlist registry: the only source of executable commands.
//!
//! Operators define job types in a TOML or HCL file:
//!
//! ```toml
//! [jobs.local_echo]
//! argv = ["/bin/sh", "-c", "echo hello"]
//! timeout_s = 30
//! max_output_bytes = 65536
//! ```
//!
//! or in HCL, one `job "<name>" { ... }` block per job type.
//!
//! Entries are validated eagerly and never carry request data. The
//! registry is swapped atomically on reload; a job that already resolved
//! its entry keeps it.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Variables set by the executor itself; operators cannot override them.
const RESERVED_ENV: &[&str] = &["PATH", "HOME"];
const RESERVED_ENV_PREFIX: &str = "PINRUN_";

#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("failed to read allowlist {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported allowlist format for {0} (expected .toml or .hcl)")]
    UnsupportedFormat(PathBuf),
    #[error("failed to parse allowlist: {0}")]
    Parse(String),
    #[error("job type {job_type:?}: {reason}")]
    Invalid { job_type: String, reason: String },
    #[error("unknown job type: {0}")]
    NotFound(String),
}

/// Working directory policy. The worktree root is the only supported mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CwdPolicy {
    #[default]
    #[serde(rename = "repo-root")]
    RepoRoot,
}

/// Optional OS resource limits, applied by launching through `prlimit(1)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    pub cpu_seconds: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub max_processes: Option<u64>,
    pub max_file_bytes: Option<u64>,
}

impl ResourceLimits {
    fn validate(&self) -> Result<(), String> {
        let fields = [
            ("cpu_seconds", self.cpu_seconds),
            ("memory_bytes", self.memory_bytes),
            ("max_processes", self.max_processes),
            ("max_file_bytes", self.max_file_bytes),
        ];
        for (name, value) in fields {
            if value == Some(0) {
                return Err(format!("limits.{name} must be greater than zero"));
            }
        }
        if fields.iter().all(|(_, v)| v.is_none()) {
            return Err("limits table is empty".to_string());
        }
        Ok(())
    }

    /// `prlimit` invocation prefix enforcing these limits.
    pub fn prlimit_prefix(&self) -> Vec<String> {
        let mut prefix = vec!["prlimit".to_string()];
        if let Some(v) = self.cpu_seconds {
            prefix.push(format!("--cpu={v}"));
        }
        if let Some(v) = self.memory_bytes {
            prefix.push(format!("--as={v}"));
        }
        if let Some(v) = self.max_processes {
            prefix.push(format!("--nproc={v}"));
        }
        if let Some(v) = self.max_file_bytes {
            prefix.push(format!("--fsize={v}"));
        }
        prefix.push("--".to_string());
        prefix
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    argv: Vec<String>,
    timeout_s: u64,
    max_output_bytes: u64,
    #[serde(default)]
    cwd: CwdPolicy,
    #[serde(default)]
    limits: Option<ResourceLimits>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AllowlistFile {
    #[serde(default, alias = "job")]
    jobs: BTreeMap<String, RawEntry>,
}

/// One operator-defined job type. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistEntry {
    pub job_type: String,
    pub argv: Vec<String>,
    pub cwd: CwdPolicy,
    pub timeout: Duration,
    pub max_output_bytes: u64,
    pub limits: Option<ResourceLimits>,
    pub env: BTreeMap<String, String>,
}

impl AllowlistEntry {
    /// Full argv to execute, with the `prlimit` prefix when limits are set.
    pub fn command_line(&self) -> Vec<String> {
        match &self.limits {
            Some(limits) => {
                let mut line = limits.prlimit_prefix();
                line.extend(self.argv.iter().cloned());
                line
            }
            None => self.argv.clone(),
        }
    }

    fn from_raw(job_type: String, raw: RawEntry) -> Result<Self, AllowlistError> {
        let invalid = |reason: String| AllowlistError::Invalid { job_type: job_type.clone(), reason };

        pinrun_core::validate::job_type(&job_type).map_err(|e| invalid(e.to_string()))?;
        if raw.argv.is_empty() || raw.argv[0].is_empty() {
            return Err(invalid("argv must name a program".to_string()));
        }
        if raw.argv.iter().any(|a| a.contains('\0')) {
            return Err(invalid("argv contains a NUL byte".to_string()));
        }
        if raw.timeout_s == 0 {
            return Err(invalid("timeout_s must be greater than zero".to_string()));
        }
        if raw.max_output_bytes == 0 {
            return Err(invalid("max_output_bytes must be greater than zero".to_string()));
        }
        if let Some(limits) = &raw.limits {
            limits.validate().map_err(invalid)?;
        }
        for key in raw.env.keys() {
            let well_formed = key.chars().next().is_some_and(|c| c.is_ascii_uppercase() || c == '_')
                && key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if !well_formed {
                return Err(invalid(format!("env name {key:?} must match [A-Z_][A-Z0-9_]*")));
            }
            if RESERVED_ENV.contains(&key.as_str()) || key.starts_with(RESERVED_ENV_PREFIX) {
                return Err(invalid(format!("env name {key:?} is reserved")));
            }
        }

        Ok(Self {
            job_type,
            argv: raw.argv,
            cwd: raw.cwd,
            timeout: Duration::from_secs(raw.timeout_s),
            max_output_bytes: raw.max_output_bytes,
            limits: raw.limits,
            env: raw.env,
        })
    }
}

/// Immutable job-type table.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: BTreeMap<String, Arc<AllowlistEntry>>,
}

impl Allowlist {
    /// Load from a `.toml` or `.hcl` file.
    pub fn load(path: &Path) -> Result<Self, AllowlistError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| AllowlistError::Read { path: path.to_path_buf(), source })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("hcl") => Self::from_hcl_str(&content),
            _ => Err(AllowlistError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AllowlistError> {
        let file: AllowlistFile =
            toml::from_str(content).map_err(|e| AllowlistError::Parse(e.to_string()))?;
        Self::from_file(file)
    }

    pub fn from_hcl_str(content: &str) -> Result<Self, AllowlistError> {
        let file: AllowlistFile =
            hcl::from_str(content).map_err(|e| AllowlistError::Parse(e.to_string()))?;
        Self::from_file(file)
    }

    fn from_file(file: AllowlistFile) -> Result<Self, AllowlistError> {
        let mut entries = BTreeMap::new();
        for (name, raw) in file.jobs {
            let entry = AllowlistEntry::from_raw(name.clone(), raw)?;
            entries.insert(name, Arc::new(entry));
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, job_type: &str) -> Result<Arc<AllowlistEntry>, AllowlistError> {
        self.entries
            .get(job_type)
            .cloned()
            .ok_or_else(|| AllowlistError::NotFound(job_type.to_string()))
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, atomically swappable handle on the current [`Allowlist`].
#[derive(Debug)]
pub struct AllowlistRegistry {
    source: Option<PathBuf>,
    current: RwLock<Arc<Allowlist>>,
}

impl AllowlistRegistry {
    /// Load from `path`; reload re-reads the same file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AllowlistError> {
        let path = path.into();
        let allowlist = Allowlist::load(&path)?;
        Ok(Self { source: Some(path), current: RwLock::new(Arc::new(allowlist)) })
    }

    /// Registry over an in-memory table (no reload source).
    pub fn from_allowlist(allowlist: Allowlist) -> Self {
        Self { source: None, current: RwLock::new(Arc::new(allowlist)) }
    }

    pub fn resolve(&self, job_type: &str) -> Result<Arc<AllowlistEntry>, AllowlistError> {
        self.current.read().resolve(job_type)
    }

    pub fn current(&self) -> Arc<Allowlist> {
        Arc::clone(&self.current.read())
    }

    /// Replace the table; returns the previous one.
    pub fn swap(&self, allowlist: Allowlist) -> Arc<Allowlist> {
        std::mem::replace(&mut *self.current.write(), Arc::new(allowlist))
    }

    /// Re-read the source file. On error the current table stays in place.
    pub fn reload(&self) -> Result<usize, AllowlistError> {
        let Some(path) = &self.source else {
            return Ok(self.current().len());
        };
        let allowlist = Allowlist::load(path)?;
        let count = allowlist.len();
        self.swap(allowlist);
        tracing::info!(path = %path.display(), job_types = count, "allowlist reloaded");
        Ok(count)
    }
}

#[cfg(test)]
#[path = "allowlist_tests.rs"]
mod tests;
