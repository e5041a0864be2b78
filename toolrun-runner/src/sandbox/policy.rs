//! Sandbox policy
//!
//! Derives the environment, working directory and access posture of a
//! script process from its sandbox level and granted permissions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use toolrun_core::domain::script::{Permission, SandboxLevel, ScriptDescriptor};

/// Variables kept when a script lacks the `env_vars` permission
const ESSENTIAL_VARS: [&str; 5] = ["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL"];

/// Name fragments that mark a variable as a credential
const SENSITIVE_PATTERNS: [&str; 9] = [
    "PASSWORD",
    "PASSWD",
    "TOKEN",
    "SECRET",
    "CREDENTIAL",
    "APIKEY",
    "API_KEY",
    "PRIVATE_KEY",
    "ACCESS_KEY",
];

/// Filesystem posture reported for a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemAccess {
    ReadWrite,
    ReadOnly,
}

/// Network posture reported for a script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAccess {
    Allowed,
    Denied,
}

impl std::fmt::Display for FilesystemAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemAccess::ReadWrite => write!(f, "read-write"),
            FilesystemAccess::ReadOnly => write!(f, "read-only"),
        }
    }
}

impl std::fmt::Display for NetworkAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkAccess::Allowed => write!(f, "allowed"),
            NetworkAccess::Denied => write!(f, "denied"),
        }
    }
}

/// Resolved sandbox for one execution
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub level: SandboxLevel,
    pub env_vars_allowed: bool,
    pub network_allowed: bool,
    temp_dir: PathBuf,
}

impl SandboxPolicy {
    pub fn new(level: SandboxLevel, permissions: &[Permission]) -> Self {
        Self {
            level,
            env_vars_allowed: permissions.contains(&Permission::EnvVars),
            network_allowed: permissions.contains(&Permission::Network),
            temp_dir: std::env::temp_dir(),
        }
    }

    pub fn for_script(descriptor: &ScriptDescriptor) -> Self {
        Self::new(descriptor.security.sandbox, &descriptor.execution.permissions)
    }

    pub fn with_temp_dir(mut self, temp_dir: PathBuf) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// Builds the child environment from the given base environment
    ///
    /// Credential-shaped names are always dropped. `strict` replaces the
    /// environment with a fixed minimal one; without `env_vars` only the
    /// essential variables survive.
    pub fn build_env<I>(&self, base: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: BTreeMap<String, String> = if self.level == SandboxLevel::Strict {
            let tmp = self.temp_dir.to_string_lossy().into_owned();
            BTreeMap::from([
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
                ("HOME".to_string(), tmp.clone()),
                ("TMPDIR".to_string(), tmp),
            ])
        } else {
            base.into_iter()
                .filter(|(name, _)| !is_sensitive(name))
                .collect()
        };

        if !self.env_vars_allowed {
            env.retain(|name, _| ESSENTIAL_VARS.contains(&name.as_str()));
        }
        env
    }

    /// Directory the script runs in
    pub fn working_dir(&self, scripts_dir: &Path) -> PathBuf {
        if self.level == SandboxLevel::Strict {
            self.temp_dir.clone()
        } else {
            scripts_dir.to_path_buf()
        }
    }

    pub fn filesystem(&self) -> FilesystemAccess {
        if self.level == SandboxLevel::Strict {
            FilesystemAccess::ReadOnly
        } else {
            FilesystemAccess::ReadWrite
        }
    }

    pub fn network(&self) -> NetworkAccess {
        if self.network_allowed && self.level != SandboxLevel::Strict {
            NetworkAccess::Allowed
        } else {
            NetworkAccess::Denied
        }
    }
}

/// Whether a variable name looks like it holds a credential
pub fn is_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper == "KEY"
        || upper.ends_with("_KEY")
        || SENSITIVE_PATTERNS.iter().any(|pattern| upper.contains(pattern))
}
