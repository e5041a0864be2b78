//! Script registry
//!
//! The registry is an external collaborator: the runner only needs to look
//! descriptors up by id and to know where relative script paths resolve.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolrun_core::domain::script::ScriptDescriptor;
use tracing::{debug, warn};

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised while loading a registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry file could not be read
    #[error("Failed to read registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry file is not valid JSON of the expected shape
    #[error("Failed to parse registry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Two descriptors share an id
    #[error("Duplicate script id in registry: {0}")]
    DuplicateId(String),
}

/// Read-only lookup of script descriptors
pub trait ScriptRegistry: Send + Sync {
    /// Returns the descriptor for `id`, if registered
    fn get_script(&self, id: &str) -> Option<ScriptDescriptor>;

    /// Directory that relative script paths resolve against
    fn scripts_dir(&self) -> &Path;

    /// Resolves a descriptor's path to an absolute location
    fn resolve_path(&self, descriptor: &ScriptDescriptor) -> PathBuf {
        let path = Path::new(&descriptor.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.scripts_dir().join(path)
        }
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    scripts: Vec<ScriptDescriptor>,
}

/// Registry backed by a `registry.json` file
///
/// The file is read once at construction.
#[derive(Debug, Clone)]
pub struct JsonRegistry {
    scripts_dir: PathBuf,
    scripts: HashMap<String, ScriptDescriptor>,
}

impl JsonRegistry {
    /// Loads `{"scripts": [...]}` from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RegistryFile =
            serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let scripts_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let registry = Self::from_descriptors(scripts_dir, file.scripts)?;
        debug!(
            "Loaded {} scripts from registry {}",
            registry.scripts.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Builds a registry from descriptors already in memory
    pub fn from_descriptors(
        scripts_dir: PathBuf,
        descriptors: Vec<ScriptDescriptor>,
    ) -> Result<Self> {
        let mut scripts = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if scripts.contains_key(&descriptor.id) {
                warn!("Duplicate script id '{}' in registry", descriptor.id);
                return Err(RegistryError::DuplicateId(descriptor.id));
            }
            scripts.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self {
            scripts_dir,
            scripts,
        })
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl ScriptRegistry for JsonRegistry {
    fn get_script(&self, id: &str) -> Option<ScriptDescriptor> {
        self.scripts.get(id).cloned()
    }

    fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("registry.json");
        std::fs::write(
            &registry_path,
            r#"{"scripts": [
                {"id": "echo", "path": "tools/echo.sh"},
                {"id": "abs", "path": "/usr/local/bin/abs.sh"}
            ]}"#,
        )
        .unwrap();

        let registry = JsonRegistry::load(&registry_path).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.scripts_dir(), dir.path());

        let echo = registry.get_script("echo").unwrap();
        assert_eq!(registry.resolve_path(&echo), dir.path().join("tools/echo.sh"));

        let abs = registry.get_script("abs").unwrap();
        assert_eq!(registry.resolve_path(&abs), PathBuf::from("/usr/local/bin/abs.sh"));

        assert!(registry.get_script("missing").is_none());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = JsonRegistry::load(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(RegistryError::Io { .. })));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            JsonRegistry::load(&broken),
            Err(RegistryError::Parse { .. })
        ));

        let dup = dir.path().join("dup.json");
        std::fs::write(
            &dup,
            r#"{"scripts": [{"id": "a", "path": "a.sh"}, {"id": "a", "path": "b.sh"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            JsonRegistry::load(&dup),
            Err(RegistryError::DuplicateId(id)) if id == "a"
        ));
    }
}
