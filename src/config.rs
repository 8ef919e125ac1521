//! Tool and engine configuration loaded from `dfi.toml`

use crate::error::{DfiError, DfiResult};
use crate::error_stack;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "dfi.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DfiConfig {
    pub errors: ErrorConfig,
    pub json: JsonConfig,
    pub descriptors: DescriptorConfig,
}

/// `[errors]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorConfig {
    /// Messages kept on the per-thread error stack
    pub capacity: usize,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            capacity: error_stack::DEFAULT_CAPACITY,
        }
    }
}

/// `[json]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JsonConfig {
    pub pretty: bool,
}

/// `[descriptors]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorConfig {
    /// Directories searched for descriptor files given by relative name
    pub search_paths: Vec<PathBuf>,
}

impl DfiConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> DfiResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| DfiError::from(e).recorded())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> DfiResult<Self> {
        let config: DfiConfig =
            toml::from_str(content).map_err(|e| DfiError::Config(e.to_string()).recorded())?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> DfiResult<String> {
        toml::to_string_pretty(self).map_err(|e| DfiError::Config(e.to_string()).recorded())
    }

    /// Load `dfi.toml` from `dir` if it exists, otherwise the defaults
    pub fn discover<P: AsRef<Path>>(dir: P) -> DfiResult<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> DfiResult<()> {
        if self.errors.capacity == 0 {
            return Err(DfiError::Config("errors.capacity must be at least 1".to_string()).recorded());
        }
        Ok(())
    }

    /// Apply engine settings to the current thread
    pub fn apply(&self) {
        error_stack::set_capacity(self.errors.capacity);
        tracing::debug!(capacity = self.errors.capacity, "applied error stack capacity");
    }

    /// Configured search paths that do not name a directory
    pub fn missing_search_paths(&self) -> Vec<&Path> {
        self.descriptors
            .search_paths
            .iter()
            .filter(|dir| !dir.is_dir())
            .map(PathBuf::as_path)
            .collect()
    }

    /// Resolve a descriptor path: existing paths are used as given, then
    /// each search path is tried in order
    pub fn resolve_descriptor<P: AsRef<Path>>(&self, name: P) -> Option<PathBuf> {
        let name = name.as_ref();
        if name.exists() {
            return Some(name.to_path_buf());
        }
        if name.is_absolute() {
            return None;
        }
        self.descriptors
            .search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }
}
