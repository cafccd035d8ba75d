//! Project configuration loaded from `pystatic.toml`.
//!
//! Every field has a default, so a missing file or a missing table means
//! default behaviour.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE: &str = "pystatic.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Modules compiled without static specialization. Other modules see
    /// their names as `dynamic`.
    pub dynamic_modules: Vec<String>,
}

impl CompilerConfig {
    pub fn is_dynamic(&self, module: &str) -> bool {
        self.dynamic_modules.iter().any(|m| m == module)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Operand stack capacity, in values.
    pub max_stack: usize,
    /// Call depth before `RecursionError`.
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: 10_000,
            max_frames: 1_000,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text, path)?;
        tracing::debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    /// Loads `explicit` if given. Otherwise loads `pystatic.toml` from `dir`
    /// when it exists, falling back to defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_means_defaults() {
        let config = Config::from_toml("", Path::new("x.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.vm.max_frames, 1_000);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let text = "[compiler]\ndynamic_modules = [\"legacy\"]\n\n[vm]\nmax_frames = 64\n";
        let config = Config::from_toml(text, Path::new("x.toml")).unwrap();
        assert!(config.compiler.is_dynamic("legacy"));
        assert!(!config.compiler.is_dynamic("main"));
        assert_eq!(config.vm.max_frames, 64);
        assert_eq!(config.vm.max_stack, 10_000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let e = Config::from_toml("[vm]\nmax_depth = 3\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(e, ConfigError::Parse { .. }));
        assert!(e.to_string().contains("bad.toml"));
    }

    #[test]
    fn discover_reads_file_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(CONFIG_FILE)).unwrap();
        writeln!(f, "[vm]\nmax_stack = 512").unwrap();
        let config = Config::discover(None, dir.path()).unwrap();
        assert_eq!(config.vm.max_stack, 512);
    }

    #[test]
    fn discover_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::discover(None, dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let e = Config::discover(Some(&missing), dir.path()).unwrap_err();
        assert!(matches!(e, ConfigError::Io { .. }));
    }
}
