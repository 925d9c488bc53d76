use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Host-side configuration for the scripting subsystem: where the mounts
/// live, how the community module is fetched, and the boot/debug policies.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptingConfig {
    #[serde(default = "ScriptingConfig::default_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "ScriptingConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "ScriptingConfig::default_data_default_dir")]
    pub data_default_dir: PathBuf,
    #[serde(default = "ScriptingConfig::default_user_script_dir")]
    pub user_script_dir: PathBuf,
    #[serde(default = "ScriptingConfig::default_cache_dir")]
    pub cache_dir: PathBuf,
    /// URL the community module is bootstrapped from; none disables the slot.
    #[serde(default)]
    pub community_url: Option<String>,
    /// Allows overriding world/rules sources from the user-script dir and
    /// unlocks rules lifecycle commands.
    #[serde(default)]
    pub dev_mode: bool,
    /// A world whose rules module fails to load aborts `load_world` instead
    /// of degrading to a logged failure.
    #[serde(default)]
    pub strict_boot: bool,
    #[serde(default = "ScriptingConfig::default_max_script_operations")]
    pub max_script_operations: u64,
}

impl ScriptingConfig {
    fn default_config_dir() -> PathBuf {
        PathBuf::from("config")
    }

    fn default_data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    fn default_data_default_dir() -> PathBuf {
        PathBuf::from("data-default")
    }

    fn default_user_script_dir() -> PathBuf {
        PathBuf::from("scripts")
    }

    fn default_cache_dir() -> PathBuf {
        PathBuf::from("cache")
    }

    const fn default_max_script_operations() -> u64 {
        5_000_000
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(target: "script", "config load error: {err:?}; falling back to defaults");
                Self::default()
            }
        }
    }

    /// Root every relative directory under `base`; handy for tests and for
    /// embedders that keep all game state in one folder.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let mut cfg = Self::default();
        cfg.config_dir = base.join(cfg.config_dir);
        cfg.data_dir = base.join(cfg.data_dir);
        cfg.data_default_dir = base.join(cfg.data_default_dir);
        cfg.user_script_dir = base.join(cfg.user_script_dir);
        cfg.cache_dir = base.join(cfg.cache_dir);
        cfg
    }
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            config_dir: Self::default_config_dir(),
            data_dir: Self::default_data_dir(),
            data_default_dir: Self::default_data_default_dir(),
            user_script_dir: Self::default_user_script_dir(),
            cache_dir: Self::default_cache_dir(),
            community_url: None,
            dev_mode: false,
            strict_boot: false,
            max_script_operations: Self::default_max_script_operations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_files_fill_in_defaults() {
        let cfg: ScriptingConfig =
            serde_json::from_str(r#"{ "dev_mode": true, "community_url": "http://example.org/c.rhai" }"#)
                .expect("partial config should parse");
        assert!(cfg.dev_mode);
        assert!(!cfg.strict_boot);
        assert_eq!(cfg.community_url.as_deref(), Some("http://example.org/c.rhai"));
        assert_eq!(cfg.config_dir, PathBuf::from("config"));
        assert_eq!(cfg.max_script_operations, 5_000_000);
    }

    #[test]
    fn rooted_config_prefixes_every_directory() {
        let cfg = ScriptingConfig::rooted_at("/tmp/game");
        assert_eq!(cfg.config_dir, PathBuf::from("/tmp/game/config"));
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/game/cache"));
    }
}
