use crate::catalog::{ExtensionSet, ScanOptions, DEFAULT_JPG_EXTENSIONS, DEFAULT_RAW_EXTENSIONS};
use crate::error::Error;
use crate::fingerprint::DEFAULT_HASH_SIZE;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SIMILARITY_THRESHOLD: u32 = 5;
pub const MAX_HASH_SIZE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpg_folder: Option<PathBuf>,
    pub similarity_threshold: u32,
    pub hash_size: u32,
    pub recursive: bool,
    pub include_hidden: bool,
    pub raw_extensions: Vec<String>,
    pub jpg_extensions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_log: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            raw_folder: None,
            jpg_folder: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            hash_size: DEFAULT_HASH_SIZE,
            recursive: false,
            include_hidden: false,
            raw_extensions: DEFAULT_RAW_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            jpg_extensions: DEFAULT_JPG_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            backup_log: None,
        }
    }
}

impl AppConfig {
    pub fn extension_set(&self) -> crate::error::Result<ExtensionSet> {
        ExtensionSet::new(&self.raw_extensions, &self.jpg_extensions)
    }

    pub fn scan_options(&self) -> crate::error::Result<ScanOptions> {
        Ok(ScanOptions {
            extensions: self.extension_set()?,
            recursive: self.recursive,
            include_hidden: self.include_hidden,
        })
    }

    /// Rejects settings that would make matching meaningless.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(1..=MAX_HASH_SIZE).contains(&self.hash_size) {
            return Err(Error::InvalidConfig(format!(
                "hash_size must be between 1 and {MAX_HASH_SIZE}, got {}",
                self.hash_size
            )));
        }
        let bits = self.hash_size * self.hash_size;
        if self.similarity_threshold > bits {
            return Err(Error::InvalidConfig(format!(
                "similarity_threshold {} exceeds the {bits}-bit fingerprint",
                self.similarity_threshold
            )));
        }
        self.extension_set().map(|_| ())
    }

    pub fn backup_log_path(&self, paths: &AppPaths) -> PathBuf {
        self.backup_log
            .clone()
            .unwrap_or_else(|| paths.default_backup_log.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
    pub default_backup_log: PathBuf,
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("com", "raw-renamer", "raw-renamer")
        .context("could not determine the OS config directory")?;
    let config_dir = proj.config_dir().to_path_buf();
    Ok(AppPaths {
        config_path: config_dir.join("config.toml"),
        default_backup_log: proj.data_dir().join("backup-log.jsonl"),
        config_dir,
    })
}

pub fn load_config() -> Result<AppConfig> {
    let paths = app_paths()?;
    load_config_from(&paths.config_path)
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    let paths = app_paths()?;
    save_config_to(config, &paths.config_path)
}

/// Missing file means defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read config file: {}", path.display()))?;
    let config = toml::from_str::<AppConfig>(&raw)
        .with_context(|| format!("could not parse config file: {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    config.validate()?;
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create config directory: {}", dir.display()))?;
    }
    let body = toml::to_string_pretty(config).context("could not serialize config")?;
    fs::write(path, body)
        .with_context(|| format!("could not write config file: {}", path.display()))?;
    Ok(())
}
