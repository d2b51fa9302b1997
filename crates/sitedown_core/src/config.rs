use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sitedown.toml";
pub const DEFAULT_SITES_ROOT: &str = "/lu/sites";
pub const DEFAULT_ARCHIVE_DIR: &str = "/lu/sites/archive";

/// Config files scanned when no registry is configured, in report order.
pub const DEFAULT_CONFIG_FILES: &[(&str, &str)] = &[
    (
        "Apache vhosts",
        "/etc/apache2/sites-available/esp_sites.conf",
    ),
    ("System crontab", "/etc/crontab"),
    ("Exim config", "/etc/exim4/update-exim4.conf.conf"),
];

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SitedownConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub config_files: Vec<ConfigFileEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub sites_root: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConfigFileEntry {
    pub label: String,
    pub path: PathBuf,
}

impl ConfigFileEntry {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

pub fn default_registry() -> Vec<ConfigFileEntry> {
    DEFAULT_CONFIG_FILES
        .iter()
        .map(|(label, path)| ConfigFileEntry::new(*label, *path))
        .collect()
}

/// Load and parse a SitedownConfig from a TOML file. Returns default if the file doesn't exist.
///
/// Relative paths inside the file are resolved against the file's directory.
pub fn load_config(config_path: &Path) -> Result<SitedownConfig> {
    if !config_path.exists() {
        return Ok(SitedownConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let mut parsed: SitedownConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;

    for entry in &parsed.config_files {
        if entry.label.trim().is_empty() {
            bail!(
                "config file entry with empty label in {}",
                config_path.display()
            );
        }
    }

    let base = config_path.parent().unwrap_or(Path::new(""));
    parsed.paths.sites_root = parsed.paths.sites_root.map(|path| absolutize(&path, base));
    parsed.paths.archive_dir = parsed.paths.archive_dir.map(|path| absolutize(&path, base));
    for entry in &mut parsed.config_files {
        entry.path = absolutize(&entry.path, base);
    }
    Ok(parsed)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
