use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{
    ConfigFileEntry, DEFAULT_ARCHIVE_DIR, DEFAULT_CONFIG_PATH, DEFAULT_SITES_ROOT,
    SitedownConfig, default_registry, load_config,
};

pub const ENV_SITES_ROOT: &str = "SITEDOWN_SITES_ROOT";
pub const ENV_ARCHIVE_DIR: &str = "SITEDOWN_ARCHIVE_DIR";
pub const ENV_CONFIG: &str = "SITEDOWN_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub sites_root: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub sites_root: PathBuf,
    pub archive_dir: PathBuf,
    pub config_path: PathBuf,
    pub config_files: Vec<ConfigFileEntry>,
    pub sites_root_source: ValueSource,
    pub archive_source: ValueSource,
    pub config_source: ValueSource,
    pub registry_source: ValueSource,
}

impl ResolvedPaths {
    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.sites_root.join(site)
    }

    pub fn diagnostics(&self) -> String {
        let mut out = format!(
            "sites_root={} ({})\narchive_dir={} ({})\nconfig_path={} ({})\nregistry ({}):",
            self.sites_root.display(),
            self.sites_root_source.as_str(),
            self.archive_dir.display(),
            self.archive_source.as_str(),
            self.config_path.display(),
            self.config_source.as_str(),
            self.registry_source.as_str(),
        );
        for entry in &self.config_files {
            out.push_str(&format!("\n  {} = {}", entry.label, entry.path.display()));
        }
        out
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup(ENV_CONFIG) {
        (absolutize(Path::new(&value), &context.cwd), ValueSource::Env)
    } else {
        (PathBuf::from(DEFAULT_CONFIG_PATH), ValueSource::Default)
    };
    let config: SitedownConfig = load_config(&config_path)?;

    let (sites_root, sites_root_source) = resolve_dir(
        overrides.sites_root.as_deref(),
        lookup(ENV_SITES_ROOT),
        config.paths.sites_root.clone(),
        DEFAULT_SITES_ROOT,
        &context.cwd,
    );
    let (archive_dir, archive_source) = resolve_dir(
        overrides.archive_dir.as_deref(),
        lookup(ENV_ARCHIVE_DIR),
        config.paths.archive_dir.clone(),
        DEFAULT_ARCHIVE_DIR,
        &context.cwd,
    );

    let (config_files, registry_source) = if config.config_files.is_empty() {
        (default_registry(), ValueSource::Default)
    } else {
        (config.config_files, ValueSource::Config)
    };

    Ok(ResolvedPaths {
        sites_root,
        archive_dir,
        config_path,
        config_files,
        sites_root_source,
        archive_source,
        config_source,
        registry_source,
    })
}

fn resolve_dir(
    flag: Option<&Path>,
    env_value: Option<String>,
    from_config: Option<PathBuf>,
    default: &str,
    cwd: &Path,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        (absolutize(path, cwd), ValueSource::Flag)
    } else if let Some(value) = env_value {
        (absolutize(Path::new(&value), cwd), ValueSource::Env)
    } else if let Some(path) = from_config {
        (path, ValueSource::Config)
    } else {
        (PathBuf::from(default), ValueSource::Default)
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
