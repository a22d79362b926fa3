use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::naming::DEFAULT_IMAGE_PATTERN;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "siftify.toml";
pub const COMBINED_FILE_NAME: &str = "sift_combined.txt";
pub const MATCHES_DIR_NAME: &str = "matches";

/// What to do with a descriptor file that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidPolicy {
    /// Stop and leave the previous combined table in place.
    #[default]
    Abort,
    /// Leave the file out of the table and report it.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Holds the input images and every derived artifact.
    pub image_dir: PathBuf,
    pub sift_exe: PathBuf,
    pub match_exe: PathBuf,
    pub feature_size: usize,
    /// Defaults to `<image_dir>/../sift_combined.txt`.
    #[serde(default)]
    pub combined_path: Option<PathBuf>,
    /// Defaults to `<image_dir>/../matches`.
    #[serde(default)]
    pub matches_dir: Option<PathBuf>,
    pub workers: usize,
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,
    pub image_pattern: String,
    #[serde(default)]
    pub on_invalid: InvalidPolicy,
}

impl Settings {
    /// Defaults, then `path` (or `siftify.toml` if present), then
    /// `SIFTIFY_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let builder = defaults()?
            .add_source(file)
            .add_source(Environment::with_prefix("SIFTIFY").try_parsing(true));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        if settings.feature_size == 0 {
            anyhow::bail!("feature_size must be positive");
        }
        regex::Regex::new(&settings.image_pattern)
            .with_context(|| format!("Invalid image_pattern {:?}", settings.image_pattern))?;
        Ok(settings)
    }

    pub fn combined_path(&self) -> PathBuf {
        self.combined_path
            .clone()
            .unwrap_or_else(|| sibling_of(&self.image_dir, COMBINED_FILE_NAME))
    }

    pub fn matches_dir(&self) -> PathBuf {
        self.matches_dir
            .clone()
            .unwrap_or_else(|| sibling_of(&self.image_dir, MATCHES_DIR_NAME))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
    Ok(Config::builder()
        .set_default("image_dir", "../temp/images/pgm")?
        .set_default("sift_exe", "../temp/siftDemoV4/sift")?
        .set_default("match_exe", "../temp/siftDemoV4/match")?
        .set_default("feature_size", 128)?
        .set_default("workers", 4)?
        .set_default("image_pattern", DEFAULT_IMAGE_PATTERN)?
        .set_default("on_invalid", "abort")?)
}

/// `name` one level above `dir`.
fn sibling_of(dir: &Path, name: &str) -> PathBuf {
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => dir.join("..").join(name),
    }
}
