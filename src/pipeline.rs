use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

use crate::combine::{combine_descriptors, CombineStats};
use crate::config::{InvalidPolicy, Settings};
use crate::extract::{extract_all, ExtractStats};
use crate::matcher::{match_all, MatchStats};
use crate::tool::{SubprocessTool, Tool};

/// What one `run` did, stage by stage.
pub struct RunReport {
    pub images: usize,
    pub extract: ExtractStats,
    pub combine: CombineStats,
    pub matches: Option<MatchStats>,
}

/// Image names in `dir` matching `pattern`, sorted.
pub fn discover_images(dir: &Path, pattern: &Regex) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let mut images = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if pattern.is_match(&name) && entry.path().is_file() {
            images.push(name);
        }
    }
    images.sort();
    Ok(images)
}

/// Discovery, extraction and aggregation over one image directory.
pub struct Pipeline {
    settings: Settings,
    pattern: Regex,
    extractor: Arc<dyn Tool>,
    matcher: Arc<dyn Tool>,
}

impl Pipeline {
    /// Uses the executables named in `settings`.
    pub fn new(settings: Settings) -> Result<Self> {
        let timeout = settings.tool_timeout();
        let extractor = SubprocessTool::new(&settings.sift_exe).with_timeout(timeout);
        let matcher = SubprocessTool::new(&settings.match_exe).with_timeout(timeout);
        Self::with_tools(settings, Arc::new(extractor), Arc::new(matcher))
    }

    pub fn with_tools(
        settings: Settings,
        extractor: Arc<dyn Tool>,
        matcher: Arc<dyn Tool>,
    ) -> Result<Self> {
        let pattern = Regex::new(&settings.image_pattern)
            .with_context(|| format!("Invalid image_pattern {:?}", settings.image_pattern))?;
        Ok(Pipeline {
            settings,
            pattern,
            extractor,
            matcher,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn discover(&self) -> Result<Vec<String>> {
        discover_images(&self.settings.image_dir, &self.pattern)
    }

    pub async fn extract(&self, images: Vec<String>) -> Result<ExtractStats> {
        extract_all(
            &self.settings.image_dir,
            images,
            Arc::clone(&self.extractor),
            self.settings.workers,
        )
        .await
    }

    pub fn combine(&self, policy: InvalidPolicy, output: &Path) -> Result<CombineStats> {
        combine_descriptors(
            &self.settings.image_dir,
            output,
            self.settings.feature_size,
            policy,
        )
        .context("Combining descriptor files failed")
    }

    pub async fn match_pairs(&self, images: &[String]) -> Result<MatchStats> {
        match_all(
            &self.settings.image_dir,
            &self.settings.matches_dir(),
            images,
            Arc::clone(&self.matcher),
            self.settings.workers,
        )
        .await
    }

    /// Extract every discovered image, then combine all descriptor files once.
    /// Extraction failures are counted, not fatal.
    pub async fn run(&self, with_matches: bool) -> Result<RunReport> {
        let images = self.discover()?;
        info!(
            "Found {} images in {}",
            images.len(),
            self.settings.image_dir.display()
        );

        let extract = self.extract(images.clone()).await?;
        let combine = self.combine(self.settings.on_invalid, &self.settings.combined_path())?;
        let matches = if with_matches {
            Some(self.match_pairs(&images).await?)
        } else {
            None
        };

        Ok(RunReport {
            images: images.len(),
            extract,
            combine,
            matches,
        })
    }
}
