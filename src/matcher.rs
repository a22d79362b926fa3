use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::ExtractError;
use crate::extract::{is_produced, produce_artifact};
use crate::naming::{descriptor_name, match_name};
use crate::pool;
use crate::tool::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Cached,
    Produced,
    /// One of the pair has no descriptor file yet.
    MissingDescriptors,
}

#[derive(Debug, Default)]
pub struct MatchStats {
    pub pairs: usize,
    pub produced: usize,
    pub cached: usize,
    pub missing: usize,
    pub failed: Vec<(String, String)>,
}

/// Every unordered pair, first name sorting before second.
pub fn image_pairs(images: &[String]) -> Vec<(String, String)> {
    let mut sorted = images.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut pairs = Vec::new();
    for (i, first) in sorted.iter().enumerate() {
        for second in &sorted[i + 1..] {
            pairs.push((first.clone(), second.clone()));
        }
    }
    pairs
}

/// Produce `matches_dir/match_<first stem>_<second>` unless it exists.
pub fn ensure_match(
    dir: &Path,
    matches_dir: &Path,
    first: &str,
    second: &str,
    tool: &dyn Tool,
) -> Result<MatchOutcome, ExtractError> {
    let target = matches_dir.join(match_name(first, second));
    if is_produced(&target) {
        return Ok(MatchOutcome::Cached);
    }

    let keys = [dir.join(descriptor_name(first)), dir.join(descriptor_name(second))];
    if !keys.iter().all(|k| is_produced(k)) {
        return Ok(MatchOutcome::MissingDescriptors);
    }
    let [k1, k2] = keys;

    let args: Vec<OsString> = vec![
        "-im1".into(),
        dir.join(first).into(),
        "-k1".into(),
        k1.into(),
        "-im2".into(),
        dir.join(second).into(),
        "-k2".into(),
        k2.into(),
    ];
    produce_artifact(tool, &format!("{first} + {second}"), &target, args, None)?;
    info!("Output: {}", target.display());
    Ok(MatchOutcome::Produced)
}

/// Match every pair of `images` over a bounded worker pool.
pub async fn match_all(
    dir: &Path,
    matches_dir: &Path,
    images: &[String],
    tool: Arc<dyn Tool>,
    workers: usize,
) -> Result<MatchStats> {
    fs::create_dir_all(matches_dir)
        .with_context(|| format!("Failed to create {}", matches_dir.display()))?;

    let pairs = image_pairs(images);
    let mut stats = MatchStats {
        pairs: pairs.len(),
        ..Default::default()
    };

    let (dir, matches_dir): (PathBuf, PathBuf) = (dir.to_path_buf(), matches_dir.to_path_buf());
    let results = pool::run_blocking(pairs, workers, move |(first, second): &(String, String)| {
        ensure_match(&dir, &matches_dir, first, second, tool.as_ref())
    })
    .await?;

    for ((first, second), result) in results {
        match result {
            Ok(MatchOutcome::Produced) => stats.produced += 1,
            Ok(MatchOutcome::Cached) => stats.cached += 1,
            Ok(MatchOutcome::MissingDescriptors) => {
                warn!("No descriptors for {} + {}, not matched", first, second);
                stats.missing += 1;
            }
            Err(e) => {
                warn!("Matching failed: {}", e);
                stats.failed.push((format!("{first} + {second}"), e.to_string()));
            }
        }
    }
    stats.failed.sort();

    info!(
        "Matched {} pairs ({} produced, {} cached, {} missing descriptors, {} failed)",
        stats.pairs,
        stats.produced,
        stats.cached,
        stats.missing,
        stats.failed.len()
    );
    Ok(stats)
}
