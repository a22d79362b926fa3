use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::naming::{descriptor_name, visualization_name};
use crate::pool;
use crate::tool::{Invocation, Tool};

/// Makes the extractor draw keypoints over the image instead of listing them.
pub const DISPLAY_FLAG: &str = "-display";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    /// Already on disk and non-empty; the tool was not run.
    Cached,
    Produced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOutcome {
    pub visualization: ArtifactState,
    pub descriptor: ArtifactState,
}

impl ExtractOutcome {
    pub fn produced_any(&self) -> bool {
        self.visualization == ArtifactState::Produced || self.descriptor == ArtifactState::Produced
    }
}

/// Counts for a batch of images.
#[derive(Debug, Default)]
pub struct ExtractStats {
    pub total: usize,
    pub produced: usize,
    pub cached: usize,
    /// (image, error message), sorted by image.
    pub failed: Vec<(String, String)>,
}

/// An artifact counts as done once it exists with non-zero size. Content is
/// not inspected.
pub fn is_produced(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Make sure `sift_<image>` and `sift_<stem>.txt` exist next to `image`,
/// running the tool only for whichever is missing or empty.
pub fn ensure_artifacts(dir: &Path, image: &str, tool: &dyn Tool) -> Result<ExtractOutcome, ExtractError> {
    let source = dir.join(image);
    let visualization = ensure_one(
        tool,
        image,
        &source,
        &dir.join(visualization_name(image)),
        vec![DISPLAY_FLAG.into()],
    )?;
    let descriptor = ensure_one(
        tool,
        image,
        &source,
        &dir.join(descriptor_name(image)),
        Vec::new(),
    )?;

    let outcome = ExtractOutcome {
        visualization,
        descriptor,
    };
    if !outcome.produced_any() {
        debug!(image, "artifacts already present");
    }
    Ok(outcome)
}

fn ensure_one(
    tool: &dyn Tool,
    image: &str,
    source: &Path,
    target: &Path,
    args: Vec<OsString>,
) -> Result<ArtifactState, ExtractError> {
    if is_produced(target) {
        return Ok(ArtifactState::Cached);
    }
    let input = File::open(source).map_err(|source| ExtractError::OpenInput {
        image: image.to_string(),
        source,
    })?;
    produce_artifact(tool, image, target, args, Some(input))?;
    info!("Output: {}", target.display());
    Ok(ArtifactState::Produced)
}

/// Run `tool` with stdout going to `<target>.part`, renamed onto `target`
/// only after a clean exit. `label` names the input(s) in errors.
pub(crate) fn produce_artifact(
    tool: &dyn Tool,
    label: &str,
    target: &Path,
    args: Vec<OsString>,
    stdin: Option<File>,
) -> Result<(), ExtractError> {
    let artifact = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.display().to_string());
    let write_err = |source: std::io::Error| ExtractError::WriteArtifact {
        image: label.to_string(),
        artifact: artifact.clone(),
        source,
    };

    let part = part_path(target);
    let stdout = File::create(&part).map_err(|e| write_err(e))?;

    if let Err(source) = tool.invoke(Invocation { args, stdin, stdout }) {
        let _ = fs::remove_file(&part);
        return Err(ExtractError::Tool {
            image: label.to_string(),
            artifact: artifact.clone(),
            source,
        });
    }

    fs::rename(&part, target).map_err(|e| {
        let _ = fs::remove_file(&part);
        write_err(e)
    })
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Extract every image over a bounded worker pool. A failing image is logged
/// and listed in the stats; it does not stop the others.
pub async fn extract_all(
    dir: &Path,
    images: Vec<String>,
    tool: Arc<dyn Tool>,
    workers: usize,
) -> Result<ExtractStats> {
    let total = images.len();
    let dir = dir.to_path_buf();
    let results = pool::run_blocking(images, workers, move |image: &String| {
        ensure_artifacts(&dir, image, tool.as_ref())
    })
    .await?;

    let mut stats = ExtractStats {
        total,
        ..Default::default()
    };
    for (image, result) in results {
        match result {
            Ok(outcome) if outcome.produced_any() => stats.produced += 1,
            Ok(_) => stats.cached += 1,
            Err(e) => {
                warn!("Extraction failed: {}", e);
                stats.failed.push((image, e.to_string()));
            }
        }
    }
    stats.failed.sort();

    info!(
        "Extracted {} images ({} produced, {} cached, {} failed)",
        stats.total,
        stats.produced,
        stats.cached,
        stats.failed.len()
    );
    Ok(stats)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::ToolError;

    /// Stand-in extractor: echoes a fake overlay or a one-feature descriptor
    /// file. Fails on input that reads `bad`.
    #[derive(Default)]
    pub(crate) struct FakeExtractor {
        pub calls: AtomicUsize,
    }

    impl FakeExtractor {
        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Tool for FakeExtractor {
        fn invoke(&self, mut invocation: Invocation) -> Result<(), ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut input = String::new();
            if let Some(mut stdin) = invocation.stdin.take() {
                stdin.read_to_string(&mut input)?;
            }
            if input.trim() == "bad" {
                invocation.stdout.write_all(b"partial")?;
                return Err(ToolError::Exit {
                    program: "sift".into(),
                    status: "exit status: 1".into(),
                });
            }
            if invocation.args.iter().any(|a| a == DISPLAY_FLAG) {
                invocation.stdout.write_all(b"P5 overlay")?;
            } else {
                invocation.stdout.write_all(b"1 4\n1.0 2.0 3.0 0.5\n 1 2 3 4\n")?;
            }
            Ok(())
        }
    }

    fn image(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn produces_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        image(dir.path(), "1_2.pgm", "P5 image");
        let tool = FakeExtractor::default();

        let outcome = ensure_artifacts(dir.path(), "1_2.pgm", &tool).unwrap();
        assert_eq!(outcome.visualization, ArtifactState::Produced);
        assert_eq!(outcome.descriptor, ArtifactState::Produced);
        assert_eq!(tool.calls(), 2);
        assert_eq!(fs::read_to_string(dir.path().join("sift_1_2.pgm")).unwrap(), "P5 overlay");
        assert!(fs::read_to_string(dir.path().join("sift_1_2.txt"))
            .unwrap()
            .starts_with("1 4\n"));
    }

    #[test]
    fn second_run_invokes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        image(dir.path(), "1_2.pgm", "P5 image");
        let tool = FakeExtractor::default();

        ensure_artifacts(dir.path(), "1_2.pgm", &tool).unwrap();
        let outcome = ensure_artifacts(dir.path(), "1_2.pgm", &tool).unwrap();
        assert!(!outcome.produced_any());
        assert_eq!(tool.calls(), 2);
    }

    #[test]
    fn empty_artifact_is_redone() {
        let dir = tempfile::tempdir().unwrap();
        image(dir.path(), "1_2.pgm", "P5 image");
        fs::write(dir.path().join("sift_1_2.pgm"), "existing").unwrap();
        fs::write(dir.path().join("sift_1_2.txt"), "").unwrap();
        let tool = FakeExtractor::default();

        let outcome = ensure_artifacts(dir.path(), "1_2.pgm", &tool).unwrap();
        assert_eq!(outcome.visualization, ArtifactState::Cached);
        assert_eq!(outcome.descriptor, ArtifactState::Produced);
        assert_eq!(tool.calls(), 1);
        assert_eq!(fs::read_to_string(dir.path().join("sift_1_2.pgm")).unwrap(), "existing");
    }

    #[test]
    fn failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        image(dir.path(), "1_2.pgm", "bad");
        let tool = FakeExtractor::default();

        let err = ensure_artifacts(dir.path(), "1_2.pgm", &tool).unwrap_err();
        assert!(matches!(err, ExtractError::Tool { ref artifact, .. } if artifact == "sift_1_2.pgm"));
        assert_eq!(tool.calls(), 1);
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("1_2.pgm")]);
    }

    #[test]
    fn missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FakeExtractor::default();
        let err = ensure_artifacts(dir.path(), "9_9.pgm", &tool).unwrap_err();
        assert!(matches!(err, ExtractError::OpenInput { .. }));
        assert_eq!(tool.calls(), 0);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        image(dir.path(), "1_1.pgm", "P5 a");
        image(dir.path(), "1_2.pgm", "bad");
        image(dir.path(), "1_3.pgm", "P5 c");
        fs::write(dir.path().join("sift_1_3.pgm"), "done").unwrap();
        fs::write(dir.path().join("sift_1_3.txt"), "0 4\n").unwrap();
        let tool = Arc::new(FakeExtractor::default());

        let images = vec!["1_1.pgm".to_string(), "1_2.pgm".to_string(), "1_3.pgm".to_string()];
        let stats = extract_all(dir.path(), images, tool.clone(), 2).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.produced, 1);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].0, "1_2.pgm");
        assert_eq!(tool.calls(), 3);
        assert!(dir.path().join("sift_1_1.txt").exists());
    }
}
