use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Prefix the extractor's artifacts share.
pub const SIFT_PREFIX: &str = "sift_";

/// Default pattern for images to extract features from, e.g. `12_3.pgm`.
pub const DEFAULT_IMAGE_PATTERN: &str = r"^[0-9_]+\.pgm$";

static DESCRIPTOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sift_.*\.txt$").unwrap());
static ROW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*_([0-9]+)\..*$").unwrap());

/// `sift_<name>`: the keypoint overlay image.
pub fn visualization_name(image: &str) -> String {
    format!("{SIFT_PREFIX}{image}")
}

/// `sift_<stem>.txt`: the keypoint descriptor text.
pub fn descriptor_name(image: &str) -> String {
    let stem = Path::new(image)
        .with_extension("txt")
        .to_string_lossy()
        .into_owned();
    format!("{SIFT_PREFIX}{stem}")
}

pub fn is_descriptor_file(name: &str) -> bool {
    DESCRIPTOR_RE.is_match(name)
}

/// Trailing digit run of `<anything>_<digits>.<ext>` as a decimal number of
/// any length, leading zeros dropped.
pub fn row_id(name: &str) -> Option<String> {
    let digits = ROW_ID_RE.captures(name)?.get(1)?.as_str();
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
}

/// `match_<stem a>_<name b>`: the match overlay for an image pair.
pub fn match_name(first: &str, second: &str) -> String {
    let stem = Path::new(first)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| first.to_string());
    format!("match_{stem}_{second}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        assert_eq!(visualization_name("3_14.pgm"), "sift_3_14.pgm");
        assert_eq!(descriptor_name("3_14.pgm"), "sift_3_14.txt");
        assert_eq!(descriptor_name("noext"), "sift_noext.txt");
    }

    #[test]
    fn descriptor_files() {
        assert!(is_descriptor_file("sift_3_14.txt"));
        assert!(is_descriptor_file("sift_img_1.txt"));
        assert!(!is_descriptor_file("sift_3_14.pgm"));
        assert!(!is_descriptor_file("3_14.txt"));
        assert!(!is_descriptor_file("sift_3_14.txt.part"));
    }

    #[test]
    fn row_ids() {
        assert_eq!(row_id("sift_img_1.txt").as_deref(), Some("1"));
        assert_eq!(row_id("sift_3_14.txt").as_deref(), Some("14"));
        assert_eq!(row_id("sift_0_007.txt").as_deref(), Some("7"));
        assert_eq!(row_id("sift_a.b_12.txt").as_deref(), Some("12"));
        assert_eq!(row_id("sift_img_000.txt").as_deref(), Some("0"));
    }

    #[test]
    fn row_id_does_not_overflow() {
        assert_eq!(
            row_id("sift_img_99999999999999999999.txt").as_deref(),
            Some("99999999999999999999")
        );
    }

    #[test]
    fn row_id_requires_trailing_digits() {
        assert_eq!(row_id("sift_img.txt"), None);
        assert_eq!(row_id("sift_img_x1.txt"), None);
        assert_eq!(row_id("sift_12"), None);
    }

    #[test]
    fn image_pattern() {
        let re = Regex::new(DEFAULT_IMAGE_PATTERN).unwrap();
        assert!(re.is_match("1_2.pgm"));
        assert!(re.is_match("20090312_101.pgm"));
        assert!(!re.is_match("sift_1_2.pgm"));
        assert!(!re.is_match("1_2.txt"));
    }

    #[test]
    fn match_names() {
        assert_eq!(match_name("1_2.pgm", "1_3.pgm"), "match_1_2_1_3.pgm");
    }
}
