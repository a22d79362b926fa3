use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::InvalidPolicy;
use crate::error::{CombineError, ParseError};
use crate::naming::{is_descriptor_file, row_id};
use crate::parser::read_descriptor;

/// Column labels of the combined table. The leading `%` marks the row as a
/// comment for Matlab and stays glued to `File` so spreadsheets see one word.
const LEADING_COLUMNS: [&str; 5] = ["%File", "Location", "Location", "Scale", "Angle"];

#[derive(Debug, Default)]
pub struct CombineStats {
    /// Descriptor files that contributed rows.
    pub files: usize,
    pub rows: usize,
    /// (file, reason) for files left out under [`InvalidPolicy::Skip`].
    pub skipped: Vec<(String, String)>,
}

pub fn header_row(feature_size: usize) -> String {
    let mut columns: Vec<&str> = LEADING_COLUMNS.to_vec();
    columns.extend(std::iter::repeat("Feature").take(feature_size));
    columns.join(" ")
}

/// Descriptor files in `dir`, sorted by name. `exclude` keeps a combined
/// table living in the same directory from being read back in.
pub fn descriptor_files(dir: &Path, exclude: Option<&Path>) -> Result<Vec<String>, CombineError> {
    let excluded = exclude.and_then(|p| canonical_in(dir, p));
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CombineError::io(dir, e))? {
        let entry = entry.map_err(|e| CombineError::io(dir, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_descriptor_file(&name) || excluded.as_deref() == Some(name.as_str()) {
            continue;
        }
        // metadata follows symlinks; a dangling link is left out
        if fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// File name of `path` if it lives directly in `dir`.
fn canonical_in(dir: &Path, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_string();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let same = match (fs::canonicalize(dir), fs::canonicalize(parent)) {
        (Ok(a), Ok(b)) => a == b,
        _ => dir == parent,
    };
    same.then_some(name)
}

/// Write one row per feature of the descriptor file at `path` to `out`, each
/// prefixed with the number at the end of `name`. Returns the row count,
/// which always equals the count the file declares.
pub fn append_descriptor<W: Write>(
    path: &Path,
    name: &str,
    feature_size: usize,
    out: &mut W,
) -> Result<usize, CombineError> {
    let parse_err = |source: ParseError| CombineError::Parse {
        file: name.to_string(),
        source,
    };

    let file = File::open(path).map_err(|e| CombineError::io(path, e))?;
    let (header, records) = read_descriptor(BufReader::new(file)).map_err(parse_err)?;
    if header.feature_size != feature_size {
        return Err(CombineError::FeatureSizeMismatch {
            file: name.to_string(),
            expected: feature_size,
            actual: header.feature_size,
        });
    }
    let id = row_id(name).ok_or_else(|| CombineError::UnrecognizedFileName {
        file: name.to_string(),
    })?;

    let mut count = 0;
    for record in records {
        let record = record.map_err(parse_err)?;
        write!(out, "{id}").map_err(CombineError::Write)?;
        for value in record.values() {
            write!(out, " {value}").map_err(CombineError::Write)?;
        }
        out.write_all(b"\n").map_err(CombineError::Write)?;
        count += 1;
    }

    if count != header.record_count {
        return Err(CombineError::RecordCountMismatch {
            file: name.to_string(),
            declared: header.record_count,
            actual: count,
        });
    }
    Ok(count)
}

/// Rebuild the combined table at `output` from every descriptor file in
/// `dir`, in name order.
///
/// The table is written beside `output` and moved into place only when
/// complete, so a failed run leaves the previous table as it was.
pub fn combine_descriptors(
    dir: &Path,
    output: &Path,
    feature_size: usize,
    policy: InvalidPolicy,
) -> Result<CombineStats, CombineError> {
    let names = descriptor_files(dir, Some(output))?;
    let tmp = tmp_path(output);

    match write_table(dir, &names, &tmp, feature_size, policy) {
        Ok(stats) => {
            fs::rename(&tmp, output).map_err(|e| CombineError::io(output, e))?;
            info!(
                "Combined {} rows from {} files into {}",
                stats.rows,
                stats.files,
                output.display()
            );
            Ok(stats)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_table(
    dir: &Path,
    names: &[String],
    tmp: &Path,
    feature_size: usize,
    policy: InvalidPolicy,
) -> Result<CombineStats, CombineError> {
    let file = File::create(tmp).map_err(|e| CombineError::io(tmp, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", header_row(feature_size)).map_err(CombineError::Write)?;

    let mut stats = CombineStats::default();
    for name in names {
        info!("Parsing: {}", name);
        let path = dir.join(name);
        match policy {
            InvalidPolicy::Abort => {
                stats.rows += append_descriptor(&path, name, feature_size, &mut out)?;
                stats.files += 1;
            }
            InvalidPolicy::Skip => {
                // Rows are staged so a bad file contributes nothing
                let mut staged = Vec::new();
                match append_descriptor(&path, name, feature_size, &mut staged) {
                    Ok(rows) => {
                        out.write_all(&staged).map_err(CombineError::Write)?;
                        stats.rows += rows;
                        stats.files += 1;
                    }
                    Err(e) => {
                        warn!("Skipping {}", e);
                        stats.skipped.push((name.clone(), e.to_string()));
                    }
                }
            }
        }
    }

    out.flush().map_err(CombineError::Write)?;
    Ok(stats)
}

fn tmp_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

// ── Tests ──
