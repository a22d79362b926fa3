use std::io::BufRead;

use crate::error::ParseError;

/// x, y, scale and angle precede the descriptor values of every feature.
pub const HEADER_VALUES: usize = 4;

/// One keypoint: location, scale, angle and its descriptor vector.
///
/// Values are kept as the extractor printed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRecord {
    values: Vec<String>,
}

impl FeatureRecord {
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Lazy iterator over the features of a descriptor stream.
///
/// Each feature starts on a line holding exactly [`HEADER_VALUES`] tokens and
/// continues over as many physical lines as it takes to collect
/// `HEADER_VALUES + feature_size` tokens. End of input between features ends
/// the sequence; any error ends it too. A blank line where a feature should
/// start is malformed.
pub struct FeatureRecords<R> {
    reader: R,
    record_len: usize,
    line_number: usize,
    line: String,
    done: bool,
}

impl<R: BufRead> FeatureRecords<R> {
    /// `lines_consumed` physical lines were already read from `reader`;
    /// error line numbers count from there.
    pub fn starting_after(reader: R, feature_size: usize, lines_consumed: usize) -> Self {
        FeatureRecords {
            reader,
            record_len: HEADER_VALUES + feature_size,
            line_number: lines_consumed,
            line: String::new(),
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<bool, ParseError> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n > 0 {
            self.line_number += 1;
        }
        Ok(n > 0)
    }

    fn next_record(&mut self) -> Result<Option<FeatureRecord>, ParseError> {
        if !self.read_line()? {
            return Ok(None);
        }
        let start = self.line_number;

        let mut values: Vec<String> = self.line.split_whitespace().map(str::to_owned).collect();
        if values.len() != HEADER_VALUES {
            return Err(ParseError::MalformedRecord {
                line: start,
                found: values.len(),
            });
        }

        values.reserve(self.record_len - HEADER_VALUES);
        while values.len() < self.record_len {
            if !self.read_line()? {
                return Err(ParseError::TruncatedRecord {
                    line: start,
                    expected: self.record_len,
                    found: values.len(),
                });
            }
            values.extend(self.line.split_whitespace().map(str::to_owned));
        }

        if values.len() > self.record_len {
            return Err(ParseError::OverlongRecord {
                line: start,
                expected: self.record_len,
                found: values.len(),
            });
        }

        Ok(Some(FeatureRecord { values }))
    }
}

impl<R: BufRead> Iterator for FeatureRecords<R> {
    type Item = Result<FeatureRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ── Tests ──
