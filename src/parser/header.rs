use std::io::BufRead;

use crate::error::ParseError;

/// First line of a descriptor file: `<feature count> <feature size>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub record_count: usize,
    pub feature_size: usize,
}

pub fn parse_header(line: &str) -> Result<DescriptorHeader, ParseError> {
    let invalid = || ParseError::InvalidHeader(line.trim().to_string());
    let mut fields = line.split_whitespace();
    let (Some(count), Some(size), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(invalid());
    };
    Ok(DescriptorHeader {
        record_count: count.parse().map_err(|_| invalid())?,
        feature_size: size.parse().map_err(|_| invalid())?,
    })
}

/// Consume and parse the header line.
pub fn read_header<R: BufRead>(reader: &mut R) -> Result<DescriptorHeader, ParseError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ParseError::MissingHeader);
    }
    parse_header(&line)
}
