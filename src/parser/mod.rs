pub mod header;
pub mod records;

use std::io::BufRead;

use crate::error::ParseError;
pub use header::DescriptorHeader;
pub use records::FeatureRecords;

/// Read the header of a descriptor stream and return it with a lazy iterator
/// over the features that follow, parsed at the size the header declares.
pub fn read_descriptor<R: BufRead>(
    mut reader: R,
) -> Result<(DescriptorHeader, FeatureRecords<R>), ParseError> {
    let header = header::read_header(&mut reader)?;
    let records = FeatureRecords::starting_after(reader, header.feature_size, 1);
    Ok((header, records))
}
