use super::error::CodecError;
use super::record::{
    BatchControl, BatchHeader, EntryDetail, FileControl, FileHeader, RECORD_LENGTH, Record,
};

/// Decode one record. A trailing carriage return is tolerated.
pub fn decode_line(line: &str) -> Result<Record, CodecError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.len() == RECORD_LENGTH && line.bytes().all(|b| b == b'9') {
        return Ok(Record::Filler);
    }
    match line.chars().next() {
        Some('1') => FileHeader::parse(line).map(Record::FileHeader),
        Some('5') => BatchHeader::parse(line).map(Record::BatchHeader),
        Some('6') => EntryDetail::parse(line).map(Record::Entry),
        Some('8') => BatchControl::parse(line).map(Record::BatchControl),
        Some('9') => FileControl::parse(line).map(Record::FileControl),
        Some(other) => Err(CodecError::UnknownRecordType(other)),
        None => Err(CodecError::LineLength {
            expected: RECORD_LENGTH,
            actual: 0,
        }),
    }
}

/// Decode every non-blank line of a file.
pub fn decode_file(text: &str) -> Result<Vec<Record>, CodecError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode_line)
        .collect()
}

/// Entry-detail records of a decoded file.
pub fn entries(records: &[Record]) -> impl Iterator<Item = &EntryDetail> {
    records.iter().filter_map(|record| match record {
        Record::Entry(entry) => Some(entry),
        _ => None,
    })
}
