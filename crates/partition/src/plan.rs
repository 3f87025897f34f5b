//! Line-aligned partition planning.
//!
//! Splits a byte range into contiguous sub-ranges whose boundaries fall just
//! past a newline, so no line belongs to two partitions. Quoted data sets use
//! record boundaries instead, which also skip newlines inside a quoted field. The same planner
//! feeds multi-producer data sets in one process and per-pod position maps
//! for a distributed run.

use crate::error::{PartitionError, Result};
use csv_feeder_file::ByteRange;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Split `range` of the file at `path` into `count` partitions.
///
/// The partitions are returned in file order, cover `range` exactly and do
/// not overlap. Some may be empty when the range holds fewer lines than
/// `count`.
pub fn plan_partitions(path: &Path, range: ByteRange, count: usize) -> Result<Vec<ByteRange>> {
    if count == 0 {
        return Err(PartitionError::NoPartitions);
    }
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut partitions = Vec::with_capacity(count);
    let mut start = range.start;
    for i in 1..count as u64 {
        let target = range.start + range.len() * i / count as u64;
        let boundary = line_boundary(&mut reader, target.max(start), range)?;
        partitions.push(ByteRange::new(start, boundary));
        start = boundary;
    }
    partitions.push(ByteRange::new(start, range.stop));
    Ok(partitions)
}

/// First line start at or after `offset`, never past `range.stop`.
fn line_boundary(
    reader: &mut BufReader<File>,
    offset: u64,
    range: ByteRange,
) -> Result<u64> {
    if offset <= range.start {
        return Ok(range.start);
    }
    if offset >= range.stop {
        return Ok(range.stop);
    }
    // A line starts at `offset` exactly when the byte before it ends a line.
    reader.seek(SeekFrom::Start(offset - 1))?;
    let mut skipped = Vec::new();
    let read = reader.read_until(b'\n', &mut skipped)?;
    Ok((offset - 1 + read as u64).min(range.stop))
}

/// Like [`plan_partitions`], but boundaries only fall where no quoted field
/// is open, so a record whose quoted field spans lines stays in one
/// partition.
///
/// `range.start` must begin a record. Quote parity is tracked by scanning the
/// range from its start, with `""` inside a field counting as two quotes.
pub fn plan_record_partitions(
    path: &Path,
    range: ByteRange,
    count: usize,
) -> Result<Vec<ByteRange>> {
    if count == 0 {
        return Err(PartitionError::NoPartitions);
    }
    let targets: Vec<u64> = (1..count as u64)
        .map(|i| range.start + range.len() * i / count as u64)
        .collect();
    let mut boundaries = Vec::with_capacity(targets.len());

    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(range.start))?;
    let mut offset = range.start;
    let mut in_quote = false;
    let mut prev = 0u8;
    'scan: while offset < range.stop && boundaries.len() < targets.len() {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let take = buf.len().min((range.stop - offset) as usize);
        for &byte in &buf[..take] {
            let record_start = !in_quote
                && offset > range.start
                && (prev == b'\n' || (prev == b'\r' && byte != b'\n'));
            if record_start {
                while boundaries.len() < targets.len() && targets[boundaries.len()] <= offset {
                    boundaries.push(offset);
                }
                if boundaries.len() == targets.len() {
                    break 'scan;
                }
            }
            if byte == b'"' {
                in_quote = !in_quote;
            }
            prev = byte;
            offset += 1;
        }
        reader.consume(take);
    }
    boundaries.resize(targets.len(), range.stop);

    let mut partitions = Vec::with_capacity(count);
    let mut start = range.start;
    for boundary in boundaries {
        partitions.push(ByteRange::new(start, boundary));
        start = boundary;
    }
    partitions.push(ByteRange::new(start, range.stop));
    Ok(partitions)
}

/// Describe a plan for logging.
pub fn describe_plan(path: &Path, partitions: &[ByteRange]) -> String {
    let mut lines = vec![format!("Partitions of {}:", path.display())];
    for (i, range) in partitions.iter().enumerate() {
        lines.push(format!("  {}: {} ({} bytes)", i, range, range.len()));
    }
    lines.join("\n")
}
