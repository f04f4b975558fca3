//! # Archive directory
//!
//! Every archive starts with a directory that maps block ids to the place
//! their payload landed in the file:
//!
//! ```text
//! [directory_len: i32 LE]
//! [record 0] .. [record N-1]        id: i32 LE, offset: i64 LE, length: i32 LE
//! [payload region]                  block payloads in completion order
//! ```
//!
//! Records are stored sorted by id. Offsets are absolute archive positions,
//! so the payload region can be written in whatever order workers finish.
//! The compressor reserves the directory region up front and overwrites it
//! once the sink has placed every block.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::block::BlockDescriptor;
use crate::error::{BlockzipError, Result};

/// Size of one serialized block record.
pub const RECORD_SIZE: usize = 16;
/// Size of the directory length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Bytes reserved at the start of an archive holding `blocks` blocks.
pub fn reserved_len(blocks: usize) -> u64 {
    (blocks * RECORD_SIZE + LENGTH_PREFIX) as u64
}

/// Writes the zeroed directory placeholder and returns where the payload begins.
pub fn reserve<W: Write>(writer: &mut W, blocks: usize) -> io::Result<u64> {
    let len = reserved_len(blocks);
    io::copy(&mut io::repeat(0).take(len), writer)?;
    Ok(len)
}

/// Serializes a directory, sorting it by id first.
///
/// Sinks report blocks in completion order; records on disk are in id order.
pub fn encode_directory(directory: &[BlockDescriptor]) -> Result<Vec<u8>> {
    let mut records = directory.to_vec();
    records.sort_by_key(|b| b.id);

    let body_len = records.len() * RECORD_SIZE;
    let prefix = i32::try_from(body_len).map_err(|_| {
        BlockzipError::Config(format!(
            "{} blocks do not fit in an archive directory",
            records.len()
        ))
    })?;

    let mut out = Vec::with_capacity(LENGTH_PREFIX + body_len);
    out.extend_from_slice(&prefix.to_le_bytes());
    for record in &records {
        out.extend_from_slice(&record.id.to_le_bytes());
        out.extend_from_slice(&record.offset.to_le_bytes());
        out.extend_from_slice(&record.length.to_le_bytes());
    }
    Ok(out)
}

/// Overwrites the reserved region at the start of `writer` with the final directory.
///
/// `planned` is the block count the region was reserved for and must equal
/// the directory length.
pub fn write_directory<W: Write + Seek>(
    writer: &mut W,
    directory: &[BlockDescriptor],
    planned: usize,
) -> io::Result<()> {
    if directory.len() != planned {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "directory has {} records but {} were reserved",
                directory.len(),
                planned
            ),
        ));
    }
    let bytes = encode_directory(directory)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    writer.seek(SeekFrom::Start(0))?;
    writer.write_all(&bytes)?;
    writer.flush()
}

/// Parses a directory from the first bytes of an archive.
///
/// `header` must start at archive offset 0 and contain at least the whole
/// directory; `archive_len` is the total archive size used to validate
/// record placement.
pub fn decode_directory(header: &[u8], archive_len: u64) -> Result<Vec<BlockDescriptor>> {
    let body_len = directory_len(header, archive_len)?;
    if header.len() < LENGTH_PREFIX + body_len {
        return Err(BlockzipError::CorruptArchive(format!(
            "directory truncated: {} of {} bytes present",
            header.len() - LENGTH_PREFIX,
            body_len
        )));
    }
    let body = &header[LENGTH_PREFIX..LENGTH_PREFIX + body_len];
    let payload_start = (LENGTH_PREFIX + body_len) as i64;

    let mut records: Vec<BlockDescriptor> = body
        .chunks_exact(RECORD_SIZE)
        .map(|raw| {
            let id = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let mut offset = [0u8; 8];
            offset.copy_from_slice(&raw[4..12]);
            let length = i32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
            BlockDescriptor::new(id, i64::from_le_bytes(offset), length)
        })
        .collect();
    records.sort_by_key(|b| b.id);

    for (expected, record) in records.iter().enumerate() {
        if record.id as usize != expected {
            return Err(BlockzipError::CorruptArchive(format!(
                "block ids are not contiguous: expected {}, found {}",
                expected, record.id
            )));
        }
        if record.length < 0 {
            return Err(BlockzipError::CorruptArchive(format!(
                "block {} has negative length {}",
                record.id, record.length
            )));
        }
        let end = record.end().ok_or_else(|| {
            BlockzipError::CorruptArchive(format!(
                "block {} at offset {} with length {} overflows",
                record.id, record.offset, record.length
            ))
        })?;
        if record.offset < payload_start || end as u64 > archive_len {
            return Err(BlockzipError::CorruptArchive(format!(
                "block {} at {}..{} lies outside the payload region {}..{}",
                record.id, record.offset, end, payload_start, archive_len
            )));
        }
    }

    let mut by_offset: Vec<&BlockDescriptor> = records.iter().collect();
    by_offset.sort_by_key(|b| b.offset);
    for pair in by_offset.windows(2) {
        // Every end was checked above.
        if pair[0].end().map_or(true, |end| end > pair[1].offset) {
            return Err(BlockzipError::CorruptArchive(format!(
                "blocks {} and {} overlap",
                pair[0].id, pair[1].id
            )));
        }
    }

    Ok(records)
}

/// Reads and validates the directory of the archive at `path`.
pub fn read_directory(path: &Path) -> Result<Vec<BlockDescriptor>> {
    let mut file = File::open(path).map_err(|e| BlockzipError::io(e, path))?;
    let archive_len = file
        .metadata()
        .map_err(|e| BlockzipError::io(e, path))?
        .len();

    let mut prefix = [0u8; LENGTH_PREFIX];
    if archive_len < LENGTH_PREFIX as u64 {
        return Err(BlockzipError::CorruptArchive(format!(
            "'{}' is {} bytes, too short for a directory",
            path.display(),
            archive_len
        )));
    }
    file.read_exact(&mut prefix)
        .map_err(|e| BlockzipError::io(e, path))?;
    // Validate before allocating so a garbage prefix cannot request gigabytes.
    let body_len = directory_len(&prefix, archive_len)
        .map_err(|e| annotate(e, path))?;

    let mut header = vec![0u8; LENGTH_PREFIX + body_len];
    header[..LENGTH_PREFIX].copy_from_slice(&prefix);
    file.read_exact(&mut header[LENGTH_PREFIX..])
        .map_err(|e| BlockzipError::io(e, path))?;
    decode_directory(&header, archive_len).map_err(|e| annotate(e, path))
}

/// Validates the length prefix and returns the directory body length.
///
/// Only the prefix has to be present in `header`; the body length is
/// checked against `archive_len`.
fn directory_len(header: &[u8], archive_len: u64) -> Result<usize> {
    if header.len() < LENGTH_PREFIX {
        return Err(BlockzipError::CorruptArchive(
            "missing directory length".to_string(),
        ));
    }
    let declared = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if declared < 0 {
        return Err(BlockzipError::CorruptArchive(format!(
            "negative directory length {}",
            declared
        )));
    }
    let body_len = declared as usize;
    if body_len % RECORD_SIZE != 0 {
        return Err(BlockzipError::CorruptArchive(format!(
            "directory length {} is not a multiple of {}",
            body_len, RECORD_SIZE
        )));
    }
    if (LENGTH_PREFIX + body_len) as u64 > archive_len {
        return Err(BlockzipError::CorruptArchive(format!(
            "directory declares {} bytes but the archive is {} bytes",
            body_len, archive_len
        )));
    }
    Ok(body_len)
}

fn annotate(err: BlockzipError, path: &Path) -> BlockzipError {
    match err {
        BlockzipError::CorruptArchive(reason) => {
            BlockzipError::CorruptArchive(format!("'{}': {}", path.display(), reason))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn archive_with(directory: &[BlockDescriptor], payload_len: usize) -> Vec<u8> {
        let mut bytes = encode_directory(directory).unwrap();
        bytes.resize(bytes.len() + payload_len, 0xAB);
        bytes
    }

    #[test]
    fn round_trips_a_permuted_directory() {
        let start = reserved_len(4) as i64;
        // Completion order: 2, 0, 3, 1 laid out back to back.
        let directory = vec![
            BlockDescriptor::new(2, start, 10),
            BlockDescriptor::new(0, start + 10, 7),
            BlockDescriptor::new(3, start + 17, 3),
            BlockDescriptor::new(1, start + 20, 12),
        ];
        let archive = archive_with(&directory, 32);

        let decoded = decode_directory(&archive, archive.len() as u64).unwrap();
        let mut expected = directory.clone();
        expected.sort_by_key(|b| b.id);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn empty_directory_is_four_zero_bytes() {
        let bytes = encode_directory(&[]).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(decode_directory(&bytes, 4).unwrap().is_empty());
    }

    #[test]
    fn reserve_then_overwrite_keeps_payload() {
        let mut cursor = Cursor::new(Vec::new());
        let start = reserve(&mut cursor, 2).unwrap();
        assert_eq!(start, 36);
        cursor.write_all(b"bbbbaaa").unwrap();

        let directory = [
            BlockDescriptor::new(1, start as i64, 4),
            BlockDescriptor::new(0, start as i64 + 4, 3),
        ];
        write_directory(&mut cursor, &directory, 2).unwrap();

        let archive = cursor.into_inner();
        assert_eq!(&archive[36..], b"bbbbaaa");
        let decoded = decode_directory(&archive, archive.len() as u64).unwrap();
        assert_eq!(decoded[0], BlockDescriptor::new(0, 40, 3));
        assert_eq!(decoded[1], BlockDescriptor::new(1, 36, 4));
    }

    #[test]
    fn refuses_to_write_a_directory_of_the_wrong_size() {
        let mut cursor = Cursor::new(vec![0u8; 64]);
        let directory = [BlockDescriptor::new(0, 20, 4)];
        assert!(write_directory(&mut cursor, &directory, 2).is_err());
    }

    #[test]
    fn rejects_length_not_multiple_of_record_size() {
        let mut archive = 15i32.to_le_bytes().to_vec();
        archive.resize(64, 0);
        let err = decode_directory(&archive, 64).unwrap_err();
        assert!(matches!(err, BlockzipError::CorruptArchive(_)));
    }

    #[test]
    fn rejects_directory_longer_than_archive() {
        let mut archive = 160i32.to_le_bytes().to_vec();
        archive.resize(40, 0);
        assert!(matches!(
            decode_directory(&archive, 40),
            Err(BlockzipError::CorruptArchive(_))
        ));
    }

    #[test]
    fn rejects_negative_length_prefix() {
        let archive = (-16i32).to_le_bytes();
        assert!(matches!(
            decode_directory(&archive, 4),
            Err(BlockzipError::CorruptArchive(_))
        ));
    }

    #[test]
    fn rejects_records_outside_payload() {
        let start = reserved_len(1) as i64;
        let archive = archive_with(&[BlockDescriptor::new(0, start, 50)], 10);
        assert!(matches!(
            decode_directory(&archive, archive.len() as u64),
            Err(BlockzipError::CorruptArchive(_))
        ));

        let inside_header = archive_with(&[BlockDescriptor::new(0, 2, 4)], 10);
        assert!(decode_directory(&inside_header, inside_header.len() as u64).is_err());
    }

    #[test]
    fn rejects_record_whose_end_overflows() {
        let archive = archive_with(&[BlockDescriptor::new(0, i64::MAX - 1, 10)], 16);
        assert!(matches!(
            decode_directory(&archive, archive.len() as u64),
            Err(BlockzipError::CorruptArchive(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.bz");
        std::fs::write(&path, &archive).unwrap();
        assert!(matches!(
            read_directory(&path),
            Err(BlockzipError::CorruptArchive(_))
        ));
    }

    #[test]
    fn rejects_overlapping_and_duplicate_records() {
        let start = reserved_len(2) as i64;
        let overlapping = archive_with(
            &[
                BlockDescriptor::new(0, start, 8),
                BlockDescriptor::new(1, start + 4, 8),
            ],
            16,
        );
        assert!(decode_directory(&overlapping, overlapping.len() as u64).is_err());

        let duplicate = archive_with(
            &[
                BlockDescriptor::new(0, start, 4),
                BlockDescriptor::new(0, start + 4, 4),
            ],
            8,
        );
        assert!(decode_directory(&duplicate, duplicate.len() as u64).is_err());
    }

    #[test]
    fn reads_directory_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bz");
        let start = reserved_len(1) as i64;
        std::fs::write(&path, archive_with(&[BlockDescriptor::new(0, start, 5)], 5)).unwrap();
        let decoded = read_directory(&path).unwrap();
        assert_eq!(decoded, vec![BlockDescriptor::new(0, start, 5)]);

        std::fs::write(&path, [1u8, 0]).unwrap();
        assert!(matches!(
            read_directory(&path),
            Err(BlockzipError::CorruptArchive(_))
        ));
    }
}
