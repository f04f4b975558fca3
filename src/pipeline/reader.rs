//! The single producer: loads blocks from the source into pending-input.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

use super::handoff::Handoff;
use crate::block::BlockDescriptor;
use crate::error::{BlockzipError, Result};

/// Reads every block in `blocks` (id order) and publishes it.
///
/// For compression the descriptors are the planner's source ranges; for
/// decompression they are the archive directory's payload records. The
/// reader owns its own handle and seeks to each block.
pub fn run_reader(path: &Path, blocks: &[BlockDescriptor], handoff: &Handoff) -> Result<()> {
    let mut file = File::open(path).map_err(|e| BlockzipError::io(e, path))?;

    for block in blocks {
        handoff.acquire_slot()?;
        let bytes = match read_block(&mut file, block) {
            Ok(bytes) => bytes,
            Err(e) => {
                handoff.release_slot();
                return Err(BlockzipError::io(e, path));
            }
        };
        trace!(id = block.id, len = bytes.len(), "block loaded");
        handoff.push_input(block.id, bytes)?;
    }
    Ok(())
}

fn read_block(file: &mut File, block: &BlockDescriptor) -> std::io::Result<Vec<u8>> {
    let offset = u64::try_from(block.offset).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "negative block offset")
    })?;
    let len = usize::try_from(block.length).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "negative block length")
    })?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_each_block_at_its_offset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"aaaaabbbbbcc").unwrap();
        let blocks = crate::block::plan_blocks(12, 5).unwrap();
        let handoff = Handoff::with_cap(blocks.len(), 8, 4);

        run_reader(file.path(), &blocks, &handoff).unwrap();

        assert_eq!(handoff.claim_input().unwrap(), Some((0, b"aaaaa".to_vec())));
        assert_eq!(handoff.claim_input().unwrap(), Some((1, b"bbbbb".to_vec())));
        assert_eq!(handoff.claim_input().unwrap(), Some((2, b"cc".to_vec())));
    }

    #[test]
    fn short_source_is_an_io_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let blocks = [BlockDescriptor::new(0, 0, 10)];
        let handoff = Handoff::with_cap(1, 2, 1);

        let err = run_reader(file.path(), &blocks, &handoff).unwrap_err();
        assert!(matches!(err, BlockzipError::Io { .. }));
        assert_eq!(handoff.resident_counts(), (0, 0));
    }
}
