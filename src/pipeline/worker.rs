//! Symmetric transform workers.

use tracing::trace;

use super::handoff::Handoff;
use crate::codec::BlockCodec;
use crate::error::{BlockzipError, Result};

/// Which way a run transforms its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Compress,
    Decompress,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Compress => "compress",
            Direction::Decompress => "decompress",
        })
    }
}

/// Claims blocks until every planned block is claimed, returning how many
/// this worker transformed.
pub fn run_worker(
    handoff: &Handoff,
    codec: &dyn BlockCodec,
    direction: Direction,
) -> Result<usize> {
    let mut done = 0;
    while let Some((id, input)) = handoff.claim_input()? {
        let result = match direction {
            Direction::Compress => codec.compress(&input),
            Direction::Decompress => codec.decompress(&input),
        };
        drop(input);
        let output = match result.and_then(|out| fits_record(out, direction)) {
            Ok(output) => output,
            Err(source) => {
                handoff.abandon_in_flight();
                // Peers stop claiming as soon as one block fails.
                handoff.cancel();
                return Err(BlockzipError::Codec {
                    block_id: id,
                    source,
                });
            }
        };
        trace!(id, len = output.len(), "block transformed");
        handoff.push_output(id, output)?;
        done += 1;
    }
    Ok(done)
}

/// A compressed payload must be describable by an i32 directory length.
fn fits_record(output: Vec<u8>, direction: Direction) -> std::io::Result<Vec<u8>> {
    if direction == Direction::Compress && output.len() > i32::MAX as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("compressed block of {} bytes exceeds the record limit", output.len()),
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct Upper;

    impl BlockCodec for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
            Ok(data.to_ascii_uppercase())
        }
        fn decompress(&self, _data: &[u8]) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "broken"))
        }
    }

    fn loaded(blocks: &[&[u8]]) -> Handoff {
        let handoff = Handoff::with_cap(blocks.len(), 8, 4);
        for (id, bytes) in blocks.iter().enumerate() {
            handoff.acquire_slot().unwrap();
            handoff.push_input(id as u32, bytes.to_vec()).unwrap();
        }
        handoff
    }

    #[test]
    fn transforms_until_everything_is_claimed() {
        let handoff = loaded(&[&b"ab"[..], &b"cd"[..]]);
        assert_eq!(run_worker(&handoff, &Upper, Direction::Compress).unwrap(), 2);
        assert_eq!(handoff.completed(), 2);
        assert_eq!(handoff.take_output(1).unwrap(), b"CD");
    }

    #[test]
    fn codec_failure_names_the_block() {
        let handoff = loaded(&[&b"ab"[..]]);
        let err = run_worker(&handoff, &Upper, Direction::Decompress).unwrap_err();
        assert!(matches!(err, BlockzipError::Codec { block_id: 0, .. }));
        assert_eq!(handoff.completed(), 0);
        assert!(handoff.is_cancelled());
    }

    #[test]
    fn peers_stop_claiming_after_a_failure() {
        let handoff = loaded(&[&b"ab"[..], &b"cd"[..], &b"ef"[..]]);
        assert!(run_worker(&handoff, &Upper, Direction::Decompress).is_err());
        // Blocks 1 and 2 are still pending but nobody may take them.
        assert!(handoff.claim_input().unwrap_err().is_cancellation());
    }
}
