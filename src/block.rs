use std::io::Read;

use crate::error::NettraceError;
use crate::reader::BitStreamReader;

/// Common EventBlock/MetadataBlock header (20 fixed bytes plus any reserved tail).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub header_size: u16,
    pub flags: u16,
    pub min_timestamp: i64,
    pub max_timestamp: i64,
}

impl BlockHeader {
    pub fn compressed_headers(&self) -> bool {
        self.flags & 1 != 0
    }
}

/// Reads the 4-byte size field and aligns the stream to a 4-byte boundary (relative to stream
/// origin) before returning the block's body as its own bounded reader. Because the body is
/// materialized as an exact-length buffer, any caller that tries to read past its declared size
/// fails with `UnexpectedEnd` — enforcing the "consumed bytes must equal N" invariant by
/// construction rather than by an explicit post-hoc check.
pub fn read_block_body<R: Read>(
    reader: &mut BitStreamReader<R>,
) -> Result<(BitStreamReader<std::io::Cursor<Vec<u8>>>, u64), NettraceError> {
    let size = reader.read_u32_le()?;
    reader.align_to(4)?;
    let body_bytes = reader.read_exact_vec(size as usize)?;
    Ok((BitStreamReader::new(std::io::Cursor::new(body_bytes)), size as u64))
}

/// Validates that a block body was consumed exactly, per the "surplus or deficit is a decode
/// failure" rule.
pub fn check_fully_consumed(
    body: &BitStreamReader<std::io::Cursor<Vec<u8>>>,
    declared_size: u64,
) -> Result<(), NettraceError> {
    if body.position() != declared_size {
        return Err(NettraceError::StructuralViolation {
            position: body.position(),
            message: format!(
                "block body declared {declared_size} bytes but {} were consumed",
                body.position()
            ),
        });
    }
    Ok(())
}

/// Parses the fixed 20-byte EventBlock/MetadataBlock header from the front of a block body,
/// skipping any reserved bytes beyond `header_size`.
pub fn read_block_header<R: Read>(
    body: &mut BitStreamReader<R>,
) -> Result<BlockHeader, NettraceError> {
    let header_size = body.read_u16_le()?;
    let flags = body.read_u16_le()?;
    let min_timestamp = body.read_i64_le()?;
    let max_timestamp = body.read_i64_le()?;
    if header_size > 20 {
        body.skip((header_size - 20) as u64)?;
    }
    Ok(BlockHeader {
        header_size,
        flags,
        min_timestamp,
        max_timestamp,
    })
}

/// StackBlock header: first stack-id and stack count.
#[derive(Debug, Clone, Copy)]
pub struct StackBlockHeader {
    pub first_id: u32,
    pub count: u32,
}

pub fn read_stack_block_header<R: Read>(
    body: &mut BitStreamReader<R>,
) -> Result<StackBlockHeader, NettraceError> {
    Ok(StackBlockHeader {
        first_id: body.read_u32_le()?,
        count: body.read_u32_le()?,
    })
}

/// One (thread-id, sequence-number) record from a SequencePointBlock.
#[derive(Debug, Clone, Copy)]
pub struct SequencePointThreadEntry {
    pub thread_id: u64,
    pub sequence_number: u32,
}

#[derive(Debug, Clone)]
pub struct SequencePointBlock {
    pub timestamp: i64,
    pub threads: Vec<SequencePointThreadEntry>,
}

pub fn read_sequence_point_block<R: Read>(
    body: &mut BitStreamReader<R>,
) -> Result<SequencePointBlock, NettraceError> {
    let timestamp = body.read_i64_le()?;
    let thread_count = body.read_u32_le()?;
    let mut threads = Vec::with_capacity(thread_count as usize);
    for _ in 0..thread_count {
        threads.push(SequencePointThreadEntry {
            thread_id: body.read_u64_le()?,
            sequence_number: body.read_u32_le()?,
        });
    }
    Ok(SequencePointBlock { timestamp, threads })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_event_block_header() {
        let mut body_bytes = Vec::new();
        body_bytes.extend(20u16.to_le_bytes()); // header_size
        body_bytes.extend(1u16.to_le_bytes()); // flags: compressed
        body_bytes.extend(100i64.to_le_bytes()); // min_timestamp
        body_bytes.extend(200i64.to_le_bytes()); // max_timestamp
        let mut body = BitStreamReader::new(Cursor::new(body_bytes));
        let header = read_block_header(&mut body).unwrap();
        assert!(header.compressed_headers());
        assert_eq!(header.min_timestamp, 100);
        assert_eq!(header.max_timestamp, 200);
    }

    #[test]
    fn reads_block_body_with_alignment() {
        let mut stream = Vec::new();
        stream.extend(4u32.to_le_bytes()); // size field itself occupies 4 bytes
        stream.extend([0xAA, 0xBB, 0xCC, 0xDD]); // body of length 4, already aligned
        let mut r = BitStreamReader::new(Cursor::new(stream));
        let (mut body, size) = read_block_body(&mut r).unwrap();
        assert_eq!(body.read_exact_vec(4).unwrap(), vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(check_fully_consumed(&body, size).is_ok());
    }

    #[test]
    fn reads_stack_block_header() {
        let mut bytes = Vec::new();
        bytes.extend(5u32.to_le_bytes());
        bytes.extend(3u32.to_le_bytes());
        let mut body = BitStreamReader::new(Cursor::new(bytes));
        let header = read_stack_block_header(&mut body).unwrap();
        assert_eq!(header.first_id, 5);
        assert_eq!(header.count, 3);
    }
}
