use std::io::Read;

use crate::error::NettraceError;
use crate::reader::BitStreamReader;

/// Per-event record header, decoded either from the compressed or the uncompressed layout.
/// Held across records within one block as the delta-compression "previous header" state.
#[derive(Debug, Clone, Default)]
pub struct EventHeader {
    pub metadata_id: u32,
    pub sequence_number: u32,
    pub capture_thread_id: u64,
    pub processor_number: u32,
    pub thread_id: u64,
    pub stack_id: u32,
    pub timestamp: i64,
    pub activity_id: [u8; 16],
    pub related_activity_id: [u8; 16],
    pub is_sorted: bool,
    pub payload_size: u32,
}

fn is_set(flags: u8, bit: u8) -> bool {
    flags & (1 << bit) != 0
}

/// Decodes one compressed event header, applying delta-encoding against `prev` and returning the
/// new header (the caller is responsible for storing it back as the next `prev`).
pub fn decode_compressed<R: Read>(
    reader: &mut BitStreamReader<R>,
    prev: &EventHeader,
) -> Result<EventHeader, NettraceError> {
    let flags = reader.read_u8()?;

    let metadata_id = if is_set(flags, 0) {
        reader.read_var_uint()? as u32
    } else {
        prev.metadata_id
    };

    let (mut sequence_number, capture_thread_id, processor_number) = if is_set(flags, 1) {
        let delta = reader.read_var_uint()? as u32;
        let seq = prev.sequence_number.wrapping_add(delta);
        let capture_thread_id = reader.read_var_uint()?;
        let processor_number = reader.read_var_uint()? as u32;
        (seq, capture_thread_id, processor_number)
    } else {
        (
            prev.sequence_number,
            prev.capture_thread_id,
            prev.processor_number,
        )
    };

    if metadata_id != 0 {
        sequence_number = sequence_number.wrapping_add(1);
    }

    let thread_id = if is_set(flags, 2) {
        reader.read_var_uint()?
    } else {
        prev.thread_id
    };

    let stack_id = if is_set(flags, 3) {
        reader.read_var_uint()? as u32
    } else {
        prev.stack_id
    };

    let timestamp = if is_set(flags, 4) {
        let delta = reader.read_var_uint()?;
        prev.timestamp.wrapping_add(delta as i64)
    } else {
        prev.timestamp
    };

    let activity_id = if is_set(flags, 5) {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&reader.read_exact_vec(16)?);
        buf
    } else {
        prev.activity_id
    };

    let related_activity_id = if is_set(flags, 6) {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&reader.read_exact_vec(16)?);
        buf
    } else {
        prev.related_activity_id
    };

    let is_sorted = is_set(flags, 7);
    let payload_size = reader.read_var_uint()? as u32;

    Ok(EventHeader {
        metadata_id,
        sequence_number,
        capture_thread_id,
        processor_number,
        thread_id,
        stack_id,
        timestamp,
        activity_id,
        related_activity_id,
        is_sorted,
        payload_size,
    })
}

/// Decodes one legacy fixed-layout event header. Carries no delta state.
pub fn decode_uncompressed<R: Read>(
    reader: &mut BitStreamReader<R>,
) -> Result<EventHeader, NettraceError> {
    let _event_size = reader.read_i32_le()?;
    let metadata_id = reader.read_u32_le()?;
    let sequence_number = reader.read_u32_le()?;
    let thread_id = reader.read_u64_le()?;
    let capture_thread_id = reader.read_u64_le()?;
    let processor_number = reader.read_u32_le()?;
    let stack_id = reader.read_u32_le()?;
    let timestamp = reader.read_i64_le()?;
    let mut activity_id = [0u8; 16];
    activity_id.copy_from_slice(&reader.read_exact_vec(16)?);
    let mut related_activity_id = [0u8; 16];
    related_activity_id.copy_from_slice(&reader.read_exact_vec(16)?);
    let payload_size = reader.read_u32_le()?;

    Ok(EventHeader {
        metadata_id,
        sequence_number,
        capture_thread_id,
        processor_number,
        thread_id,
        stack_id,
        timestamp,
        activity_id,
        related_activity_id,
        is_sorted: false,
        payload_size,
    })
}

/// Number of zero-padding bytes following an uncompressed event's payload so the next record
/// starts on a 4-byte boundary relative to the payload's start.
pub fn uncompressed_payload_padding(payload_size: u32) -> u32 {
    let remainder = payload_size & 3;
    if remainder == 0 {
        0
    } else {
        4 - remainder
    }
}
