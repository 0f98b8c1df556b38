use std::io::Read;

use crate::error::NettraceError;
use crate::reader::BitStreamReader;
use crate::trace::{TraceDate, TraceMetadata};

const MAGIC: &[u8; 8] = b"Nettrace";
const SERIALIZER_IDENT: &str = "!FastSerialization.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NettraceTag {
    NullReference = 1,
    BeginPrivateObject = 5,
    EndObject = 6,
}

impl NettraceTag {
    fn from_u8(value: u8) -> Option<NettraceTag> {
        match value {
            1 => Some(NettraceTag::NullReference),
            5 => Some(NettraceTag::BeginPrivateObject),
            6 => Some(NettraceTag::EndObject),
            _ => None,
        }
    }
}

/// A type descriptor read between a top-level `BeginPrivateObject` and its object body.
#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub type_name: String,
    pub version: i32,
    pub minimum_reader_version: i32,
}

/// Parses the outer self-describing object stream: file header, tagged object boundaries, and
/// object-type descriptors. Leaves object-body decoding to callers (`BlockDecoder` or the
/// `Trace`-metadata leaf parser below).
pub struct ContainerDecoder<R> {
    reader: BitStreamReader<R>,
}

impl<R: Read> ContainerDecoder<R> {
    pub fn new(inner: R) -> Result<Self, NettraceError> {
        let mut reader = BitStreamReader::new(inner);
        let magic = reader.read_exact_vec(8)?;
        if magic.as_slice() != MAGIC {
            return Err(NettraceError::BadMagic { found: magic });
        }

        let ident_len = reader.read_u32_le()?;
        let ident_bytes = reader.read_exact_vec(ident_len as usize)?;
        if ident_bytes != SERIALIZER_IDENT.as_bytes() {
            return Err(NettraceError::BadMagic { found: ident_bytes });
        }

        Ok(ContainerDecoder { reader })
    }

    pub fn reader_mut(&mut self) -> &mut BitStreamReader<R> {
        &mut self.reader
    }

    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    fn read_tag(&mut self) -> Result<NettraceTag, NettraceError> {
        let byte = self.reader.read_u8()?;
        NettraceTag::from_u8(byte).ok_or_else(|| NettraceError::StructuralViolation {
            position: self.reader.position(),
            message: format!("unrecognized tag byte {byte:#04x}"),
        })
    }

    fn read_length_prefixed_utf8(&mut self) -> Result<String, NettraceError> {
        let len = self.reader.read_u32_le()?;
        let bytes = self.reader.read_exact_vec(len as usize)?;
        String::from_utf8(bytes).map_err(|_| NettraceError::StructuralViolation {
            position: self.reader.position(),
            message: "type name is not valid UTF-8".to_string(),
        })
    }

    /// Reads the next top-level tag. Returns `None` at the stream terminator (`NullReference`),
    /// or the object's type descriptor (name, version, minimum-reader-version) after consuming
    /// the nested type-descriptor object and its closing `EndObject`.
    pub fn advance_to_next_object(&mut self) -> Result<Option<ObjectHeader>, NettraceError> {
        let tag = self.read_tag()?;
        if tag == NettraceTag::NullReference {
            return Ok(None);
        }
        if tag != NettraceTag::BeginPrivateObject {
            return Err(NettraceError::StructuralViolation {
                position: self.reader.position(),
                message: "expected BeginPrivateObject at top level".to_string(),
            });
        }

        let descriptor_tag = self.read_tag()?;
        if descriptor_tag != NettraceTag::BeginPrivateObject {
            return Err(NettraceError::StructuralViolation {
                position: self.reader.position(),
                message: "expected BeginPrivateObject for type descriptor".to_string(),
            });
        }

        let null_tag = self.read_tag()?;
        if null_tag != NettraceTag::NullReference {
            return Err(NettraceError::StructuralViolation {
                position: self.reader.position(),
                message: "expected NullReference before type descriptor fields".to_string(),
            });
        }

        let version = self.reader.read_i32_le()?;
        let minimum_reader_version = self.reader.read_i32_le()?;
        let type_name = self.read_length_prefixed_utf8()?;
        self.read_object_end()?;

        Ok(Some(ObjectHeader {
            type_name,
            version,
            minimum_reader_version,
        }))
    }

    /// Consumes the `EndObject` tag closing the current object (either the type descriptor or
    /// the enclosing object, depending on where the caller is in the grammar).
    pub fn read_object_end(&mut self) -> Result<(), NettraceError> {
        let tag = self.read_tag()?;
        if tag != NettraceTag::EndObject {
            return Err(NettraceError::StructuralViolation {
                position: self.reader.position(),
                message: "expected EndObject".to_string(),
            });
        }
        Ok(())
    }

    /// Decodes a `Trace` object's body directly into `TraceMetadata`.
    pub fn decode_trace_metadata(&mut self) -> Result<TraceMetadata, NettraceError> {
        let year = self.reader.read_i16_le()?;
        let month = self.reader.read_i16_le()?;
        let _day_of_week = self.reader.read_i16_le()?;
        let day = self.reader.read_i16_le()?;
        let hour = self.reader.read_i16_le()?;
        let minute = self.reader.read_i16_le()?;
        let second = self.reader.read_i16_le()?;
        let millisecond = self.reader.read_i16_le()?;

        let date = TraceDate {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        };

        let qpc_sync_time = self.reader.read_i64_le()?;
        let qpc_frequency = self.reader.read_i64_le()?;
        let pointer_size = self.reader.read_u32_le()?;
        let process_id = self.reader.read_i32_le()?;
        let number_of_processors = self.reader.read_i32_le()?;
        let cpu_sampling_rate = self.reader.read_i32_le()?;

        Ok(TraceMetadata {
            date,
            qpc_sync_time,
            qpc_frequency,
            pointer_size,
            process_id,
            number_of_processors,
            cpu_sampling_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(MAGIC);
        bytes.extend((SERIALIZER_IDENT.len() as u32).to_le_bytes());
        bytes.extend(SERIALIZER_IDENT.as_bytes());
        bytes
    }

    #[test]
    fn accepts_valid_magic() {
        let bytes = header_bytes();
        assert!(ContainerDecoder::new(Cursor::new(bytes)).is_ok());
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"NotTrace".to_vec();
        assert!(matches!(
            ContainerDecoder::new(Cursor::new(bytes)),
            Err(NettraceError::BadMagic { .. })
        ));
    }

    #[test]
    fn null_reference_ends_stream() {
        let mut bytes = header_bytes();
        bytes.push(NettraceTag::NullReference as u8);
        let mut decoder = ContainerDecoder::new(Cursor::new(bytes)).unwrap();
        assert!(decoder.advance_to_next_object().unwrap().is_none());
    }

    /// The literal S1 test vector: header + `Trace` object body, base64-decoded byte-for-byte.
    #[test]
    fn decodes_literal_trace_metadata_vector() {
        let body = base64_decode(
            "BQUBBAAAAAQAAAAFAAAAVHJhY2UG5wcMAAIAGgARAC8ACgBuAk8T5s1YAwAAgJaYAAAAAAAIAAAAxAoAAAwAAABAQg8ABg==",
        );
        let mut bytes = header_bytes();
        bytes.extend(body);

        let mut decoder = ContainerDecoder::new(Cursor::new(bytes)).unwrap();
        let header = decoder.advance_to_next_object().unwrap().unwrap();
        assert_eq!(header.type_name, "Trace");
        assert_eq!(header.version, 4);
        assert_eq!(header.minimum_reader_version, 4);

        let metadata = decoder.decode_trace_metadata().unwrap();
        decoder.read_object_end().unwrap();

        assert_eq!(metadata.date.year, 2023);
        assert_eq!(metadata.date.month, 12);
        assert_eq!(metadata.date.day, 26);
        assert_eq!(metadata.date.hour, 17);
        assert_eq!(metadata.date.minute, 47);
        assert_eq!(metadata.date.second, 10);
        assert_eq!(metadata.date.millisecond, 622);
        assert_eq!(metadata.qpc_sync_time, 3679946412879);
        assert_eq!(metadata.qpc_frequency, 10_000_000);
        assert_eq!(metadata.pointer_size, 8);
        assert_eq!(metadata.process_id, 2756);
        assert_eq!(metadata.number_of_processors, 12);
        assert_eq!(metadata.cpu_sampling_rate, 1_000_000);
    }

    /// Minimal base64 decoder so the literal test vectors above can live as plain strings
    /// without pulling in a `base64` dependency just for tests.
    fn base64_decode(input: &str) -> Vec<u8> {
        fn value(byte: u8) -> Option<u8> {
            match byte {
                b'A'..=b'Z' => Some(byte - b'A'),
                b'a'..=b'z' => Some(byte - b'a' + 26),
                b'0'..=b'9' => Some(byte - b'0' + 52),
                b'+' => Some(62),
                b'/' => Some(63),
                _ => None,
            }
        }

        let mut out = Vec::new();
        let mut buffer = 0u32;
        let mut bits = 0u32;
        for &byte in input.as_bytes() {
            if byte == b'=' {
                break;
            }
            let Some(v) = value(byte) else { continue };
            buffer = (buffer << 6) | v as u32;
            bits += 6;
            if bits >= 8 {
                bits -= 8;
                out.push((buffer >> bits) as u8);
            }
        }
        out
    }

    #[test]
    fn reads_object_type_descriptor() {
        let mut bytes = header_bytes();
        bytes.push(NettraceTag::BeginPrivateObject as u8);
        bytes.push(NettraceTag::BeginPrivateObject as u8);
        bytes.push(NettraceTag::NullReference as u8);
        bytes.extend(4i32.to_le_bytes()); // version
        bytes.extend(4i32.to_le_bytes()); // minimum_reader_version
        bytes.extend(5u32.to_le_bytes());
        bytes.extend(b"Trace");
        bytes.push(NettraceTag::EndObject as u8); // closes type descriptor
        let mut decoder = ContainerDecoder::new(Cursor::new(bytes)).unwrap();
        let header = decoder.advance_to_next_object().unwrap().unwrap();
        assert_eq!(header.type_name, "Trace");
        assert_eq!(header.version, 4);
    }
}
