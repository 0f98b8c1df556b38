use std::io::Read;

use crate::error::NettraceError;

/// Byte/varint primitives over a `Read` source, tracking an absolute byte position.
///
/// Mirrors the ad hoc `ReadExactlyExt` / `helpers::parse_varint_*` free functions the teacher
/// crate scatters across `nettrace/parser.rs` and `helpers.rs`, collected here into one reusable
/// type so every layer above it (container, block, event-header, metadata, payload) shares the
/// same primitives and the same `UnexpectedEnd` behavior on a short read.
pub struct BitStreamReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> BitStreamReader<R> {
    pub fn new(inner: R) -> Self {
        BitStreamReader { inner, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), NettraceError> {
        self.inner
            .read_exact(buf)
            .map_err(|_| NettraceError::UnexpectedEnd {
                position: self.position,
            })?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, NettraceError> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, NettraceError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, NettraceError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, NettraceError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_i16_le(&mut self) -> Result<i16, NettraceError> {
        Ok(self.read_u16_le()? as i16)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, NettraceError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, NettraceError> {
        Ok(self.read_u32_le()? as i32)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, NettraceError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, NettraceError> {
        Ok(self.read_u64_le()? as i64)
    }

    pub fn read_f32_le(&mut self) -> Result<f32, NettraceError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f64_le(&mut self) -> Result<f64, NettraceError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Reads a GUID as 4-byte LE int, 2-byte LE short, 2-byte LE short, 8 raw bytes, and
    /// serializes it back into its canonical 16-byte wire layout.
    pub fn read_guid(&mut self) -> Result<[u8; 16], NettraceError> {
        let data1 = self.read_u32_le()?;
        let data2 = self.read_u16_le()?;
        let data3 = self.read_u16_le()?;
        let mut data4 = [0u8; 8];
        self.fill(&mut data4)?;

        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&data1.to_le_bytes());
        out[4..6].copy_from_slice(&data2.to_le_bytes());
        out[6..8].copy_from_slice(&data3.to_le_bytes());
        out[8..16].copy_from_slice(&data4);
        Ok(out)
    }

    /// Reads 2-byte code units until a ` ` terminator.
    pub fn read_utf16_null_terminated(&mut self) -> Result<String, NettraceError> {
        let mut units = Vec::new();
        loop {
            let unit = self.read_u16_le()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| NettraceError::StructuralViolation {
            position: self.position,
            message: "invalid UTF-16 string".to_string(),
        })
    }

    /// ULEB128, up to 10 bytes (enough for a full 64-bit value).
    pub fn read_var_uint(&mut self) -> Result<u64, NettraceError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        for _ in 0..10 {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(NettraceError::StructuralViolation {
            position: self.position,
            message: "varuint exceeded 10 bytes".to_string(),
        })
    }

    /// Zig-zag decoded signed varint.
    pub fn read_var_int(&mut self) -> Result<i64, NettraceError> {
        let raw = self.read_var_uint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    /// Skips zero-padding so that `position()` becomes a multiple of `n`, measured from the
    /// start of the stream (position 0).
    pub fn align_to(&mut self, n: u64) -> Result<(), NettraceError> {
        let remainder = self.position % n;
        if remainder != 0 {
            self.skip(n - remainder)?;
        }
        Ok(())
    }

    pub fn skip(&mut self, n: u64) -> Result<(), NettraceError> {
        let mut remaining = n;
        let mut scratch = [0u8; 256];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len() as u64) as usize;
            self.fill(&mut scratch[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}
