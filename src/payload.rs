use std::collections::BTreeMap;
use std::io::Read;

use crate::error::NettraceError;
use crate::reader::BitStreamReader;
use crate::trace::{EventFieldDefinition, TypeCode};

/// A decoded payload field value, tagged over the representable primitive and composite types.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Bool(bool),
    String(String),
    Guid([u8; 16]),
    DateTime {
        year: i16,
        month: i16,
        day_of_week: i16,
        day: i16,
        hour: i16,
        minute: i16,
        second: i16,
        millisecond: i16,
    },
    Decimal([u8; 16]),
    Array(Vec<PayloadValue>),
    Object(BTreeMap<String, PayloadValue>),
    /// `RelLoc`/`DataLoc` fields and any other span we chose not to interpret.
    Opaque(Vec<u8>),
}

/// Schema-driven decoding of field values. One field definition in, one value out; a
/// record is just a sequence of these following the schema's field order.
pub fn decode_field<R: Read>(
    reader: &mut BitStreamReader<R>,
    field: &EventFieldDefinition,
) -> Result<PayloadValue, NettraceError> {
    decode_value(reader, field.type_code, field)
}

fn decode_value<R: Read>(
    reader: &mut BitStreamReader<R>,
    type_code: TypeCode,
    field: &EventFieldDefinition,
) -> Result<PayloadValue, NettraceError> {
    use TypeCode::*;
    Ok(match type_code {
        Boolean32 => PayloadValue::Bool(reader.read_u32_le()? != 0),
        Boolean8 => PayloadValue::Bool(reader.read_u8()? != 0),
        Utf16CodeUnit => PayloadValue::UInt16(reader.read_u16_le()?),
        Utf8CodeUnit => PayloadValue::UInt8(reader.read_u8()?),
        SByte => PayloadValue::Int8(reader.read_i8()?),
        Byte => PayloadValue::UInt8(reader.read_u8()?),
        Int16 => PayloadValue::Int16(reader.read_i16_le()?),
        UInt16 => PayloadValue::UInt16(reader.read_u16_le()?),
        Int32 => PayloadValue::Int32(reader.read_i32_le()?),
        UInt32 => PayloadValue::UInt32(reader.read_u32_le()?),
        Int64 => PayloadValue::Int64(reader.read_i64_le()?),
        UInt64 => PayloadValue::UInt64(reader.read_u64_le()?),
        Single => PayloadValue::Single(reader.read_f32_le()?),
        Double => PayloadValue::Double(reader.read_f64_le()?),
        Decimal => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&reader.read_exact_vec(16)?);
            PayloadValue::Decimal(bytes)
        }
        DateTime => PayloadValue::DateTime {
            year: reader.read_i16_le()?,
            month: reader.read_i16_le()?,
            day_of_week: reader.read_i16_le()?,
            day: reader.read_i16_le()?,
            hour: reader.read_i16_le()?,
            minute: reader.read_i16_le()?,
            second: reader.read_i16_le()?,
            millisecond: reader.read_i16_le()?,
        },
        Guid => PayloadValue::Guid(reader.read_guid()?),
        NullTerminatedUtf16String => PayloadValue::String(reader.read_utf16_null_terminated()?),
        VarInt => PayloadValue::Int64(reader.read_var_int()?),
        VarUInt => PayloadValue::UInt64(reader.read_var_uint()?),
        Object => {
            let sub_fields = field.sub_fields.as_ref().ok_or_else(|| {
                NettraceError::PayloadShape {
                    message: format!("field {:?} is Object but has no sub-fields", field.name),
                }
            })?;
            let mut map = BTreeMap::new();
            for sub in sub_fields {
                map.insert(sub.name.clone(), decode_field(reader, sub)?);
            }
            PayloadValue::Object(map)
        }
        Array => {
            let element_code = field.array_element_type.ok_or_else(|| {
                NettraceError::PayloadShape {
                    message: format!("field {:?} is Array with no element type", field.name),
                }
            })?;
            let count = reader.read_u16_le()? as usize;
            decode_array_elements(reader, element_code, field, count)?
        }
        FixedLengthArray => {
            let element_code = field.array_element_type.ok_or_else(|| {
                NettraceError::PayloadShape {
                    message: format!(
                        "field {:?} is FixedLengthArray with no element type",
                        field.name
                    ),
                }
            })?;
            let count = field.array_length.ok_or_else(|| NettraceError::PayloadShape {
                message: format!("field {:?} is FixedLengthArray with no element count", field.name),
            })?;
            decode_array_elements(reader, element_code, field, count as usize)?
        }
        RelLoc | DataLoc => {
            // Not parsed as values; these represent offsets into the payload for advanced
            // layouts this crate does not interpret. Record as an opaque, zero-length span
            // rather than guessing a width.
            PayloadValue::Opaque(Vec::new())
        }
    })
}

fn decode_array_elements<R: Read>(
    reader: &mut BitStreamReader<R>,
    element_code: TypeCode,
    field: &EventFieldDefinition,
    count: usize,
) -> Result<PayloadValue, NettraceError> {
    let element_field = EventFieldDefinition {
        name: field.name.clone(),
        type_code: element_code,
        array_element_type: None,
        array_length: None,
        sub_fields: field.sub_fields.clone(),
    };
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(decode_value(reader, element_code, &element_field)?);
    }
    Ok(PayloadValue::Array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn field(name: &str, type_code: TypeCode) -> EventFieldDefinition {
        EventFieldDefinition {
            name: name.to_string(),
            type_code,
            array_element_type: None,
            array_length: None,
            sub_fields: None,
        }
    }

    #[test]
    fn decodes_int32_field() {
        let mut r = BitStreamReader::new(Cursor::new(42i32.to_le_bytes().to_vec()));
        let f = field("x", TypeCode::Int32);
        assert_eq!(decode_field(&mut r, &f).unwrap(), PayloadValue::Int32(42));
    }

    #[test]
    fn decodes_array_of_int32() {
        let mut bytes = 3u16.to_le_bytes().to_vec();
        bytes.extend(1i32.to_le_bytes());
        bytes.extend(2i32.to_le_bytes());
        bytes.extend(3i32.to_le_bytes());
        let mut r = BitStreamReader::new(Cursor::new(bytes));
        let f = EventFieldDefinition {
            name: "arr".to_string(),
            type_code: TypeCode::Array,
            array_element_type: Some(TypeCode::Int32),
            array_length: None,
            sub_fields: None,
        };
        let value = decode_field(&mut r, &f).unwrap();
        assert_eq!(
            value,
            PayloadValue::Array(vec![
                PayloadValue::Int32(1),
                PayloadValue::Int32(2),
                PayloadValue::Int32(3)
            ])
        );
    }

    #[test]
    fn decodes_fixed_length_array_of_int32() {
        let mut bytes = Vec::new();
        bytes.extend(10i32.to_le_bytes());
        bytes.extend(20i32.to_le_bytes());
        let mut r = BitStreamReader::new(Cursor::new(bytes));
        let f = EventFieldDefinition {
            name: "fixed".to_string(),
            type_code: TypeCode::FixedLengthArray,
            array_element_type: Some(TypeCode::Int32),
            array_length: Some(2),
            sub_fields: None,
        };
        let value = decode_field(&mut r, &f).unwrap();
        assert_eq!(
            value,
            PayloadValue::Array(vec![PayloadValue::Int32(10), PayloadValue::Int32(20)])
        );
    }

    #[test]
    fn fixed_length_array_without_known_count_is_a_payload_shape_error() {
        let mut r = BitStreamReader::new(Cursor::new(Vec::new()));
        let f = EventFieldDefinition {
            name: "fixed".to_string(),
            type_code: TypeCode::FixedLengthArray,
            array_element_type: Some(TypeCode::Int32),
            array_length: None,
            sub_fields: None,
        };
        assert!(matches!(
            decode_field(&mut r, &f),
            Err(NettraceError::PayloadShape { .. })
        ));
    }

    #[test]
    fn decodes_null_terminated_string() {
        let mut bytes = Vec::new();
        for c in "hi".encode_utf16() {
            bytes.extend(c.to_le_bytes());
        }
        bytes.extend(0u16.to_le_bytes());
        let mut r = BitStreamReader::new(Cursor::new(bytes));
        let f = field("s", TypeCode::NullTerminatedUtf16String);
        assert_eq!(
            decode_field(&mut r, &f).unwrap(),
            PayloadValue::String("hi".to_string())
        );
    }
}
