use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::catalog;
use crate::error::NettraceError;
use crate::reader::BitStreamReader;
use crate::trace::{EventFieldDefinition, EventMetadata, TypeCode};

/// Catalogs event schemas by metadata-id. Merges schemas read from the file with the
/// built-in catalog keyed by (provider, event-id, version); the built-in catalog wins when both
/// exist, because file-supplied schemas for well-known runtime events are known to be incomplete
/// or missing (see DESIGN.md's Open Question resolution).
#[derive(Default)]
pub struct MetadataRegistry {
    by_id: HashMap<u32, Arc<EventMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        MetadataRegistry::default()
    }

    pub fn get(&self, metadata_id: u32) -> Option<&Arc<EventMetadata>> {
        self.by_id.get(&metadata_id)
    }

    pub fn require(&self, metadata_id: u32) -> Result<&Arc<EventMetadata>, NettraceError> {
        self.get(metadata_id)
            .ok_or(NettraceError::MissingSchema { metadata_id })
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<EventMetadata>> {
        self.by_id.values()
    }

    /// Decodes a from-file schema payload (metadata-id 0's payload) and registers it,
    /// consulting the built-in catalog first.
    pub fn register_from_payload<R: Read>(
        &mut self,
        reader: &mut BitStreamReader<R>,
    ) -> Result<(), NettraceError> {
        let mut def = decode_metadata_definition(reader)?;

        if def.metadata_id == 0 {
            return Err(NettraceError::StructuralViolation {
                position: reader.position(),
                message: "from-file schema declared metadata-id 0".to_string(),
            });
        }

        if let Some(builtin) = catalog::lookup(&def.provider_name, def.event_id, def.version) {
            def.event_name = builtin.event_name.to_string();
            def.opcode = builtin.opcode;
            def.fields = builtin.fields();
        }

        // First registration wins; a metadata-id is bound once and never re-bound.
        self.by_id.entry(def.metadata_id).or_insert_with(|| Arc::new(def));
        Ok(())
    }
}

fn decode_metadata_definition<R: Read>(
    reader: &mut BitStreamReader<R>,
) -> Result<EventMetadata, NettraceError> {
    let metadata_id = reader.read_u32_le()?;
    let provider_name = reader.read_utf16_null_terminated()?;
    let event_id = reader.read_u32_le()?;
    let event_name = reader.read_utf16_null_terminated()?;
    let keywords = reader.read_u64_le()?;
    let version = reader.read_u32_le()?;
    let level = reader.read_u32_le()?;

    let field_count = reader.read_u32_le()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(decode_field_definition(reader)?);
    }

    Ok(EventMetadata {
        metadata_id,
        provider_name,
        event_id,
        event_name,
        keywords,
        version,
        level,
        opcode: None,
        fields,
    })
}

fn decode_field_definition<R: Read>(
    reader: &mut BitStreamReader<R>,
) -> Result<EventFieldDefinition, NettraceError> {
    let tag = reader.read_u32_le()?;
    let sub_fields = if tag == 1 {
        let sub_count = reader.read_u32_le()?;
        let mut subs = Vec::with_capacity(sub_count as usize);
        for _ in 0..sub_count {
            subs.push(decode_field_definition(reader)?);
        }
        Some(subs)
    } else if tag == 0 {
        None
    } else {
        return Err(NettraceError::StructuralViolation {
            position: reader.position(),
            message: format!("unknown field-definition tag {tag}"),
        });
    };

    let raw_type_code = reader.read_i32_le()?;
    let type_code =
        TypeCode::from_i32(raw_type_code).ok_or(NettraceError::SchemaTypeCode { code: raw_type_code })?;

    // Array and FixedLengthArray carry their element type code immediately after the field's
    // own type code; FixedLengthArray additionally carries the element count here, since unlike
    // Array it has no count prefix on the value wire.
    let (array_element_type, array_length) = match type_code {
        TypeCode::Array => {
            let raw_element_code = reader.read_i32_le()?;
            let element_code = TypeCode::from_i32(raw_element_code)
                .ok_or(NettraceError::SchemaTypeCode { code: raw_element_code })?;
            (Some(element_code), None)
        }
        TypeCode::FixedLengthArray => {
            let raw_element_code = reader.read_i32_le()?;
            let element_code = TypeCode::from_i32(raw_element_code)
                .ok_or(NettraceError::SchemaTypeCode { code: raw_element_code })?;
            let length = reader.read_u32_le()?;
            (Some(element_code), Some(length))
        }
        _ => (None, None),
    };

    let name = reader.read_utf16_null_terminated()?;

    Ok(EventFieldDefinition {
        name,
        type_code,
        array_element_type,
        array_length,
        sub_fields,
    })
}
