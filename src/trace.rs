use std::collections::BTreeMap;
use std::sync::Arc;

use crate::payload::PayloadValue;

/// Index of the sentinel "no stack" trace.
pub const EMPTY_STACK_INDEX: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceDate {
    pub year: i16,
    pub month: i16,
    pub day: i16,
    pub hour: i16,
    pub minute: i16,
    pub second: i16,
    pub millisecond: i16,
}

/// `TraceMetadata`, decoded from the `Trace` container object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceMetadata {
    pub date: TraceDate,
    pub qpc_sync_time: i64,
    pub qpc_frequency: i64,
    pub pointer_size: u32,
    pub process_id: i32,
    pub number_of_processors: i32,
    pub cpu_sampling_rate: i32,
}

/// Bit-exact type codes used by the dynamic payload schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TypeCode {
    Object = 1,
    Boolean32 = 3,
    Utf16CodeUnit = 4,
    SByte = 5,
    Byte = 6,
    Int16 = 7,
    UInt16 = 8,
    Int32 = 9,
    UInt32 = 10,
    Int64 = 11,
    UInt64 = 12,
    Single = 13,
    Double = 14,
    Decimal = 15,
    DateTime = 16,
    Guid = 17,
    NullTerminatedUtf16String = 18,
    Array = 19,
    VarInt = 20,
    VarUInt = 21,
    FixedLengthArray = 22,
    Utf8CodeUnit = 23,
    RelLoc = 24,
    DataLoc = 25,
    Boolean8 = 26,
}

impl TypeCode {
    pub fn from_i32(value: i32) -> Option<TypeCode> {
        use TypeCode::*;
        Some(match value {
            1 => Object,
            3 => Boolean32,
            4 => Utf16CodeUnit,
            5 => SByte,
            6 => Byte,
            7 => Int16,
            8 => UInt16,
            9 => Int32,
            10 => UInt32,
            11 => Int64,
            12 => UInt64,
            13 => Single,
            14 => Double,
            15 => Decimal,
            16 => DateTime,
            17 => Guid,
            18 => NullTerminatedUtf16String,
            19 => Array,
            20 => VarInt,
            21 => VarUInt,
            22 => FixedLengthArray,
            23 => Utf8CodeUnit,
            24 => RelLoc,
            25 => DataLoc,
            26 => Boolean8,
            _ => return None,
        })
    }
}

/// A single field of an `EventMetadata` schema.
#[derive(Debug, Clone)]
pub struct EventFieldDefinition {
    pub name: String,
    pub type_code: TypeCode,
    /// Present iff `type_code == Array` or `FixedLengthArray`.
    pub array_element_type: Option<TypeCode>,
    /// Present iff `type_code == FixedLengthArray`: the element count embedded in the schema
    /// itself, since a fixed-length array carries no count prefix on the wire.
    pub array_length: Option<u32>,
    /// Present iff `type_code == Object` (or the element type of an `Array`/`FixedLengthArray`
    /// of objects).
    pub sub_fields: Option<Vec<EventFieldDefinition>>,
}

/// A schema record: one per (metadata-id) within a trace.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    pub metadata_id: u32,
    pub provider_name: String,
    pub event_id: u32,
    pub event_name: String,
    pub keywords: u64,
    pub version: u32,
    pub level: u32,
    pub opcode: Option<u8>,
    pub fields: Vec<EventFieldDefinition>,
}

impl EventMetadata {
    pub fn provider_event_key(&self) -> (&str, u32) {
        (self.provider_name.as_str(), self.event_id)
    }
}

/// One decoded event. `stack_index` is `EMPTY_STACK_INDEX` (-1) until/unless a stack was
/// captured, and always refers into the `Trace`'s resolved `stacks` vector once the `Trace` is
/// finalized by `TraceAssembler`.
#[derive(Debug, Clone)]
pub struct Event {
    pub index: u64,
    pub sequence_number: u32,
    pub capture_thread_id: u64,
    pub thread_id: u64,
    pub stack_index: i64,
    pub timestamp: i64,
    pub activity_id: [u8; 16],
    pub related_activity_id: [u8; 16],
    pub payload: BTreeMap<String, PayloadValue>,
    /// Order-preserving payload view matching the schema's field order; the `BTreeMap` above
    /// supports by-name lookup, this one preserves definition order for callers that need it.
    pub payload_fields: Vec<(String, PayloadValue)>,
    pub metadata: Arc<EventMetadata>,
}

/// A single resolved stack frame. Used both as a `SymbolTable` entry (an address range) and
/// as a frame within a resolved `StackTrace`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescription {
    pub name: String,
    pub namespace: String,
    pub signature: String,
    pub address: u64,
    pub size: u64,
}

impl MethodDescription {
    pub fn unknown() -> MethodDescription {
        MethodDescription {
            name: "??".to_string(),
            namespace: String::new(),
            signature: String::new(),
            address: 0,
            size: 0,
        }
    }
}

/// A resolved call stack: a dense index plus its ordered frames, outermost-first (the order the
/// raw address vector was captured in).
#[derive(Debug, Clone)]
pub struct StackTrace {
    pub index: i64,
    pub frames: Vec<MethodDescription>,
}

/// The root result of decoding a Nettrace file.
#[derive(Debug)]
pub struct Trace {
    pub metadata: TraceMetadata,
    pub events: Vec<Event>,
    pub event_metadata: Vec<Arc<EventMetadata>>,
    pub stacks: Vec<Arc<StackTrace>>,
}

impl Trace {
    /// Returns the resolved stack for an event, or `None` for the empty-stack sentinel.
    pub fn stack_for(&self, event: &Event) -> Option<&Arc<StackTrace>> {
        if event.stack_index == EMPTY_STACK_INDEX {
            None
        } else {
            self.stacks.get(event.stack_index as usize)
        }
    }
}
