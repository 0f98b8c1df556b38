use crate::trace::{EventFieldDefinition, TypeCode};

/// A built-in schema entry, keyed by (provider name, event-id, version) at lookup time.
///
/// Field layouts mirror the CoreCLR runtime's documented event payloads (module/method load and
/// unload, GC triggers and allocation sampling, R2R entry points) and the `TplEventSource`
/// `TaskWaitBegin` schema.
pub struct BuiltinSchema {
    pub provider_name: &'static str,
    pub event_id: u32,
    pub version: u32,
    pub event_name: &'static str,
    pub opcode: Option<u8>,
    field_builder: fn() -> Vec<EventFieldDefinition>,
}

impl BuiltinSchema {
    pub fn fields(&self) -> Vec<EventFieldDefinition> {
        (self.field_builder)()
    }
}

fn field(name: &str, type_code: TypeCode) -> EventFieldDefinition {
    EventFieldDefinition {
        name: name.to_string(),
        type_code,
        array_element_type: None,
        array_length: None,
        sub_fields: None,
    }
}

const DOTNET_RUNTIME: &str = "Microsoft-Windows-DotNETRuntime";
const DOTNET_RUNTIME_RUNDOWN: &str = "Microsoft-Windows-DotNETRuntimeRundown";
const TPL_EVENT_SOURCE: &str = "System.Threading.Tasks.TplEventSource";

fn module_load_unload_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("ModuleID", TypeCode::UInt64),
        field("AssemblyID", TypeCode::UInt64),
        field("ModuleFlags", TypeCode::UInt32),
        field("Reserved1", TypeCode::UInt32),
        field("ModuleILPath", TypeCode::NullTerminatedUtf16String),
        field("ModuleNativePath", TypeCode::NullTerminatedUtf16String),
    ]
}

fn method_load_unload_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("MethodID", TypeCode::UInt64),
        field("ModuleID", TypeCode::UInt64),
        field("MethodStartAddress", TypeCode::UInt64),
        field("MethodSize", TypeCode::UInt32),
        field("MethodToken", TypeCode::UInt32),
        field("MethodFlags", TypeCode::UInt32),
    ]
}

fn method_load_unload_verbose_fields() -> Vec<EventFieldDefinition> {
    let mut fields = method_load_unload_fields();
    fields.push(field("MethodNamespace", TypeCode::NullTerminatedUtf16String));
    fields.push(field("MethodName", TypeCode::NullTerminatedUtf16String));
    fields.push(field("MethodSignature", TypeCode::NullTerminatedUtf16String));
    fields
}

fn ready_to_run_get_entry_point_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("MethodID", TypeCode::UInt64),
        field("ModuleID", TypeCode::UInt64),
        field("MethodStartAddress", TypeCode::UInt64),
        field("MethodSize", TypeCode::UInt32),
        field("MethodToken", TypeCode::UInt32),
        field("MethodFlags", TypeCode::UInt32),
        field("MethodNamespace", TypeCode::NullTerminatedUtf16String),
        field("MethodName", TypeCode::NullTerminatedUtf16String),
        field("MethodSignature", TypeCode::NullTerminatedUtf16String),
    ]
}

fn gc_triggered_fields() -> Vec<EventFieldDefinition> {
    vec![field("Reason", TypeCode::UInt32)]
}

fn gc_allocation_tick_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("AllocationAmount", TypeCode::UInt32),
        field("AllocationKind", TypeCode::UInt32),
        field("ClrInstanceID", TypeCode::UInt16),
        field("AllocationAmount64", TypeCode::UInt64),
        field("TypeID", TypeCode::UInt64),
        field("TypeName", TypeCode::NullTerminatedUtf16String),
        field("HeapIndex", TypeCode::UInt32),
    ]
}

fn gc_sampled_object_allocation_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("Address", TypeCode::UInt64),
        field("TypeID", TypeCode::UInt64),
        field("ObjectCountForTypeSample", TypeCode::UInt32),
        field("TotalSizeForTypeSample", TypeCode::UInt64),
    ]
}

fn task_wait_begin_fields() -> Vec<EventFieldDefinition> {
    vec![
        field("OriginatingTaskSchedulerID", TypeCode::Int32),
        field("OriginatingTaskID", TypeCode::Int32),
        field("TaskID", TypeCode::Int32),
        field("Behavior", TypeCode::Int32),
        field("ContinueWithTaskID", TypeCode::Int32),
    ]
}

/// Opcode 7 = "Send", matching the TPL event source's documented opcode for this event.
const TASK_WAIT_BEGIN_OPCODE_SEND: u8 = 7;

static SCHEMAS: &[BuiltinSchema] = &[
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 151,
        version: 2,
        event_name: "ModuleLoad",
        opcode: None,
        field_builder: module_load_unload_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 152,
        version: 2,
        event_name: "ModuleUnload",
        opcode: None,
        field_builder: module_load_unload_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 153,
        version: 2,
        event_name: "ModuleDCStart",
        opcode: None,
        field_builder: module_load_unload_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 141,
        version: 1,
        event_name: "MethodLoad",
        opcode: None,
        field_builder: method_load_unload_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 142,
        version: 1,
        event_name: "MethodUnload",
        opcode: None,
        field_builder: method_load_unload_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 143,
        version: 1,
        event_name: "MethodLoadVerbose",
        opcode: None,
        field_builder: method_load_unload_verbose_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 144,
        version: 1,
        event_name: "MethodUnloadVerbose",
        opcode: None,
        field_builder: method_load_unload_verbose_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME_RUNDOWN,
        event_id: 144,
        version: 1,
        event_name: "MethodDCEndVerbose",
        opcode: None,
        field_builder: method_load_unload_verbose_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 159,
        version: 1,
        event_name: "R2RGetEntryPoint",
        opcode: None,
        field_builder: ready_to_run_get_entry_point_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 35,
        version: 1,
        event_name: "GCTriggered",
        opcode: None,
        field_builder: gc_triggered_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 10,
        version: 2,
        event_name: "GCAllocationTick",
        opcode: None,
        field_builder: gc_allocation_tick_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 20,
        version: 0,
        event_name: "GCSampledObjectAllocationLow",
        opcode: None,
        field_builder: gc_sampled_object_allocation_fields,
    },
    BuiltinSchema {
        provider_name: DOTNET_RUNTIME,
        event_id: 30,
        version: 0,
        event_name: "GCSampledObjectAllocationHigh",
        opcode: None,
        field_builder: gc_sampled_object_allocation_fields,
    },
    BuiltinSchema {
        provider_name: TPL_EVENT_SOURCE,
        event_id: 10,
        version: 3,
        event_name: "TaskWaitBegin",
        opcode: Some(TASK_WAIT_BEGIN_OPCODE_SEND),
        field_builder: task_wait_begin_fields,
    },
];

/// Looks up a built-in schema by exact (provider, event-id, version) match.
pub fn lookup(provider_name: &str, event_id: u32, version: u32) -> Option<&'static BuiltinSchema> {
    SCHEMAS
        .iter()
        .find(|s| s.provider_name == provider_name && s.event_id == event_id && s.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_task_wait_begin() {
        let schema = lookup(TPL_EVENT_SOURCE, 10, 3).unwrap();
        assert_eq!(schema.event_name, "TaskWaitBegin");
        assert_eq!(schema.opcode, Some(TASK_WAIT_BEGIN_OPCODE_SEND));
        assert_eq!(schema.fields().len(), 5);
    }

    #[test]
    fn unknown_triple_misses() {
        assert!(lookup("Nonexistent.Provider", 1, 1).is_none());
    }

    #[test]
    fn version_mismatch_misses() {
        assert!(lookup(TPL_EVENT_SOURCE, 10, 1).is_none());
    }
}
