// JDWP command set and command constants
//
// Command Sets used here:
// 1 = VirtualMachine
// 2 = ReferenceType
// 3 = ClassType
// 4 = ArrayType
// 9 = ObjectReference
// 11 = ThreadReference
// 13 = ArrayReference
// 15 = EventRequest
// 17 = ClassObjectReference
// 64 = Event (target -> debugger)

// Command set IDs
pub mod command_sets {
    pub const VIRTUAL_MACHINE: u8 = 1;
    pub const REFERENCE_TYPE: u8 = 2;
    pub const CLASS_TYPE: u8 = 3;
    pub const ARRAY_TYPE: u8 = 4;
    pub const OBJECT_REFERENCE: u8 = 9;
    pub const THREAD_REFERENCE: u8 = 11;
    pub const ARRAY_REFERENCE: u8 = 13;
    pub const EVENT_REQUEST: u8 = 15;
    pub const CLASS_OBJECT_REFERENCE: u8 = 17;
    pub const EVENT: u8 = 64;
}

// VirtualMachine commands (set 1)
pub mod vm_commands {
    pub const VERSION: u8 = 1;
    pub const CLASSES_BY_SIGNATURE: u8 = 2;
    pub const RESUME: u8 = 9;
    pub const CREATE_STRING: u8 = 11;
    pub const INSTANCE_COUNTS: u8 = 21;
}

// ReferenceType commands (set 2)
pub mod reference_type_commands {
    pub const CLASS_LOADER: u8 = 2;
    pub const FIELDS: u8 = 4;
    pub const METHODS: u8 = 5;
    pub const CLASS_OBJECT: u8 = 11;
    pub const INSTANCES: u8 = 16;
}

// ClassType commands (set 3)
pub mod class_type_commands {
    pub const SUPERCLASS: u8 = 1;
    pub const SET_VALUES: u8 = 2;
    pub const INVOKE_METHOD: u8 = 3;
    pub const NEW_INSTANCE: u8 = 4;
}

// ArrayType commands (set 4)
pub mod array_type_commands {
    pub const NEW_INSTANCE: u8 = 1;
}

// ObjectReference commands (set 9)
pub mod object_reference_commands {
    pub const REFERENCE_TYPE: u8 = 1;
    pub const INVOKE_METHOD: u8 = 6;
    pub const DISABLE_COLLECTION: u8 = 7;
    pub const ENABLE_COLLECTION: u8 = 8;
}

// ThreadReference commands (set 11)
pub mod thread_commands {
    pub const RESUME: u8 = 3;
    pub const STATUS: u8 = 4;
    pub const INTERRUPT: u8 = 11;
}

// ArrayReference commands (set 13)
pub mod array_reference_commands {
    pub const SET_VALUES: u8 = 3;
}

// EventRequest commands (set 15)
pub mod event_commands {
    pub const SET: u8 = 1;
    pub const CLEAR: u8 = 2;
}

// ClassObjectReference commands (set 17)
pub mod class_object_commands {
    pub const REFLECTED_TYPE: u8 = 1;
}

// Event commands (set 64)
pub mod event_set_commands {
    pub const COMPOSITE: u8 = 100;
}

// Event kinds for EventRequest.Set
pub mod event_kinds {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const METHOD_EXIT_WITH_RETURN_VALUE: u8 = 42;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

// Modifier kinds for EventRequest.Set
pub mod modifier_kinds {
    pub const THREAD_ONLY: u8 = 3;
    pub const CLASS_MATCH: u8 = 5;
}

// Options for the InvokeMethod / NewInstance commands
pub mod invoke_options {
    pub const INVOKE_SINGLE_THREADED: i32 = 0x01;
}

