// JDWP client library
//
// Implements the subset of the JDWP protocol needed to load and drive code
// inside a running JVM:
// - Connection management and event delivery
// - Type, field and method lookup
// - Remote invocation and instantiation
// - Object pinning (collection control)
// - Method entry/exit event requests

pub mod array;
pub mod classtype;
pub mod commands;
pub mod connection;
pub mod eventloop;
pub mod eventrequest;
pub mod events;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod reftype;
pub mod thread;
pub mod types;
pub mod vm;

pub use classtype::InvokeResult;
pub use connection::JdwpConnection;
pub use eventrequest::SuspendPolicy;
pub use events::{Event, EventKind, EventSet};
pub use protocol::{JdwpError, JdwpResult};
pub use types::{ObjectId, ReferenceTypeId, ThreadId, TypeTag, Value, ValueData};
