//! Typed in-memory model of a deployable software assembly.
//!
//! A [`SoftwareAssembly`] names the components to instantiate, the
//! constraints between them (host collocation, uses-device clauses), the
//! connections to establish, and the external surface (ports and
//! properties) promoted to the finished application. Each component
//! placement resolves through the assembly's file table to a
//! [`SoftPkg`], which in turn carries the candidate [`Implementation`]s
//! the deployment planner chooses among.
//!
//! Descriptors are plain JSON documents; the model round-trips through
//! serde without loss.

mod error;
mod ids;
mod properties;
mod sad;
mod source;
mod spd;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use ids::{AllocationId, ConnectionId, DeviceId, GroupId, InstanceId, PropertyId};
pub use properties::{MathOp, Property, PropertyDef, PropertyKind, PropertyValue, SimpleValue};
pub use sad::{
    ComponentPlacement, Connection, ExternalPort, ExternalProperty, HostCollocation,
    Instantiation, PortEndpoint, PortKind, SoftwareAssembly,
};
pub use source::ProfileSource;
pub use spd::{Code, CodeType, Implementation, OsDep, SoftPkg, UsesDevice};

/// Device PRF property id naming the processor architecture.
pub const PROCESSOR_NAME: &str = "processor_name";
/// Device PRF property id naming the operating system.
pub const OS_NAME: &str = "os_name";
/// Device PRF property id naming the operating system version.
pub const OS_VERSION: &str = "os_version";
