//! Interfaces to the services an application factory deploys against: the
//! allocation manager, registered devices, the naming service, the
//! application servant, connection resolution, and the domain manager
//! that ties them together.
//!
//! Everything here is a seam. Production deployments back these traits
//! with the real distributed services; [`memory`] provides a complete
//! in-process bench used by the factory test suites.

mod alloc;
mod application;
mod device;
mod domain;
mod naming;

pub mod memory;

use std::{fmt, sync::Arc};

use sideband_assembly::{DeviceId, InstanceId, Property};

pub use alloc::{AllocationManager, UsesRequest, UsesResponse};
pub use application::{
    Application, ApplicationSpec, ConfigureError, InitializeError, RegisteredComponent, Resource,
};
pub use device::{Device, DeviceError};
pub use domain::{ConnectionError, ConnectionNode, ConnectionResolver, Domain, RegistryError};
pub use naming::{NamingContext, NamingError};

/// Process id returned by a device `execute` call.
pub type Pid = i64;

/// An opaque object reference, as exchanged with the naming service,
/// registrars, and port tables. The factory never looks inside one.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjRef(Arc<str>);

impl ObjRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjRef {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for ObjRef {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({})", self.0)
    }
}

/// Current load condition of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageState {
    Idle,
    Active,
    Busy,
}

/// A registered device: stable identity, its current property snapshot,
/// and the live handle used for load/execute traffic.
#[derive(Clone)]
pub struct DeviceNode {
    pub identifier: DeviceId,
    pub label: String,
    pub is_executable: bool,
    pub prf: Vec<Property>,
    pub device: Arc<dyn Device>,
}

impl fmt::Debug for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceNode")
            .field("identifier", &self.identifier)
            .field("label", &self.label)
            .field("is_executable", &self.is_executable)
            .finish_non_exhaustive()
    }
}

/// A (component, device) pairing produced by the placement planner.
#[derive(Clone, Debug)]
pub struct DeviceAssignment {
    pub component: InstanceId,
    pub device_id: DeviceId,
    pub device: Arc<DeviceNode>,
}
