use std::{collections::BTreeSet, sync::Arc, time::Duration};

use miette::Diagnostic;
use sideband_assembly::{AllocationId, Property};
use thiserror::Error;

use crate::{ConnectionNode, DeviceAssignment, DeviceNode, ObjRef, Pid};

/// Component-side initialization failure; messages come from the
/// component itself.
#[derive(Debug, Error, Diagnostic)]
#[error("initialize failed: {messages:?}")]
#[diagnostic(code(platform::initialize_failed))]
pub struct InitializeError {
    pub messages: Vec<String>,
}

/// Component-side configure failure. Partial configuration is reported
/// separately but treated identically by callers.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ConfigureError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(platform::invalid_configuration))]
    InvalidConfiguration {
        message: String,
        invalid_properties: Vec<Property>,
    },

    #[error("partial configuration")]
    #[diagnostic(code(platform::partial_configuration))]
    PartialConfiguration { invalid_properties: Vec<Property> },
}

impl ConfigureError {
    pub fn invalid_properties(&self) -> &[Property] {
        match self {
            ConfigureError::InvalidConfiguration {
                invalid_properties, ..
            }
            | ConfigureError::PartialConfiguration { invalid_properties } => invalid_properties,
        }
    }
}

/// The control surface a deployed component registers back with.
pub trait Resource: Send + Sync {
    fn identifier(&self) -> String;

    fn object_ref(&self) -> ObjRef;

    fn initialize(&self) -> Result<(), InitializeError>;

    fn configure(&self, properties: &[Property]) -> Result<(), ConfigureError>;

    fn get_port(&self, name: &str) -> Option<ObjRef>;

    fn supports_interface(&self, repo_id: &str) -> bool;
}

/// A component that has registered with the application.
#[derive(Clone)]
pub struct RegisteredComponent {
    pub identifier: String,
    pub resource: Arc<dyn Resource>,
}

/// Construction arguments for a new application servant.
#[derive(Clone, Debug)]
pub struct ApplicationSpec {
    pub identifier: String,
    pub name: String,
    pub profile_path: String,
    pub waveform_context_name: String,
    pub trusted: bool,
}

/// The servant that tracks one instantiated waveform.
///
/// The factory feeds it per-component bookkeeping while deploying, waits
/// on it for component registration, and hands it the final ownership of
/// devices, connections, and allocations on commit. The teardown
/// operations (`release_components` through `cleanup_activations`) are
/// what failure unwind drives.
pub trait Application: Send + Sync + std::fmt::Debug {
    fn identifier(&self) -> String;

    fn add_component(&self, component_id: &str, spd_path: &str);

    fn set_component_implementation(&self, component_id: &str, implementation_id: &str);

    fn set_component_naming_context(&self, component_id: &str, lookup_name: &str);

    fn set_component_device(&self, component_id: &str, device: &Arc<DeviceNode>);

    fn set_component_pid(&self, component_id: &str, pid: Pid);

    fn add_component_loaded_file(&self, component_id: &str, path: &str);

    fn add_external_port(&self, name: &str, port: ObjRef);

    fn add_external_property(&self, property_id: &str, external_id: &str, component_id: &str);

    /// The registrar reference handed to launched components via
    /// `NAMING_CONTEXT_IOR`.
    fn app_registrar(&self) -> ObjRef;

    fn registered_components(&self) -> Vec<RegisteredComponent>;

    /// Blocks until every expected component has registered, or the
    /// timeout elapses. Returns `false` on timeout.
    fn wait_for_components(&self, expected: &BTreeSet<String>, timeout: Duration) -> bool;

    /// Final hand-off on successful creation.
    fn populate(
        &self,
        assembly_controller: Option<Arc<dyn Resource>>,
        devices: Vec<DeviceAssignment>,
        start_seq: Vec<Arc<dyn Resource>>,
        connections: Vec<ConnectionNode>,
        allocation_ids: Vec<AllocationId>,
    );

    fn release_components(&self);

    fn terminate_components(&self);

    fn unload_components(&self);

    fn cleanup_activations(&self);
}
