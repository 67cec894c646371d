use std::{sync::Arc, time::Duration};

use miette::Diagnostic;
use sideband_assembly::{Connection, ConnectionId, DeviceId, ProfileSource};
use thiserror::Error;

use crate::{
    AllocationManager, Application, ApplicationSpec, DeviceNode, NamingContext, ObjRef,
};

#[derive(Debug, Error, Diagnostic)]
#[error("application registration rejected: {message}")]
#[diagnostic(code(platform::application_rejected))]
pub struct RegistryError {
    pub message: String,
}

#[derive(Debug, Error, Diagnostic)]
#[error("connection `{id}` failed to resolve: {message}")]
#[diagnostic(code(platform::connection_failed))]
pub struct ConnectionError {
    pub id: ConnectionId,
    pub message: String,
}

/// An established connection, as recorded on the application.
#[derive(Clone, Debug)]
pub struct ConnectionNode {
    pub id: ConnectionId,
    pub uses: ObjRef,
    pub provides: ObjRef,
}

/// Resolves declared connections against the waveform's naming context.
pub trait ConnectionResolver: Send + Sync {
    fn resolve(
        &self,
        connection: &Connection,
        base_context: &str,
    ) -> Result<ConnectionNode, ConnectionError>;
}

/// The factory's view of the domain manager and the services it brokers.
pub trait Domain: Send + Sync {
    fn domain_name(&self) -> String;

    /// Snapshot of the currently registered devices.
    fn registered_devices(&self) -> Vec<Arc<DeviceNode>>;

    /// Warm-start hint: the device last used for a deployment.
    fn last_device_used(&self) -> Option<DeviceId>;

    fn set_last_device_used(&self, device: DeviceId);

    fn component_binding_timeout(&self) -> Duration;

    /// Domain-wide logging configuration handed to launched components.
    fn logging_config_uri(&self) -> Option<String>;

    /// Reference to the domain file system, appended to `sca:` logging
    /// URIs so children can resolve them.
    fn file_system_ref(&self) -> ObjRef;

    fn profile_source(&self) -> Arc<dyn ProfileSource>;

    fn allocation_manager(&self) -> Arc<dyn AllocationManager>;

    /// The domain naming context waveform contexts are bound under.
    fn naming_context(&self) -> Arc<dyn NamingContext>;

    fn connection_resolver(&self) -> Arc<dyn ConnectionResolver>;

    /// Creates (and activates) a new application servant bound to the
    /// given waveform context.
    fn new_application(
        &self,
        spec: ApplicationSpec,
        context: Arc<dyn NamingContext>,
    ) -> Arc<dyn Application>;

    fn add_application(&self, application: Arc<dyn Application>) -> Result<(), RegistryError>;

    fn publish_application_added(&self, identifier: &str, name: &str);
}
