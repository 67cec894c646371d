use miette::Diagnostic;
use sideband_assembly::{ConnectionId, DeviceId, GroupId, InstanceId, Property};
use sideband_platform::{InitializeError, NamingError, RegistryError};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Assembly(#[from] sideband_assembly::Error),

    #[error("failed to bind waveform context `{name}`")]
    #[diagnostic(code(factory::name_binding_failed))]
    NameBindingFailed {
        name: String,
        #[source]
        source: NamingError,
    },

    #[error("domain has no executable devices to run components")]
    #[diagnostic(code(factory::no_executable_devices))]
    NoExecutableDevices,

    #[error("all executable devices in the domain are busy")]
    #[diagnostic(code(factory::all_executable_devices_busy))]
    AllExecutableDevicesBusy,

    #[error("failed to satisfy usesdevice dependencies {failed:?} for `{owner}`")]
    #[diagnostic(code(factory::uses_device_unsatisfied))]
    UsesDeviceUnsatisfied { owner: String, failed: Vec<String> },

    #[error("unknown component `{component}` in device assignment")]
    #[diagnostic(code(factory::bad_component_assignment))]
    BadComponentAssignment { component: InstanceId },

    #[error("unknown device `{device}` assigned to component `{component}`")]
    #[diagnostic(code(factory::bad_device_assignment))]
    BadDeviceAssignment {
        component: InstanceId,
        device: DeviceId,
    },

    #[error("could not collocate components for group `{group}`")]
    #[diagnostic(code(factory::collocation_unsatisfiable))]
    CollocationUnsatisfiable { group: GroupId },

    #[error("failed to satisfy device dependencies for component `{component}`")]
    #[diagnostic(code(factory::no_device_satisfies_dependencies))]
    NoDeviceSatisfiesDependencies { component: InstanceId },

    #[error("load of `{file}` failed for component `{component}`: {reason}")]
    #[diagnostic(code(factory::load_failed))]
    LoadFailed {
        component: InstanceId,
        file: String,
        reason: String,
    },

    #[error("execute failed for component `{component}`: {reason}")]
    #[diagnostic(code(factory::execute_failed))]
    ExecuteFailed {
        component: InstanceId,
        reason: String,
    },

    #[error("timed out waiting for component `{component}` to register")]
    #[diagnostic(code(factory::component_registration_timeout))]
    ComponentRegistrationTimeout { component: InstanceId },

    #[error("component `{component}` was placed but is missing from the registration table")]
    #[diagnostic(code(factory::component_lookup_failed))]
    ComponentLookupFailed { component: InstanceId },

    #[error("failed to initialize component `{component}`")]
    #[diagnostic(code(factory::initialize_failed))]
    InitializeFailed {
        component: InstanceId,
        #[source]
        source: InitializeError,
    },

    #[error("assembly controller is not available or not SCA compliant")]
    #[diagnostic(code(factory::assembly_controller_unavailable))]
    AssemblyControllerUnavailable,

    #[error("unable to make connection `{connection}`: {message}")]
    #[diagnostic(code(factory::connection_failed))]
    ConnectionFailed {
        connection: ConnectionId,
        message: String,
    },

    #[error("invalid initial configuration: {invalid:?}")]
    #[diagnostic(code(factory::invalid_init_configuration))]
    InvalidInitConfiguration { invalid: Vec<Property> },

    #[error("invalid __MATH__ statement `{expression}`: {message}")]
    #[diagnostic(code(factory::invalid_math_expression))]
    MalformedMathExpression { expression: String, message: String },

    #[error("property `{property}` referenced in __MATH__ statement is not a configure property")]
    #[diagnostic(code(factory::unknown_math_property))]
    UnknownMathProperty { property: String },

    #[error("external port `{name}` cannot be wired: {message}")]
    #[diagnostic(code(factory::external_port_invalid))]
    ExternalPortInvalid { name: String, message: String },

    #[error("external property `{id}` cannot be promoted: {message}")]
    #[diagnostic(code(factory::external_property_invalid))]
    ExternalPropertyInvalid { id: String, message: String },

    #[error("component `{component}` was never placed on a device")]
    #[diagnostic(code(factory::component_not_placed))]
    ComponentNotPlaced { component: InstanceId },

    #[error(transparent)]
    #[diagnostic(code(factory::application_rejected))]
    ApplicationRejected(#[from] RegistryError),
}
