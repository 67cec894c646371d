//! The deployment pipeline: one instance per `create` call.
//!
//! A linear state machine over the placed assembly: snapshot devices,
//! apply overrides, satisfy uses-device clauses, place components
//! (user assignments, then collocation groups, then the rest), create
//! the application servant, load and execute, wait for registration,
//! initialize, connect, configure, wire the external surface, commit.
//! [`CreateContext::unwind`] reverses every effect of a failed attempt
//! in strict reverse order, logging and swallowing the errors it meets.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use sideband_assembly::{
    CodeType, DeviceId, InstanceId, PortKind, Property, SimpleValue, SoftPkg, SoftwareAssembly,
};
use sideband_platform::{
    AllocationManager, Application, ApplicationSpec, ConnectionNode, DeviceAssignment, DeviceNode,
    Domain, NamingContext, Resource,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    component::ComponentInfo,
    error::Error,
    ledger::ScopedLedger,
    planner::{allocate_uses_devices, rotate_device_list},
    reserved,
};

pub(crate) struct CreateContext {
    pub(crate) domain: Arc<dyn Domain>,
    pub(crate) allocator: Arc<dyn AllocationManager>,
    pub(crate) assembly: Arc<SoftwareAssembly>,
    pub(crate) profiles: Arc<BTreeMap<String, SoftPkg>>,
    pub(crate) profile_path: String,
    pub(crate) waveform_name: String,
    pub(crate) base_context_path: String,
    pub(crate) waveform_context: Arc<dyn NamingContext>,
    pub(crate) registered_devices: Vec<Arc<DeviceNode>>,
    pub(crate) executable_devices: Vec<Arc<DeviceNode>>,
    pub(crate) components: Vec<ComponentInfo>,
    pub(crate) start_order_ids: Vec<InstanceId>,
    pub(crate) ledger: ScopedLedger,
    pub(crate) app_assigned: Vec<DeviceAssignment>,
    pub(crate) softpkg_loaded: Vec<(Arc<DeviceNode>, String)>,
    pub(crate) application: Option<Arc<dyn Application>>,
}

impl CreateContext {
    pub(crate) fn new(
        domain: Arc<dyn Domain>,
        assembly: Arc<SoftwareAssembly>,
        profiles: Arc<BTreeMap<String, SoftPkg>>,
        profile_path: String,
        waveform_name: String,
        waveform_context: Arc<dyn NamingContext>,
    ) -> Self {
        let allocator = domain.allocation_manager();
        let base_context_path = format!("{}/{waveform_name}", domain.domain_name());
        Self {
            domain,
            allocator: Arc::clone(&allocator),
            assembly,
            profiles,
            profile_path,
            waveform_name,
            base_context_path,
            waveform_context,
            registered_devices: Vec::new(),
            executable_devices: Vec::new(),
            components: Vec::new(),
            start_order_ids: Vec::new(),
            ledger: ScopedLedger::new(allocator),
            app_assigned: Vec::new(),
            softpkg_loaded: Vec::new(),
            application: None,
        }
    }

    pub(crate) fn run(
        &mut self,
        name: &str,
        init_config: &[Property],
        assignments: &[(InstanceId, DeviceId)],
    ) -> Result<Arc<dyn Application>, Error> {
        self.snapshot_devices()?;

        let (trusted, init_config) = extract_trusted(init_config);

        self.build_components()?;
        if let Some(index) = self.assembly_controller_index() {
            self.override_component_properties(index, &init_config);
        }
        self.override_external_properties(&init_config);

        self.satisfy_assembly_uses_devices(name)?;

        self.assign_from_user(assignments)?;
        for group in self.assembly.collocations.clone() {
            self.place_collocation(&group)?;
        }
        self.assign_remaining()?;

        let identifier = format!("{}:{}", self.assembly.id, self.waveform_name);
        let application = self.domain.new_application(
            ApplicationSpec {
                identifier: identifier.clone(),
                name: name.to_string(),
                profile_path: self.profile_path.clone(),
                waveform_context_name: self.waveform_name.clone(),
                trusted,
            },
            Arc::clone(&self.waveform_context),
        );
        self.application = Some(Arc::clone(&application));

        self.load_and_execute(&application)?;
        self.await_registration(&application)?;
        let start_seq = self.initialize_components(&application)?;
        let connections = self.connect()?;
        self.configure_components()?;
        self.wire_external_ports(&application)?;
        self.wire_external_properties(&application)?;

        // Commit: the application takes ownership of every side effect.
        let allocation_ids = self.ledger.take_all();
        let assembly_controller = self
            .assembly_controller_index()
            .and_then(|index| self.components[index].resource.clone());
        application.populate(
            assembly_controller,
            self.app_assigned.clone(),
            start_seq,
            connections,
            allocation_ids,
        );
        self.domain.add_application(Arc::clone(&application))?;
        if let Some(front) = self.executable_devices.first() {
            self.domain.set_last_device_used(front.identifier.clone());
        }
        self.domain.publish_application_added(&identifier, name);

        info!(application = %identifier, "done creating application");
        Ok(application)
    }

    fn snapshot_devices(&mut self) -> Result<(), Error> {
        self.registered_devices = self.domain.registered_devices();
        self.executable_devices = self
            .registered_devices
            .iter()
            .filter(|node| node.is_executable)
            .cloned()
            .collect();
        if self.executable_devices.is_empty() {
            warn!("domain has no executable devices to run components");
            return Err(Error::NoExecutableDevices);
        }
        if let Some(last) = self.domain.last_device_used() {
            trace!(device = %last, "placing last used device first in the deployment list");
            rotate_device_list(&mut self.executable_devices, &last);
        }
        Ok(())
    }

    fn build_components(&mut self) -> Result<(), Error> {
        let controller = self.assembly.assembly_controller.clone();
        let mut start_orders: BTreeMap<i64, Vec<InstanceId>> = BTreeMap::new();

        for placement in &self.assembly.placements {
            let Some(instantiation) = placement.first_instantiation() else {
                return Err(sideband_assembly::Error::EmptyPlacement {
                    file_ref: placement.file_ref.clone(),
                }
                .into());
            };
            let Some(spd_path) = self.assembly.spd_path(&placement.file_ref) else {
                return Err(sideband_assembly::Error::UnknownFileRef {
                    file_ref: placement.file_ref.clone(),
                }
                .into());
            };
            let Some(profile) = self.profiles.get(&placement.file_ref) else {
                return Err(sideband_assembly::Error::UnknownFileRef {
                    file_ref: placement.file_ref.clone(),
                }
                .into());
            };

            // Bin declared start orders; the assembly controller never
            // participates in the start sequence.
            if controller.as_ref() != Some(&instantiation.id)
                && let Some(order) = &instantiation.start_order
                && let Ok(order) = order.parse::<i64>()
            {
                start_orders
                    .entry(order)
                    .or_default()
                    .push(instantiation.id.clone());
            }

            let mut info = ComponentInfo::new(
                instantiation,
                profile.clone(),
                spd_path.to_string(),
                &self.waveform_name,
            );
            info.is_assembly_controller = controller.as_ref() == Some(&instantiation.id);
            self.components.push(info);
        }

        self.start_order_ids = start_orders.into_values().flatten().collect();
        Ok(())
    }

    /// Applies the reduced init-configuration to one component (the
    /// assembly controller). `LOGGING_CONFIG_URI` is special: it becomes
    /// an exec parameter unless the component already carries one.
    fn override_component_properties(&mut self, index: usize, init_config: &[Property]) {
        for property in init_config {
            if property.id == reserved::LOGGING_CONFIG_URI {
                let component = &mut self.components[index];
                if !component.has_exec_param(reserved::LOGGING_CONFIG_URI) {
                    trace!(value = ?property.value, "adding LOGGING_CONFIG_URI exec parameter");
                    component.add_exec_param(property.clone());
                }
            } else {
                trace!(property = %property.id, "overriding assembly controller property");
                self.components[index]
                    .override_property(property.id.as_str(), property.value.clone());
            }
        }
    }

    /// Routes init-configuration entries that name promoted external
    /// properties to their target components.
    fn override_external_properties(&mut self, init_config: &[Property]) {
        let externals = self.assembly.external_properties.clone();
        for property in init_config {
            for external in &externals {
                if *external.effective_id() != property.id {
                    continue;
                }
                let Some(index) = self.component_index(&external.component) else {
                    continue;
                };
                if self.components[index].is_assembly_controller {
                    continue;
                }
                let internal = external.property.as_str().to_string();
                self.components[index].override_property(&internal, property.value.clone());
            }
        }
    }

    fn satisfy_assembly_uses_devices(&mut self, name: &str) -> Result<(), Error> {
        let clauses = self.assembly.uses_devices.clone();
        debug!(count = clauses.len(), "application usesdevice dependencies");
        let configure = self
            .assembly_controller_index()
            .map(|index| self.components[index].configure_properties.clone())
            .unwrap_or_default();
        let owner = InstanceId::from(self.assembly.id.as_str());
        let mut uses = allocate_uses_devices(&self.allocator, &owner, &clauses, &configure)?;
        if !uses.is_satisfied() {
            return Err(Error::UsesDeviceUnsatisfied {
                owner: name.to_string(),
                failed: uses.unsatisfied,
            });
        }
        // Assembly-scope usesdevice assignments are never recorded on
        // the application; only the allocations are kept.
        uses.ledger.transfer(&mut self.ledger);
        Ok(())
    }

    fn assembly_controller_index(&self) -> Option<usize> {
        self.components
            .iter()
            .position(|component| component.is_assembly_controller)
    }

    fn load_and_execute(&mut self, application: &Arc<dyn Application>) -> Result<(), Error> {
        debug!(components = self.components.len(), "loading and executing components");
        let source = self.domain.profile_source();
        let registrar = application.app_registrar();
        let logging_uri = self.domain.logging_config_uri();
        let file_system = self.domain.file_system_ref();

        for index in 0..self.components.len() {
            let (identifier, instance_id, spd_path, binding_name, softpkg_loads, implementation, node) = {
                let component = &self.components[index];
                let Some(node) = component.assigned_device.clone() else {
                    return Err(Error::ComponentNotPlaced {
                        component: component.instance_id.clone(),
                    });
                };
                let Some(implementation) = component.selected_implementation().cloned() else {
                    return Err(Error::ComponentNotPlaced {
                        component: component.instance_id.clone(),
                    });
                };
                (
                    component.identifier.clone(),
                    component.instance_id.clone(),
                    component.spd_path.clone(),
                    component.naming_service_name.clone(),
                    component.softpkg_loads.clone(),
                    implementation,
                    node,
                )
            };

            trace!(component = %identifier, device = %node.identifier, "deploying component");
            application.add_component(&identifier, &spd_path);
            application.set_component_implementation(&identifier, &implementation.id);
            if let Some(binding) = &binding_name {
                let lookup = format!("{}/{binding}", self.base_context_path);
                application.set_component_naming_context(&identifier, &lookup);
            }
            application.set_component_device(&identifier, &node);

            // Soft package dependency files load before the component's
            // own code file; the pipeline tracks them for unwind.
            for load in &softpkg_loads {
                trace!(file = %load.local_file, "loading soft package dependency");
                node.device
                    .load(source.as_ref(), &load.local_file, load.code_type)
                    .map_err(|cause| Error::LoadFailed {
                        component: instance_id.clone(),
                        file: load.local_file.clone(),
                        reason: cause.to_string(),
                    })?;
                self.softpkg_loaded
                    .push((Arc::clone(&node), load.local_file.clone()));
            }

            let local_file = implementation.code.local_file.clone();
            if local_file.is_empty() {
                return Err(Error::LoadFailed {
                    component: instance_id,
                    file: local_file,
                    reason: "code local file is empty".to_string(),
                });
            }
            trace!(file = %local_file, device = %node.label, "loading");
            node.device
                .load(source.as_ref(), &local_file, implementation.code.code_type)
                .map_err(|cause| Error::LoadFailed {
                    component: instance_id.clone(),
                    file: local_file.clone(),
                    reason: cause.to_string(),
                })?;
            application.add_component_loaded_file(&identifier, &local_file);

            // Only code with a non-empty entry point is executed;
            // drivers, kernel modules, and entry-point-less artifacts
            // are load-only.
            let entry = implementation.code.entry_point.clone().unwrap_or_default();
            let executes = match implementation.code.code_type {
                CodeType::Executable | CodeType::SharedLibrary => !entry.is_empty(),
                CodeType::Driver | CodeType::KernelModule => false,
            };
            if !executes {
                continue;
            }

            {
                let component = &mut self.components[index];
                component.set_exec_param(Property::simple(
                    reserved::NAMING_CONTEXT_IOR,
                    SimpleValue::Str(registrar.to_string()),
                ));
                component.set_exec_param(Property::simple(
                    reserved::COMPONENT_IDENTIFIER,
                    SimpleValue::Str(identifier.clone()),
                ));
                component.set_exec_param(Property::simple(
                    reserved::NAME_BINDING,
                    SimpleValue::Str(binding_name.clone().unwrap_or_default()),
                ));
                component.set_exec_param(Property::simple(
                    reserved::DOM_PATH,
                    SimpleValue::Str(self.base_context_path.clone()),
                ));
                component.set_exec_param(Property::simple(
                    reserved::PROFILE_NAME,
                    SimpleValue::Str(spd_path.clone()),
                ));

                if !component.has_exec_param(reserved::LOGGING_CONFIG_URI)
                    && let Some(uri) = &logging_uri
                {
                    component.add_exec_param(Property::simple(
                        reserved::LOGGING_CONFIG_URI,
                        SimpleValue::Str(uri.clone()),
                    ));
                }
                // `sca:` URIs need the domain file system appended so the
                // launched component can resolve them.
                let needs_file_system = component
                    .exec_param(reserved::LOGGING_CONFIG_URI)
                    .and_then(|param| param.value.as_simple())
                    .and_then(|value| value.as_str())
                    .filter(|uri| uri.starts_with("sca:") && !uri.contains("?fs="))
                    .map(str::to_string);
                if let Some(uri) = needs_file_system {
                    component.set_exec_param(Property::simple(
                        reserved::LOGGING_CONFIG_URI,
                        SimpleValue::Str(format!("{uri}?fs={file_system}")),
                    ));
                }
            }

            let exec_params = self.components[index].exec_params.clone();
            trace!(component = %identifier, entry = %entry, device = %node.label, "executing");
            let pid = node
                .device
                .execute(&entry, &[], &exec_params)
                .map_err(|cause| Error::ExecuteFailed {
                    component: instance_id.clone(),
                    reason: cause.to_string(),
                })?;
            if pid < 0 {
                return Err(Error::ExecuteFailed {
                    component: instance_id,
                    reason: format!("device returned pid {pid}"),
                });
            }
            application.set_component_pid(&identifier, pid);
        }
        Ok(())
    }

    fn await_registration(&self, application: &Arc<dyn Application>) -> Result<(), Error> {
        // Non-compliant components never register and are not waited on.
        let expected: BTreeSet<String> = self
            .components
            .iter()
            .filter(|component| component.is_sca_compliant())
            .map(|component| component.identifier.clone())
            .collect();
        let timeout = self.domain.component_binding_timeout();
        debug!(expected = expected.len(), ?timeout, "waiting for components to register");

        if application.wait_for_components(&expected, timeout) {
            return Ok(());
        }

        let registered: BTreeSet<String> = application
            .registered_components()
            .into_iter()
            .map(|component| component.identifier)
            .collect();
        let component = self
            .components
            .iter()
            .find(|component| {
                expected.contains(&component.identifier) && !registered.contains(&component.identifier)
            })
            .map(|component| component.instance_id.clone())
            .unwrap_or_else(|| InstanceId::from(""));
        error!(%component, "timed out waiting for component registration");
        Err(Error::ComponentRegistrationTimeout { component })
    }

    fn initialize_components(
        &mut self,
        application: &Arc<dyn Application>,
    ) -> Result<Vec<Arc<dyn Resource>>, Error> {
        debug!(components = self.components.len(), "initializing waveform components");
        let registered: BTreeMap<String, Arc<dyn Resource>> = application
            .registered_components()
            .into_iter()
            .map(|component| (component.identifier, component.resource))
            .collect();

        let mut start_seq: Vec<Option<Arc<dyn Resource>>> =
            vec![None; self.start_order_ids.len()];

        for index in 0..self.components.len() {
            let (identifier, instance_id, is_controller) = {
                let component = &self.components[index];
                if !component.is_sca_compliant() || !component.is_resource() {
                    continue;
                }
                (
                    component.identifier.clone(),
                    component.instance_id.clone(),
                    component.is_assembly_controller,
                )
            };

            let Some(resource) = registered.get(&identifier).cloned() else {
                return Err(Error::ComponentLookupFailed {
                    component: instance_id,
                });
            };

            trace!(component = %identifier, "initializing");
            resource
                .initialize()
                .map_err(|source| Error::InitializeFailed {
                    component: instance_id.clone(),
                    source,
                })?;
            self.components[index].resource = Some(Arc::clone(&resource));

            if !is_controller
                && let Some(position) = self
                    .start_order_ids
                    .iter()
                    .position(|id| *id == instance_id)
            {
                start_seq[position] = Some(resource);
            }
        }

        match self.assembly_controller_index() {
            Some(index)
                if self.components[index].resource.is_some()
                    || !self.components[index].is_sca_compliant() => {}
            _ => return Err(Error::AssemblyControllerUnavailable),
        }

        Ok(start_seq.into_iter().flatten().collect())
    }

    fn connect(&self) -> Result<Vec<ConnectionNode>, Error> {
        let resolver = self.domain.connection_resolver();
        debug!(count = self.assembly.connections.len(), "establishing waveform connections");
        let mut connections = Vec::with_capacity(self.assembly.connections.len());
        for connection in &self.assembly.connections {
            trace!(connection = %connection.id, "resolving connection");
            let node = resolver
                .resolve(connection, &self.base_context_path)
                .map_err(|cause| Error::ConnectionFailed {
                    connection: connection.id.clone(),
                    message: cause.message,
                })?;
            connections.push(node);
        }
        Ok(connections)
    }

    /// Configures every other component first, the assembly controller
    /// last.
    fn configure_components(&self) -> Result<(), Error> {
        for component in &self.components {
            if !component.is_assembly_controller {
                self.configure_one(component)?;
            }
        }
        if let Some(index) = self.assembly_controller_index() {
            self.configure_one(&self.components[index])?;
        }
        Ok(())
    }

    fn configure_one(&self, component: &ComponentInfo) -> Result<(), Error> {
        if !component.is_sca_compliant()
            || !component.is_resource()
            || !component.is_configurable()
            || component.naming_service_name.is_none()
        {
            return Ok(());
        }
        let Some(resource) = &component.resource else {
            return Err(Error::ComponentLookupFailed {
                component: component.instance_id.clone(),
            });
        };
        trace!(component = %component.identifier, "configuring");
        if let Err(cause) = resource.configure(&component.configure_properties) {
            error!(component = %component.identifier, %cause, "configure failed");
            return Err(Error::InvalidInitConfiguration {
                invalid: cause.invalid_properties().to_vec(),
            });
        }
        Ok(())
    }

    fn wire_external_ports(&self, application: &Arc<dyn Application>) -> Result<(), Error> {
        debug!(count = self.assembly.external_ports.len(), "mapping external ports");
        for port in &self.assembly.external_ports {
            let name = port.effective_name().to_string();
            let Some(index) = self.component_index(&port.component) else {
                return Err(Error::ExternalPortInvalid {
                    name,
                    message: format!("unknown component `{}`", port.component),
                });
            };
            let Some(resource) = &self.components[index].resource else {
                return Err(Error::ExternalPortInvalid {
                    name,
                    message: format!("component `{}` has no resource", port.component),
                });
            };

            let object = match port.kind {
                PortKind::SupportedInterface => {
                    if !resource.supports_interface(&port.port) {
                        return Err(Error::ExternalPortInvalid {
                            name,
                            message: format!(
                                "component does not support interface `{}`",
                                port.port
                            ),
                        });
                    }
                    resource.object_ref()
                }
                PortKind::Uses | PortKind::Provides => resource
                    .get_port(&port.port)
                    .ok_or_else(|| Error::ExternalPortInvalid {
                        name: name.clone(),
                        message: format!("invalid port identifier `{}`", port.port),
                    })?,
            };
            application.add_external_port(&name, object);
        }
        Ok(())
    }

    fn wire_external_properties(&self, application: &Arc<dyn Application>) -> Result<(), Error> {
        debug!(count = self.assembly.external_properties.len(), "mapping external properties");
        for property in &self.assembly.external_properties {
            let external = property.effective_id().to_string();
            let Some(index) = self.component_index(&property.component) else {
                return Err(Error::ExternalPropertyInvalid {
                    id: external,
                    message: format!("unknown component `{}`", property.component),
                });
            };
            let component = &self.components[index];
            if !component.spd.has_property(property.property.as_str()) {
                return Err(Error::ExternalPropertyInvalid {
                    id: external,
                    message: format!(
                        "property `{}` does not exist in component `{}`",
                        property.property, property.component
                    ),
                });
            }
            if component.resource.is_none() {
                return Err(Error::ExternalPropertyInvalid {
                    id: external,
                    message: format!("component `{}` has no resource", property.component),
                });
            }
            application.add_external_property(
                property.property.as_str(),
                &external,
                &component.identifier,
            );
        }
        Ok(())
    }

    /// Reverses every side effect of a failed attempt. Errors met during
    /// unwind are logged and swallowed; unwind itself never fails.
    pub(crate) fn unwind(&mut self) {
        warn!(waveform = %self.waveform_name, "unwinding failed application creation");

        if let Some(application) = &self.application {
            application.release_components();
            application.terminate_components();
            application.unload_components();
            application.cleanup_activations();
        }

        for (node, path) in self.softpkg_loaded.drain(..) {
            if !node.device.exists() {
                warn!(device = %node.identifier, path = %path, "skipping unload; device has departed");
                continue;
            }
            if let Err(cause) = node.device.unload(&path) {
                warn!(device = %node.identifier, path = %path, %cause,
                      "unable to unload soft package dependency");
            }
        }

        self.ledger.release();

        if let Err(cause) = self.waveform_context.unbind_all() {
            warn!(%cause, "could not unbind contents of waveform context");
        }
        if let Err(cause) = self.domain.naming_context().unbind(&self.waveform_name) {
            warn!(%cause, "could not unbind waveform context from the domain");
        }
        if let Err(cause) = self.waveform_context.destroy() {
            warn!(%cause, "could not destroy waveform context");
        }
    }
}

/// Extracts the reserved `TRUSTED_APPLICATION` key from the
/// init-configuration. Absent means trusted.
fn extract_trusted(init_config: &[Property]) -> (bool, Vec<Property>) {
    let mut trusted = true;
    let mut reduced = Vec::with_capacity(init_config.len());
    for property in init_config {
        if property.id == reserved::TRUSTED_APPLICATION {
            if let Some(SimpleValue::Bool(value)) = property.value.as_simple() {
                trusted = *value;
            }
        } else {
            reduced.push(property.clone());
        }
    }
    (trusted, reduced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_flag_extraction_reduces_the_configuration() {
        let init = vec![
            Property::simple("gain", SimpleValue::Double(2.0)),
            Property::simple(
                reserved::TRUSTED_APPLICATION,
                SimpleValue::Bool(false),
            ),
            Property::simple("frames", SimpleValue::Long(4)),
        ];
        let (trusted, reduced) = extract_trusted(&init);
        assert!(!trusted);
        assert_eq!(reduced.len(), init.len() - 1);
        assert!(reduced.iter().all(|p| p.id != reserved::TRUSTED_APPLICATION));
    }

    #[test]
    fn absent_trusted_key_defaults_to_trusted() {
        let init = vec![Property::simple("gain", SimpleValue::Double(2.0))];
        let (trusted, reduced) = extract_trusted(&init);
        assert!(trusted);
        assert_eq!(reduced, init);
    }
}
