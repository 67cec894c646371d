use std::sync::Arc;

use sideband_assembly::{CodeType, Implementation, InstanceId, Instantiation, Property, PropertyValue, SoftPkg};
use sideband_platform::{DeviceNode, Resource};
use tracing::warn;

/// A soft-package dependency file selected for the assigned device, in
/// load order (nested dependencies first).
#[derive(Clone, Debug)]
pub struct SoftpkgLoad {
    pub local_file: String,
    pub code_type: CodeType,
}

/// The working record for one component while it is being deployed.
///
/// Created from the assembly when a pipeline starts, mutated only by the
/// placement planner (implementation selection, device assignment) and
/// the pipeline itself (resource reference after registration).
pub struct ComponentInfo {
    pub instance_id: InstanceId,
    /// Composite identifier `<instanceId>:<waveformContext>`.
    pub identifier: String,
    pub spd: SoftPkg,
    pub spd_path: String,
    pub naming_service_name: Option<String>,
    pub usage_name: Option<String>,
    pub is_assembly_controller: bool,
    pub exec_params: Vec<Property>,
    pub configure_properties: Vec<Property>,
    pub selected_implementation: Option<usize>,
    pub softpkg_loads: Vec<SoftpkgLoad>,
    pub assigned_device: Option<Arc<DeviceNode>>,
    pub resource: Option<Arc<dyn Resource>>,
}

impl ComponentInfo {
    pub fn new(
        instantiation: &Instantiation,
        spd: SoftPkg,
        spd_path: String,
        waveform_context: &str,
    ) -> Self {
        let identifier = format!("{}:{waveform_context}", instantiation.id);
        if spd.sca_compliant && instantiation.naming_service_name.is_none() {
            // Diagnostic only; such a component can never register back.
            warn!(
                component = %instantiation.id,
                "component is SCA compliant but provides no naming service name"
            );
        }

        let exec_params = spd.exec_params.clone();
        let mut configure_properties = spd.configure_properties();
        let mut info = Self {
            instance_id: instantiation.id.clone(),
            identifier,
            spd,
            spd_path,
            naming_service_name: instantiation.naming_service_name.clone(),
            usage_name: instantiation.usage_name.clone(),
            is_assembly_controller: false,
            exec_params,
            configure_properties: Vec::new(),
            selected_implementation: None,
            softpkg_loads: Vec::new(),
            assigned_device: None,
            resource: None,
        };
        for override_prop in &instantiation.property_overrides {
            override_in(&mut configure_properties, override_prop.clone());
        }
        info.configure_properties = configure_properties;
        info
    }

    pub fn is_sca_compliant(&self) -> bool {
        self.spd.sca_compliant
    }

    pub fn is_resource(&self) -> bool {
        self.spd.is_resource
    }

    pub fn is_configurable(&self) -> bool {
        self.spd.is_configurable
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_device.is_some()
    }

    pub fn selected_implementation(&self) -> Option<&Implementation> {
        self.selected_implementation
            .and_then(|index| self.spd.implementations.get(index))
    }

    /// Replaces the value of a top-level configure property. Unknown ids
    /// are reported and ignored, matching descriptor-driven overrides.
    pub fn override_property(&mut self, id: &str, value: PropertyValue) {
        let Some(existing) = self
            .configure_properties
            .iter_mut()
            .find(|property| property.id == id)
        else {
            warn!(component = %self.identifier, property = id, "override names no configure property");
            return;
        };
        existing.value = value;
    }

    pub fn has_exec_param(&self, id: &str) -> bool {
        self.exec_params.iter().any(|param| param.id == id)
    }

    pub fn add_exec_param(&mut self, param: Property) {
        self.exec_params.push(param);
    }

    /// Replaces an exec parameter in place, or appends it.
    pub fn set_exec_param(&mut self, param: Property) {
        match self.exec_params.iter_mut().find(|existing| existing.id == param.id) {
            Some(existing) => existing.value = param.value,
            None => self.exec_params.push(param),
        }
    }

    pub fn exec_param(&self, id: &str) -> Option<&Property> {
        self.exec_params.iter().find(|param| param.id == id)
    }
}

fn override_in(properties: &mut [Property], override_prop: Property) {
    match properties
        .iter_mut()
        .find(|property| property.id == override_prop.id)
    {
        Some(existing) => existing.value = override_prop.value,
        None => warn!(property = %override_prop.id, "instantiation override names no configure property"),
    }
}

#[cfg(test)]
mod tests {
    use sideband_assembly::{Code, PropertyDef, PropertyKind, SimpleValue};

    use super::*;

    fn softpkg() -> SoftPkg {
        SoftPkg::builder()
            .id("DCE:plot")
            .name("plot")
            .spd_path("/components/plot/plot.spd.json")
            .properties(vec![PropertyDef::new(
                "gain",
                PropertyValue::Simple(SimpleValue::Double(1.0)),
                PropertyKind::Configure,
            )])
            .implementations(vec![
                Implementation::builder()
                    .id("cpp")
                    .code(Code::executable("plot.bin", "plot"))
                    .build(),
            ])
            .build()
    }

    #[test]
    fn composite_identifier_includes_the_waveform_context() {
        let instantiation = Instantiation::builder()
            .id("plot_1")
            .naming_service_name("plot_1")
            .build();
        let info = ComponentInfo::new(
            &instantiation,
            softpkg(),
            "/components/plot/plot.spd.json".to_string(),
            "wave_3",
        );
        assert_eq!(info.identifier, "plot_1:wave_3");
    }

    #[test]
    fn instantiation_overrides_apply_to_configure_properties() {
        let instantiation = Instantiation::builder()
            .id("plot_1")
            .naming_service_name("plot_1")
            .property_overrides(vec![Property::simple("gain", SimpleValue::Double(7.5))])
            .build();
        let info = ComponentInfo::new(
            &instantiation,
            softpkg(),
            "/components/plot/plot.spd.json".to_string(),
            "wave_1",
        );
        assert_eq!(
            info.configure_properties,
            vec![Property::simple("gain", SimpleValue::Double(7.5))]
        );
    }

    #[test]
    fn exec_params_replace_in_place() {
        let instantiation = Instantiation::builder()
            .id("plot_1")
            .naming_service_name("plot_1")
            .build();
        let mut info = ComponentInfo::new(
            &instantiation,
            softpkg(),
            "/components/plot/plot.spd.json".to_string(),
            "wave_1",
        );
        info.set_exec_param(Property::simple("DEBUG_LEVEL", SimpleValue::Long(3)));
        info.set_exec_param(Property::simple("DEBUG_LEVEL", SimpleValue::Long(5)));
        assert_eq!(
            info.exec_param("DEBUG_LEVEL").unwrap().value,
            PropertyValue::Simple(SimpleValue::Long(5))
        );
    }
}
