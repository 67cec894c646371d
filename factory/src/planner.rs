//! Placement planning: assigns every component an implementation and a
//! device through the allocation manager.
//!
//! Each attempt (one implementation of one component, or one
//! implementation tuple of a collocation group) records its allocations
//! in a local [`ScopedLedger`]; the ledger transfers into the pipeline
//! ledger when the attempt sticks and releases automatically when it
//! does not.

use std::{collections::BTreeSet, sync::Arc};

use sideband_assembly::{
    AllocationId, DeviceId, HostCollocation, Implementation, InstanceId, Property, UsesDevice,
};
use sideband_platform::{
    AllocationManager, DeviceAssignment, DeviceNode, UsageState, UsesRequest,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    component::SoftpkgLoad,
    error::Error,
    expr,
    ledger::ScopedLedger,
    matcher,
    pipeline::CreateContext,
};

/// Moves the named device to the front of the list, preserving the
/// relative order of the rest. Used identically after single-component
/// and collocated placement, and for the warm-start hint.
pub(crate) fn rotate_device_list(devices: &mut [Arc<DeviceNode>], identifier: &DeviceId) {
    if let Some(position) = devices
        .iter()
        .position(|node| node.identifier == *identifier)
        && position != 0
    {
        devices.rotate_left(position);
    }
}

/// Outcome of a bulk uses-device allocation. The ledger owns every
/// allocation the attempt made; dropping it releases them.
pub(crate) struct UsesAllocation {
    pub(crate) ledger: ScopedLedger,
    pub(crate) assignments: Vec<DeviceAssignment>,
    pub(crate) unsatisfied: Vec<String>,
}

impl UsesAllocation {
    pub(crate) fn is_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }
}

/// Satisfies a set of uses-device clauses with one bulk allocation call.
/// Request ids are the clause ids, so responses match back; clauses with
/// no response are reported as unsatisfied.
pub(crate) fn allocate_uses_devices(
    allocator: &Arc<dyn AllocationManager>,
    owner: &InstanceId,
    clauses: &[UsesDevice],
    configure: &[Property],
) -> Result<UsesAllocation, Error> {
    let mut result = UsesAllocation {
        ledger: ScopedLedger::new(Arc::clone(allocator)),
        assignments: Vec::new(),
        unsatisfied: Vec::new(),
    };
    if clauses.is_empty() {
        return Ok(result);
    }

    let mut requests = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let mut properties = clause.dependencies.clone();
        expr::evaluate_math_requests(&mut properties, configure)?;
        requests.push(UsesRequest {
            request_id: clause.id.clone(),
            properties,
        });
    }

    let mut satisfied = BTreeSet::new();
    for response in allocator.allocate(&requests) {
        trace!(allocation = %response.allocation_id, request = %response.request_id, "usesdevice allocated");
        result.ledger.push(response.allocation_id.clone());
        if !clauses.iter().any(|clause| clause.id == response.request_id) {
            // Diagnostic only; the response is still released with the rest.
            warn!(request = %response.request_id, "allocation response matches no usesdevice");
            continue;
        }
        satisfied.insert(response.request_id.clone());
        result.assignments.push(DeviceAssignment {
            component: owner.clone(),
            device_id: response.device.identifier.clone(),
            device: response.device,
        });
    }

    result.unsatisfied = clauses
        .iter()
        .filter(|clause| !satisfied.contains(&clause.id))
        .map(|clause| clause.id.clone())
        .collect();
    Ok(result)
}

/// Selects one implementation per soft-package dependency that can run
/// on the assigned device, recursing through nested dependencies.
/// Returns the files to load, nested dependencies first.
pub(crate) fn resolve_softpkg_loads(
    implementation: &Implementation,
    prf: &[Property],
) -> Option<Vec<SoftpkgLoad>> {
    let mut loads = Vec::new();
    for dependency in &implementation.softpkg_deps {
        let mut selected = None;
        for candidate in &dependency.implementations {
            if !candidate.matches_device(prf) {
                continue;
            }
            if let Some(nested) = resolve_softpkg_loads(candidate, prf) {
                selected = Some((candidate, nested));
                break;
            }
        }
        let Some((candidate, nested)) = selected else {
            trace!(dependency = %dependency.name, "no soft package implementation matches the device");
            return None;
        };
        loads.extend(nested);
        loads.push(SoftpkgLoad {
            local_file: candidate.code.local_file.clone(),
            code_type: candidate.code.code_type,
        });
    }
    Some(loads)
}

impl CreateContext {
    pub(crate) fn component_index(&self, id: &InstanceId) -> Option<usize> {
        self.components
            .iter()
            .position(|component| component.instance_id == *id)
    }

    /// Places components named in the caller's device assignments, each
    /// restricted to exactly the requested device.
    pub(crate) fn assign_from_user(
        &mut self,
        assignments: &[(InstanceId, DeviceId)],
    ) -> Result<(), Error> {
        for (component, device) in assignments {
            trace!(%component, %device, "assigning component from user device assignment");
            let Some(index) = self.component_index(component) else {
                return Err(Error::BadComponentAssignment {
                    component: component.clone(),
                });
            };
            self.allocate_component(index, Some(device))?;
        }
        Ok(())
    }

    pub(crate) fn assign_remaining(&mut self) -> Result<(), Error> {
        for index in 0..self.components.len() {
            if !self.components[index].is_assigned() {
                self.allocate_component(index, None)?;
            }
        }
        Ok(())
    }

    /// Finds an implementation of one component whose allocation
    /// requirements can be met, and assigns the component to the device
    /// that met them.
    pub(crate) fn allocate_component(
        &mut self,
        index: usize,
        desired_device: Option<&DeviceId>,
    ) -> Result<(), Error> {
        let instance_id = self.components[index].instance_id.clone();
        let identifier = self.components[index].identifier.clone();
        let configure = self.components[index].configure_properties.clone();

        // The component's own usesdevice clauses must hold regardless of
        // which implementation wins; they go straight to the pipeline
        // ledger.
        let component_uses = self.components[index].spd.uses_devices.clone();
        let mut uses =
            allocate_uses_devices(&self.allocator, &instance_id, &component_uses, &configure)?;
        if !uses.is_satisfied() {
            return Err(Error::UsesDeviceUnsatisfied {
                owner: identifier,
                failed: uses.unsatisfied,
            });
        }
        uses.ledger.transfer(&mut self.ledger);
        self.app_assigned.append(&mut uses.assignments);

        let implementations = self.components[index].spd.implementations.clone();
        for (impl_index, implementation) in implementations.iter().enumerate() {
            let mut attempt = allocate_uses_devices(
                &self.allocator,
                &instance_id,
                &implementation.uses_devices,
                &configure,
            )?;
            if !attempt.is_satisfied() {
                trace!(component = %identifier, implementation = %implementation.id,
                       "usesdevice dependencies unsatisfied");
                continue;
            }

            let Some((allocation, node)) =
                self.allocate_to_device(&instance_id, implementation, desired_device, &configure)?
            else {
                trace!(component = %identifier, implementation = %implementation.id,
                       "no device satisfies the allocation request");
                continue;
            };
            attempt.ledger.push(allocation);

            let Some(loads) = resolve_softpkg_loads(implementation, &node.prf) else {
                trace!(component = %identifier, implementation = %implementation.id,
                       "soft package dependencies unsatisfied");
                continue;
            };

            debug!(component = %identifier, implementation = %implementation.id,
                   device = %node.identifier, "component placed");
            attempt.ledger.transfer(&mut self.ledger);
            self.app_assigned.push(DeviceAssignment {
                component: instance_id.clone(),
                device_id: node.identifier.clone(),
                device: Arc::clone(&node),
            });
            self.app_assigned.append(&mut attempt.assignments);

            let component = &mut self.components[index];
            component.selected_implementation = Some(impl_index);
            component.softpkg_loads = loads;
            component.assigned_device = Some(Arc::clone(&node));

            rotate_device_list(&mut self.executable_devices, &node.identifier);
            return Ok(());
        }

        Err(self.placement_failure(&instance_id))
    }

    fn allocate_to_device(
        &self,
        component: &InstanceId,
        implementation: &Implementation,
        desired_device: Option<&DeviceId>,
        configure: &[Property],
    ) -> Result<Option<(AllocationId, Arc<DeviceNode>)>, Error> {
        // A user assignment may target any registered device; otherwise
        // the rotated executable list expresses placement affinity.
        let candidates: Vec<Arc<DeviceNode>> = match desired_device {
            Some(device_id) => {
                let Some(node) = self
                    .registered_devices
                    .iter()
                    .find(|node| node.identifier == *device_id)
                else {
                    return Err(Error::BadDeviceAssignment {
                        component: component.clone(),
                        device: device_id.clone(),
                    });
                };
                vec![Arc::clone(node)]
            }
            None => self.executable_devices.clone(),
        };

        let mut properties = implementation.dependency_properties.clone();
        expr::evaluate_math_requests(&mut properties, configure)?;

        let request_id = Uuid::new_v4().to_string();
        Ok(self.allocator.allocate_deployment(
            &request_id,
            &properties,
            &candidates,
            &implementation.processor_deps,
            &implementation.os_deps,
        ))
    }

    /// Distinguishes why no implementation of a component could be
    /// placed.
    fn placement_failure(&self, component: &InstanceId) -> Error {
        let executables: Vec<_> = self
            .registered_devices
            .iter()
            .filter(|node| node.is_executable)
            .collect();
        if executables.is_empty() {
            return Error::NoExecutableDevices;
        }
        if executables
            .iter()
            .all(|node| node.device.usage_state() == UsageState::Busy)
        {
            return Error::AllExecutableDevicesBusy;
        }
        Error::NoDeviceSatisfiesDependencies {
            component: component.clone(),
        }
    }

    /// Places a host collocation group on one shared device.
    pub(crate) fn place_collocation(&mut self, group: &HostCollocation) -> Result<(), Error> {
        debug!(group = %group.id, members = group.members.len(), "placing host collocation group");

        // Members already pinned by a user assignment constrain the
        // candidate devices; the rest are placed here.
        let mut pinned_devices: Vec<DeviceId> = Vec::new();
        let mut placing: Vec<usize> = Vec::new();
        for member in &group.members {
            let Some(index) = self.component_index(member) else {
                return Err(Error::BadComponentAssignment {
                    component: member.clone(),
                });
            };
            match &self.components[index].assigned_device {
                Some(node) => pinned_devices.push(node.identifier.clone()),
                None => placing.push(index),
            }
        }
        if placing.is_empty() {
            return Ok(());
        }

        let candidate_lists: Vec<Vec<Implementation>> = placing
            .iter()
            .map(|&index| self.components[index].spd.implementations.clone())
            .collect();
        let candidate_refs: Vec<&[Implementation]> =
            candidate_lists.iter().map(Vec::as_slice).collect();
        let tuples = matcher::matching_tuples(&candidate_refs);

        let mut deployment_devices = self.executable_devices.clone();
        if !pinned_devices.is_empty() {
            deployment_devices.retain(|node| pinned_devices.contains(&node.identifier));
        }

        for tuple in tuples {
            let members: Vec<&Implementation> = tuple
                .iter()
                .enumerate()
                .map(|(position, &impl_index)| &candidate_lists[position][impl_index])
                .collect();
            let processor_deps = matcher::merge_processors(&members);
            let os_deps = matcher::merge_os(&members);

            // Union of the tuple's dependency properties; duplicates are
            // deliberate and stand for repeated allocations.
            let properties: Vec<Property> = members
                .iter()
                .flat_map(|member| member.dependency_properties.iter().cloned())
                .collect();

            let request_id = Uuid::new_v4().to_string();
            let Some((allocation, node)) = self.allocator.allocate_deployment(
                &request_id,
                &properties,
                &deployment_devices,
                &processor_deps,
                &os_deps,
            ) else {
                continue;
            };
            let mut attempt = ScopedLedger::new(Arc::clone(&self.allocator));
            attempt.push(allocation);

            let Some(load_sets) = members
                .iter()
                .map(|member| resolve_softpkg_loads(member, &node.prf))
                .collect::<Option<Vec<_>>>()
            else {
                trace!(group = %group.id, device = %node.identifier,
                       "soft package dependencies unsatisfied");
                continue;
            };

            attempt.transfer(&mut self.ledger);
            for ((&index, &impl_index), loads) in
                placing.iter().zip(tuple.iter()).zip(load_sets)
            {
                let instance_id = {
                    let component = &mut self.components[index];
                    component.selected_implementation = Some(impl_index);
                    component.softpkg_loads = loads;
                    component.assigned_device = Some(Arc::clone(&node));
                    component.instance_id.clone()
                };
                self.app_assigned.push(DeviceAssignment {
                    component: instance_id,
                    device_id: node.identifier.clone(),
                    device: Arc::clone(&node),
                });
            }

            rotate_device_list(&mut self.executable_devices, &node.identifier);
            debug!(group = %group.id, device = %node.identifier, placed = placing.len(),
                   "collocation group placed");
            return Ok(());
        }

        Err(Error::CollocationUnsatisfiable {
            group: group.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use sideband_assembly::Code;

    use super::*;

    fn device(id: &str) -> Arc<DeviceNode> {
        use sideband_platform::memory::{MemoryDevice, RegistrarTable};
        let registrars = Arc::new(RegistrarTable::default());
        MemoryDevice::new(id, id, &registrars).node(Vec::new(), true)
    }

    #[test]
    fn rotation_moves_the_chosen_device_to_the_front() {
        let mut devices = vec![device("a"), device("b"), device("c")];
        rotate_device_list(&mut devices, &DeviceId::from("b"));
        let order: Vec<_> = devices.iter().map(|node| node.identifier.to_string()).collect();
        assert_eq!(order, ["b", "c", "a"]);
    }

    #[test]
    fn rotation_ignores_unknown_devices() {
        let mut devices = vec![device("a"), device("b")];
        rotate_device_list(&mut devices, &DeviceId::from("ghost"));
        let order: Vec<_> = devices.iter().map(|node| node.identifier.to_string()).collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn softpkg_loads_come_out_nested_first() {
        let inner = sideband_assembly::SoftPkg::builder()
            .id("DCE:inner")
            .name("inner")
            .spd_path("/deps/inner.spd.json")
            .implementations(vec![
                Implementation::builder()
                    .id("inner_any")
                    .code(Code::load_only(
                        sideband_assembly::CodeType::SharedLibrary,
                        "inner.so",
                    ))
                    .build(),
            ])
            .build();
        let outer = sideband_assembly::SoftPkg::builder()
            .id("DCE:outer")
            .name("outer")
            .spd_path("/deps/outer.spd.json")
            .implementations(vec![
                Implementation::builder()
                    .id("outer_any")
                    .code(Code::load_only(
                        sideband_assembly::CodeType::SharedLibrary,
                        "outer.so",
                    ))
                    .softpkg_deps(vec![inner])
                    .build(),
            ])
            .build();
        let implementation = Implementation::builder()
            .id("main")
            .code(Code::executable("main.bin", "main"))
            .softpkg_deps(vec![outer])
            .build();

        let loads = resolve_softpkg_loads(&implementation, &[]).unwrap();
        let files: Vec<_> = loads.iter().map(|load| load.local_file.as_str()).collect();
        assert_eq!(files, ["inner.so", "outer.so"]);
    }

    #[test]
    fn softpkg_resolution_fails_when_no_implementation_matches() {
        let dependency = sideband_assembly::SoftPkg::builder()
            .id("DCE:dep")
            .name("dep")
            .spd_path("/deps/dep.spd.json")
            .implementations(vec![
                Implementation::builder()
                    .id("dep_arm")
                    .code(Code::load_only(
                        sideband_assembly::CodeType::SharedLibrary,
                        "dep.so",
                    ))
                    .processor_deps(vec!["armv8".to_string()])
                    .build(),
            ])
            .build();
        let implementation = Implementation::builder()
            .id("main")
            .code(Code::executable("main.bin", "main"))
            .softpkg_deps(vec![dependency])
            .build();

        let prf = vec![Property::simple(
            sideband_assembly::PROCESSOR_NAME,
            sideband_assembly::SimpleValue::Str("x86_64".into()),
        )];
        assert!(resolve_softpkg_loads(&implementation, &prf).is_none());
    }
}
