//! In-process implementations of every platform seam.
//!
//! The bench behaves like a small domain: devices advertise capacity
//! through their PRF snapshot, the allocation manager arbitrates it,
//! executing a component synchronously "launches" it and registers a
//! [`MemoryResource`] back with the owning application. Failure modes
//! (busy devices, load/execute failures, components that never register,
//! configure rejections) are scripted per object.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use sideband_assembly::{
    AllocationId, CodeType, Connection, DeviceId, OS_NAME, OS_VERSION, OsDep, PROCESSOR_NAME,
    ProfileSource, Property, PropertyValue,
};
use tracing::debug;

use crate::{
    AllocationManager, Application, ApplicationSpec, ConfigureError, ConnectionError,
    ConnectionNode, ConnectionResolver, Device, DeviceAssignment, DeviceError, DeviceNode, Domain,
    InitializeError, NamingContext, NamingError, ObjRef, Pid, RegisteredComponent, RegistryError,
    Resource, UsageState, UsesRequest, UsesResponse,
};

/// Profile file space backed by a map.
#[derive(Default)]
pub struct MemoryFiles {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, text: impl Into<String>) {
        self.files.lock().unwrap().insert(path.into(), text.into());
    }
}

impl ProfileSource for MemoryFiles {
    fn read_to_string(&self, path: &str) -> io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}

/// Maps registrar references to their applications so devices can route
/// a launched component's registration callback.
#[derive(Default)]
pub struct RegistrarTable {
    entries: Mutex<HashMap<String, Arc<MemoryApplication>>>,
}

impl RegistrarTable {
    fn insert(&self, registrar: &ObjRef, application: Arc<MemoryApplication>) {
        self.entries
            .lock()
            .unwrap()
            .insert(registrar.as_str().to_string(), application);
    }

    fn get(&self, registrar: &str) -> Option<Arc<MemoryApplication>> {
        self.entries.lock().unwrap().get(registrar).cloned()
    }
}

/// Scripted configure outcome for a [`MemoryResource`].
#[derive(Clone, Debug)]
pub enum ConfigureFailure {
    Invalid(Vec<Property>),
    Partial(Vec<Property>),
}

#[derive(Default)]
struct ResourceState {
    initialized: bool,
    configured: Vec<Vec<Property>>,
}

/// A component-side resource stub that records lifecycle traffic.
pub struct MemoryResource {
    identifier: String,
    ports: Mutex<BTreeMap<String, ObjRef>>,
    supported_interfaces: Mutex<BTreeSet<String>>,
    fail_initialize: AtomicBool,
    configure_failure: Mutex<Option<ConfigureFailure>>,
    state: Mutex<ResourceState>,
}

impl MemoryResource {
    pub fn new(identifier: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            ports: Mutex::new(BTreeMap::new()),
            supported_interfaces: Mutex::new(BTreeSet::new()),
            fail_initialize: AtomicBool::new(false),
            configure_failure: Mutex::new(None),
            state: Mutex::new(ResourceState::default()),
        })
    }

    pub fn add_port(&self, name: &str) {
        let port = ObjRef::from(format!("port:{}/{name}", self.identifier));
        self.ports.lock().unwrap().insert(name.to_string(), port);
    }

    pub fn support_interface(&self, repo_id: &str) {
        self.supported_interfaces
            .lock()
            .unwrap()
            .insert(repo_id.to_string());
    }

    pub fn fail_initialize(&self) {
        self.fail_initialize.store(true, Ordering::SeqCst);
    }

    pub fn fail_configure(&self, failure: ConfigureFailure) {
        *self.configure_failure.lock().unwrap() = Some(failure);
    }

    pub fn initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    pub fn configured_calls(&self) -> Vec<Vec<Property>> {
        self.state.lock().unwrap().configured.clone()
    }
}

impl Resource for MemoryResource {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn object_ref(&self) -> ObjRef {
        ObjRef::from(format!("resource:{}", self.identifier))
    }

    fn initialize(&self) -> Result<(), InitializeError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(InitializeError {
                messages: vec!["scripted initialize failure".to_string()],
            });
        }
        self.state.lock().unwrap().initialized = true;
        Ok(())
    }

    fn configure(&self, properties: &[Property]) -> Result<(), ConfigureError> {
        if let Some(failure) = self.configure_failure.lock().unwrap().clone() {
            return Err(match failure {
                ConfigureFailure::Invalid(invalid_properties) => {
                    ConfigureError::InvalidConfiguration {
                        message: "scripted configure failure".to_string(),
                        invalid_properties,
                    }
                }
                ConfigureFailure::Partial(invalid_properties) => {
                    ConfigureError::PartialConfiguration { invalid_properties }
                }
            });
        }
        self.state.lock().unwrap().configured.push(properties.to_vec());
        Ok(())
    }

    fn get_port(&self, name: &str) -> Option<ObjRef> {
        self.ports.lock().unwrap().get(name).cloned()
    }

    fn supports_interface(&self, repo_id: &str) -> bool {
        self.supported_interfaces.lock().unwrap().contains(repo_id)
    }
}

#[derive(Clone, Default)]
struct ComponentRecord {
    spd_path: String,
    implementation: Option<String>,
    naming_context: Option<String>,
    device: Option<Arc<DeviceNode>>,
    pid: Option<Pid>,
    loaded_files: Vec<String>,
}

/// Everything handed over on successful creation.
#[derive(Clone)]
pub struct Populated {
    pub assembly_controller: Option<Arc<dyn Resource>>,
    pub devices: Vec<DeviceAssignment>,
    pub start_seq: Vec<Arc<dyn Resource>>,
    pub connections: Vec<ConnectionNode>,
    pub allocation_ids: Vec<AllocationId>,
}

#[derive(Default)]
struct AppState {
    components: BTreeMap<String, ComponentRecord>,
    registered: BTreeMap<String, Arc<dyn Resource>>,
    external_ports: BTreeMap<String, ObjRef>,
    external_properties: Vec<(String, String, String)>,
    populated: Option<Populated>,
    released: bool,
    terminated: Vec<(String, Pid)>,
    unloaded: bool,
    activations_cleaned: bool,
}

/// Application servant that records everything the factory feeds it.
pub struct MemoryApplication {
    spec: ApplicationSpec,
    context: Arc<dyn NamingContext>,
    registrar: ObjRef,
    state: Mutex<AppState>,
    registered_cv: Condvar,
}

impl std::fmt::Debug for MemoryApplication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryApplication")
            .field("spec", &self.spec)
            .field("registrar", &self.registrar)
            .finish_non_exhaustive()
    }
}

impl MemoryApplication {
    fn new(spec: ApplicationSpec, context: Arc<dyn NamingContext>) -> Arc<Self> {
        let registrar = ObjRef::from(format!("registrar:{}", spec.identifier));
        Arc::new(Self {
            spec,
            context,
            registrar,
            state: Mutex::new(AppState::default()),
            registered_cv: Condvar::new(),
        })
    }

    /// Registration callback, normally driven by a device's synchronous
    /// "launch" of a component.
    pub fn register(&self, component_id: &str, resource: Arc<dyn Resource>) {
        if let Err(error) = self.context.bind(component_id, resource.object_ref()) {
            debug!(component_id, %error, "registration bind skipped");
        }
        let mut state = self.state.lock().unwrap();
        state
            .registered
            .insert(component_id.to_string(), resource);
        self.registered_cv.notify_all();
    }

    pub fn trusted(&self) -> bool {
        self.spec.trusted
    }

    pub fn populated(&self) -> Option<Populated> {
        self.state.lock().unwrap().populated.clone()
    }

    pub fn pid_of(&self, component_id: &str) -> Option<Pid> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(component_id)
            .and_then(|record| record.pid)
    }

    pub fn implementation_of(&self, component_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(component_id)
            .and_then(|record| record.implementation.clone())
    }

    pub fn device_of(&self, component_id: &str) -> Option<DeviceId> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(component_id)
            .and_then(|record| record.device.as_ref())
            .map(|device| device.identifier.clone())
    }

    pub fn loaded_files_of(&self, component_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(component_id)
            .map(|record| record.loaded_files.clone())
            .unwrap_or_default()
    }

    pub fn external_port_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .external_ports
            .keys()
            .cloned()
            .collect()
    }

    pub fn external_properties(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().external_properties.clone()
    }

    pub fn was_released(&self) -> bool {
        self.state.lock().unwrap().released
    }

    pub fn terminated(&self) -> Vec<(String, Pid)> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn was_unloaded(&self) -> bool {
        self.state.lock().unwrap().unloaded
    }
}

impl Application for MemoryApplication {
    fn identifier(&self) -> String {
        self.spec.identifier.clone()
    }

    fn add_component(&self, component_id: &str, spd_path: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.spd_path = spd_path.to_string();
    }

    fn set_component_implementation(&self, component_id: &str, implementation_id: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.implementation = Some(implementation_id.to_string());
    }

    fn set_component_naming_context(&self, component_id: &str, lookup_name: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.naming_context = Some(lookup_name.to_string());
    }

    fn set_component_device(&self, component_id: &str, device: &Arc<DeviceNode>) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.device = Some(Arc::clone(device));
    }

    fn set_component_pid(&self, component_id: &str, pid: Pid) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.pid = Some(pid);
    }

    fn add_component_loaded_file(&self, component_id: &str, path: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.components.entry(component_id.to_string()).or_default();
        record.loaded_files.push(path.to_string());
    }

    fn add_external_port(&self, name: &str, port: ObjRef) {
        self.state
            .lock()
            .unwrap()
            .external_ports
            .insert(name.to_string(), port);
    }

    fn add_external_property(&self, property_id: &str, external_id: &str, component_id: &str) {
        self.state.lock().unwrap().external_properties.push((
            property_id.to_string(),
            external_id.to_string(),
            component_id.to_string(),
        ));
    }

    fn app_registrar(&self) -> ObjRef {
        self.registrar.clone()
    }

    fn registered_components(&self) -> Vec<RegisteredComponent> {
        self.state
            .lock()
            .unwrap()
            .registered
            .iter()
            .map(|(identifier, resource)| RegisteredComponent {
                identifier: identifier.clone(),
                resource: Arc::clone(resource),
            })
            .collect()
    }

    fn wait_for_components(&self, expected: &BTreeSet<String>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if expected
                .iter()
                .all(|identifier| state.registered.contains_key(identifier))
            {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (next, result) = self
                .registered_cv
                .wait_timeout(state, remaining)
                .unwrap();
            state = next;
            if result.timed_out() {
                return expected
                    .iter()
                    .all(|identifier| state.registered.contains_key(identifier));
            }
        }
    }

    fn populate(
        &self,
        assembly_controller: Option<Arc<dyn Resource>>,
        devices: Vec<DeviceAssignment>,
        start_seq: Vec<Arc<dyn Resource>>,
        connections: Vec<ConnectionNode>,
        allocation_ids: Vec<AllocationId>,
    ) {
        self.state.lock().unwrap().populated = Some(Populated {
            assembly_controller,
            devices,
            start_seq,
            connections,
            allocation_ids,
        });
    }

    fn release_components(&self) {
        self.state.lock().unwrap().released = true;
    }

    fn terminate_components(&self) {
        let mut state = self.state.lock().unwrap();
        let terminated: Vec<(String, Pid)> = state
            .components
            .iter()
            .filter_map(|(id, record)| record.pid.map(|pid| (id.clone(), pid)))
            .collect();
        state.terminated.extend(terminated);
    }

    fn unload_components(&self) {
        let targets: Vec<(Arc<DeviceNode>, Vec<String>)> = {
            let mut state = self.state.lock().unwrap();
            state.unloaded = true;
            state
                .components
                .values()
                .filter_map(|record| {
                    record
                        .device
                        .as_ref()
                        .map(|device| (Arc::clone(device), record.loaded_files.clone()))
                })
                .collect()
        };
        for (device, files) in targets {
            for file in files {
                if let Err(error) = device.device.unload(&file) {
                    debug!(device = %device.identifier, file = %file, %error, "unload failed");
                }
            }
        }
    }

    fn cleanup_activations(&self) {
        self.state.lock().unwrap().activations_cleaned = true;
    }
}

#[derive(Default)]
struct DeviceState {
    loaded: Vec<(String, CodeType)>,
    unloaded: Vec<String>,
    executed: Vec<ExecRecord>,
}

/// One recorded `execute` call.
#[derive(Clone, Debug)]
pub struct ExecRecord {
    pub entry_point: String,
    pub pid: Pid,
    pub parameters: Vec<Property>,
}

/// An executable device that launches components synchronously.
pub struct MemoryDevice {
    identifier: DeviceId,
    label: String,
    registrars: Arc<RegistrarTable>,
    auto_register: AtomicBool,
    usage: Mutex<UsageState>,
    present: AtomicBool,
    fail_load: Mutex<BTreeSet<String>>,
    fail_execute: AtomicBool,
    scripted_resources: Mutex<HashMap<String, Arc<MemoryResource>>>,
    next_pid: AtomicI64,
    state: Mutex<DeviceState>,
}

impl MemoryDevice {
    pub fn new(
        identifier: impl Into<DeviceId>,
        label: impl Into<String>,
        registrars: &Arc<RegistrarTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identifier: identifier.into(),
            label: label.into(),
            registrars: Arc::clone(registrars),
            auto_register: AtomicBool::new(true),
            usage: Mutex::new(UsageState::Idle),
            present: AtomicBool::new(true),
            fail_load: Mutex::new(BTreeSet::new()),
            fail_execute: AtomicBool::new(false),
            scripted_resources: Mutex::new(HashMap::new()),
            next_pid: AtomicI64::new(1000),
            state: Mutex::new(DeviceState::default()),
        })
    }

    /// Wraps this device in a registered-device record.
    pub fn node(self: &Arc<Self>, prf: Vec<Property>, is_executable: bool) -> Arc<DeviceNode> {
        Arc::new(DeviceNode {
            identifier: self.identifier.clone(),
            label: self.label.clone(),
            is_executable,
            prf,
            device: Arc::clone(self) as Arc<dyn Device>,
        })
    }

    /// Launched components will no longer register back; used to drive
    /// registration timeouts.
    pub fn set_auto_register(&self, enabled: bool) {
        self.auto_register.store(enabled, Ordering::SeqCst);
    }

    pub fn set_usage_state(&self, state: UsageState) {
        *self.usage.lock().unwrap() = state;
    }

    pub fn depart(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    pub fn fail_load_of(&self, path: &str) {
        self.fail_load.lock().unwrap().insert(path.to_string());
    }

    pub fn set_fail_execute(&self, fail: bool) {
        self.fail_execute.store(fail, Ordering::SeqCst);
    }

    /// Registers the resource to hand back when the given component is
    /// launched on this device.
    pub fn script_resource(&self, component_id: &str, resource: Arc<MemoryResource>) {
        self.scripted_resources
            .lock()
            .unwrap()
            .insert(component_id.to_string(), resource);
    }

    pub fn loaded_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .loaded
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn unloaded_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().unloaded.clone()
    }

    pub fn executed(&self) -> Vec<ExecRecord> {
        self.state.lock().unwrap().executed.clone()
    }
}

fn parameter_str<'a>(parameters: &'a [Property], id: &str) -> Option<&'a str> {
    parameters
        .iter()
        .find(|property| property.id == id)
        .and_then(|property| property.value.as_simple())
        .and_then(|value| value.as_str())
}

impl Device for MemoryDevice {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn usage_state(&self) -> UsageState {
        *self.usage.lock().unwrap()
    }

    fn exists(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn load(
        &self,
        _source: &dyn ProfileSource,
        path: &str,
        code_type: CodeType,
    ) -> Result<(), DeviceError> {
        if self.fail_load.lock().unwrap().contains(path) {
            return Err(DeviceError::InvalidFile {
                path: path.to_string(),
                message: "scripted load failure".to_string(),
            });
        }
        self.state
            .lock()
            .unwrap()
            .loaded
            .push((path.to_string(), code_type));
        Ok(())
    }

    fn unload(&self, path: &str) -> Result<(), DeviceError> {
        if !self.exists() {
            return Err(DeviceError::Departed);
        }
        self.state.lock().unwrap().unloaded.push(path.to_string());
        Ok(())
    }

    fn execute(
        &self,
        entry_point: &str,
        _options: &[Property],
        parameters: &[Property],
    ) -> Result<Pid, DeviceError> {
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(DeviceError::ExecuteFailed {
                message: "scripted execute failure".to_string(),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().executed.push(ExecRecord {
            entry_point: entry_point.to_string(),
            pid,
            parameters: parameters.to_vec(),
        });

        if self.auto_register.load(Ordering::SeqCst)
            && let Some(component_id) = parameter_str(parameters, "COMPONENT_IDENTIFIER")
            && let Some(registrar) = parameter_str(parameters, "NAMING_CONTEXT_IOR")
            && let Some(application) = self.registrars.get(registrar)
        {
            let resource = self
                .scripted_resources
                .lock()
                .unwrap()
                .get(component_id)
                .cloned()
                .unwrap_or_else(|| MemoryResource::new(component_id));
            application.register(component_id, resource);
        }

        Ok(pid)
    }
}

fn prf_string<'a>(prf: &'a [Property], id: &str) -> Option<&'a str> {
    prf.iter()
        .find(|property| property.id == id)
        .and_then(|property| property.value.as_simple())
        .and_then(|value| value.as_str())
}

fn matches_deps(node: &DeviceNode, processor_deps: &[String], os_deps: &[OsDep]) -> bool {
    let processor_ok = processor_deps.is_empty()
        || prf_string(&node.prf, PROCESSOR_NAME)
            .is_some_and(|processor| processor_deps.iter().any(|dep| dep == processor));
    if !processor_ok {
        return false;
    }
    if os_deps.is_empty() {
        return true;
    }
    let Some(os_name) = prf_string(&node.prf, OS_NAME) else {
        return false;
    };
    let os_version = prf_string(&node.prf, OS_VERSION);
    os_deps.iter().any(|dep| {
        dep.name == os_name
            && match dep.version.as_deref() {
                Some(version) => os_version == Some(version),
                None => true,
            }
    })
}

#[derive(Default)]
struct AllocState {
    devices: Vec<Arc<DeviceNode>>,
    capacities: HashMap<String, BTreeMap<String, f64>>,
    live: HashMap<String, Vec<(String, String, f64)>>,
    next_id: u64,
    total_allocated: u64,
    total_deallocated: u64,
}

/// Capacity arbitration over the bench's registered devices.
///
/// Numeric PRF properties are consumable capacities; string and bool
/// properties must match the request exactly.
#[derive(Default)]
pub struct MemoryAllocationManager {
    state: Mutex<AllocState>,
}

impl MemoryAllocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, node: Arc<DeviceNode>) {
        let mut state = self.state.lock().unwrap();
        let capacities = node
            .prf
            .iter()
            .filter_map(|property| {
                property
                    .value
                    .as_simple()
                    .and_then(|value| value.as_f64())
                    .map(|capacity| (property.id.to_string(), capacity))
            })
            .collect();
        state
            .capacities
            .insert(node.identifier.to_string(), capacities);
        state.devices.push(node);
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn totals(&self) -> (u64, u64) {
        let state = self.state.lock().unwrap();
        (state.total_allocated, state.total_deallocated)
    }

    pub fn remaining(&self, device: &str, property: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .capacities
            .get(device)
            .and_then(|capacities| capacities.get(property))
            .copied()
    }

    fn try_allocate(
        state: &mut AllocState,
        node: &DeviceNode,
        properties: &[Property],
    ) -> Option<Vec<(String, String, f64)>> {
        let device_key = node.identifier.to_string();
        let mut consumed: Vec<(String, String, f64)> = Vec::new();
        for property in properties {
            match &property.value {
                PropertyValue::Simple(value) => {
                    if let Some(amount) = value.as_f64() {
                        let already: f64 = consumed
                            .iter()
                            .filter(|(_, id, _)| id == property.id.as_str())
                            .map(|(_, _, used)| used)
                            .sum();
                        let remaining = state
                            .capacities
                            .get(&device_key)
                            .and_then(|capacities| capacities.get(property.id.as_str()))
                            .copied();
                        match remaining {
                            Some(capacity) if capacity - already >= amount => {
                                consumed.push((device_key.clone(), property.id.to_string(), amount));
                            }
                            _ => return None,
                        }
                    } else {
                        // Exact match for string and bool requests.
                        let matches = node
                            .prf
                            .iter()
                            .filter(|candidate| candidate.id == property.id)
                            .any(|candidate| candidate.value == property.value);
                        if !matches {
                            return None;
                        }
                    }
                }
                // Structured requests are satisfied by presence.
                _ => {
                    if !node.prf.iter().any(|candidate| candidate.id == property.id) {
                        return None;
                    }
                }
            }
        }

        for (device, property, amount) in &consumed {
            if let Some(capacity) = state
                .capacities
                .get_mut(device)
                .and_then(|capacities| capacities.get_mut(property))
            {
                *capacity -= amount;
            }
        }
        Some(consumed)
    }

    fn commit(state: &mut AllocState, consumed: Vec<(String, String, f64)>) -> AllocationId {
        state.next_id += 1;
        state.total_allocated += 1;
        let id = format!("alloc_{}", state.next_id);
        state.live.insert(id.clone(), consumed);
        AllocationId::from(id)
    }
}

impl AllocationManager for MemoryAllocationManager {
    fn allocate_deployment(
        &self,
        request_id: &str,
        properties: &[Property],
        candidates: &[Arc<DeviceNode>],
        processor_deps: &[String],
        os_deps: &[OsDep],
    ) -> Option<(AllocationId, Arc<DeviceNode>)> {
        let mut state = self.state.lock().unwrap();
        for candidate in candidates {
            if candidate.device.usage_state() == UsageState::Busy {
                continue;
            }
            if !matches_deps(candidate, processor_deps, os_deps) {
                continue;
            }
            if let Some(consumed) = Self::try_allocate(&mut state, candidate, properties) {
                let id = Self::commit(&mut state, consumed);
                debug!(request_id, allocation = %id, device = %candidate.identifier, "deployment allocated");
                return Some((id, Arc::clone(candidate)));
            }
        }
        None
    }

    fn allocate(&self, requests: &[UsesRequest]) -> Vec<UsesResponse> {
        let mut state = self.state.lock().unwrap();
        let devices = state.devices.clone();
        let mut responses = Vec::new();
        for request in requests {
            for device in &devices {
                if device.device.usage_state() == UsageState::Busy {
                    continue;
                }
                if let Some(consumed) = Self::try_allocate(&mut state, device, &request.properties)
                {
                    let id = Self::commit(&mut state, consumed);
                    responses.push(UsesResponse {
                        request_id: request.request_id.clone(),
                        allocation_id: id,
                        device: Arc::clone(device),
                    });
                    break;
                }
            }
        }
        responses
    }

    fn deallocate(&self, ids: &[AllocationId]) {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            let Some(consumed) = state.live.remove(id.as_str()) else {
                continue;
            };
            state.total_deallocated += 1;
            for (device, property, amount) in consumed {
                if let Some(capacity) = state
                    .capacities
                    .get_mut(&device)
                    .and_then(|capacities| capacities.get_mut(&property))
                {
                    *capacity += amount;
                }
            }
        }
    }
}

enum MemoryBinding {
    Object(ObjRef),
    Context(Arc<MemoryNaming>),
}

/// One level of an in-process naming hierarchy.
pub struct MemoryNaming {
    path: String,
    entries: Mutex<BTreeMap<String, MemoryBinding>>,
    destroyed: AtomicBool,
}

impl MemoryNaming {
    pub fn root(name: &str) -> Arc<Self> {
        Arc::new(Self {
            path: name.to_string(),
            entries: Mutex::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn bound_names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn child(&self, name: &str) -> Option<Arc<MemoryNaming>> {
        match self.entries.lock().unwrap().get(name) {
            Some(MemoryBinding::Context(context)) => Some(Arc::clone(context)),
            _ => None,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<(), NamingError> {
        if self.is_destroyed() {
            return Err(NamingError::Destroyed);
        }
        Ok(())
    }
}

impl NamingContext for MemoryNaming {
    fn bind(&self, name: &str, object: ObjRef) -> Result<(), NamingError> {
        self.check_alive()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            return Err(NamingError::AlreadyBound {
                name: name.to_string(),
            });
        }
        entries.insert(name.to_string(), MemoryBinding::Object(object));
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<ObjRef, NamingError> {
        self.check_alive()?;
        match self.entries.lock().unwrap().get(name) {
            Some(MemoryBinding::Object(object)) => Ok(object.clone()),
            Some(MemoryBinding::Context(context)) => {
                Ok(ObjRef::from(format!("context:{}", context.path)))
            }
            None => Err(NamingError::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn bind_new_context(&self, name: &str) -> Result<Arc<dyn NamingContext>, NamingError> {
        self.check_alive()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            return Err(NamingError::AlreadyBound {
                name: name.to_string(),
            });
        }
        let context = Arc::new(MemoryNaming {
            path: format!("{}/{name}", self.path),
            entries: Mutex::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
        });
        entries.insert(name.to_string(), MemoryBinding::Context(Arc::clone(&context)));
        Ok(context)
    }

    fn unbind(&self, name: &str) -> Result<(), NamingError> {
        self.check_alive()?;
        self.entries
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NamingError::NotFound {
                name: name.to_string(),
            })
    }

    fn unbind_all(&self) -> Result<(), NamingError> {
        self.check_alive()?;
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    fn destroy(&self) -> Result<(), NamingError> {
        self.check_alive()?;
        if !self.entries.lock().unwrap().is_empty() {
            return Err(NamingError::NotEmpty);
        }
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connection resolution that synthesizes endpoint references, with
/// per-connection scripted failures.
#[derive(Default)]
pub struct MemoryConnections {
    failing: Mutex<BTreeSet<String>>,
}

impl MemoryConnections {
    pub fn fail_connection(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }
}

impl ConnectionResolver for MemoryConnections {
    fn resolve(
        &self,
        connection: &Connection,
        base_context: &str,
    ) -> Result<ConnectionNode, ConnectionError> {
        if self.failing.lock().unwrap().contains(connection.id.as_str()) {
            return Err(ConnectionError {
                id: connection.id.clone(),
                message: "scripted connection failure".to_string(),
            });
        }
        Ok(ConnectionNode {
            id: connection.id.clone(),
            uses: ObjRef::from(format!(
                "{base_context}/{}/{}",
                connection.uses.component, connection.uses.port
            )),
            provides: ObjRef::from(format!(
                "{base_context}/{}/{}",
                connection.provides.component, connection.provides.port
            )),
        })
    }
}

struct DomainState {
    devices: Vec<Arc<DeviceNode>>,
    last_device: Option<DeviceId>,
    binding_timeout: Duration,
    logging_config_uri: Option<String>,
    applications: Vec<Arc<dyn Application>>,
    events: Vec<String>,
}

/// The bench domain: wires devices, files, naming, allocation, and
/// connection resolution together behind the [`Domain`] seam.
pub struct MemoryDomain {
    name: String,
    files: Arc<MemoryFiles>,
    registrars: Arc<RegistrarTable>,
    allocation: Arc<MemoryAllocationManager>,
    naming: Arc<MemoryNaming>,
    connections: Arc<MemoryConnections>,
    created: Mutex<Vec<Arc<MemoryApplication>>>,
    state: Mutex<DomainState>,
}

impl MemoryDomain {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            files: Arc::new(MemoryFiles::new()),
            registrars: Arc::new(RegistrarTable::default()),
            allocation: Arc::new(MemoryAllocationManager::new()),
            naming: MemoryNaming::root(name),
            connections: Arc::new(MemoryConnections::default()),
            created: Mutex::new(Vec::new()),
            state: Mutex::new(DomainState {
                devices: Vec::new(),
                last_device: None,
                binding_timeout: Duration::from_secs(60),
                logging_config_uri: None,
                applications: Vec::new(),
                events: Vec::new(),
            }),
        })
    }

    pub fn registrars(&self) -> Arc<RegistrarTable> {
        Arc::clone(&self.registrars)
    }

    pub fn files(&self) -> Arc<MemoryFiles> {
        Arc::clone(&self.files)
    }

    pub fn allocation(&self) -> Arc<MemoryAllocationManager> {
        Arc::clone(&self.allocation)
    }

    pub fn naming(&self) -> Arc<MemoryNaming> {
        Arc::clone(&self.naming)
    }

    pub fn connections(&self) -> Arc<MemoryConnections> {
        Arc::clone(&self.connections)
    }

    pub fn add_device(&self, node: Arc<DeviceNode>) {
        self.allocation.add_device(Arc::clone(&node));
        self.state.lock().unwrap().devices.push(node);
    }

    pub fn set_component_binding_timeout(&self, timeout: Duration) {
        self.state.lock().unwrap().binding_timeout = timeout;
    }

    pub fn set_logging_config_uri(&self, uri: Option<String>) {
        self.state.lock().unwrap().logging_config_uri = uri;
    }

    pub fn applications(&self) -> Vec<Arc<dyn Application>> {
        self.state.lock().unwrap().applications.clone()
    }

    /// Concrete handles to every application servant this domain has
    /// created, including ones whose creation later failed.
    pub fn created_applications(&self) -> Vec<Arc<MemoryApplication>> {
        self.created.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

impl Domain for MemoryDomain {
    fn domain_name(&self) -> String {
        self.name.clone()
    }

    fn registered_devices(&self) -> Vec<Arc<DeviceNode>> {
        self.state.lock().unwrap().devices.clone()
    }

    fn last_device_used(&self) -> Option<DeviceId> {
        self.state.lock().unwrap().last_device.clone()
    }

    fn set_last_device_used(&self, device: DeviceId) {
        self.state.lock().unwrap().last_device = Some(device);
    }

    fn component_binding_timeout(&self) -> Duration {
        self.state.lock().unwrap().binding_timeout
    }

    fn logging_config_uri(&self) -> Option<String> {
        self.state.lock().unwrap().logging_config_uri.clone()
    }

    fn file_system_ref(&self) -> ObjRef {
        ObjRef::from(format!("fs:{}", self.name))
    }

    fn profile_source(&self) -> Arc<dyn ProfileSource> {
        Arc::clone(&self.files) as Arc<dyn ProfileSource>
    }

    fn allocation_manager(&self) -> Arc<dyn AllocationManager> {
        Arc::clone(&self.allocation) as Arc<dyn AllocationManager>
    }

    fn naming_context(&self) -> Arc<dyn NamingContext> {
        Arc::clone(&self.naming) as Arc<dyn NamingContext>
    }

    fn connection_resolver(&self) -> Arc<dyn ConnectionResolver> {
        Arc::clone(&self.connections) as Arc<dyn ConnectionResolver>
    }

    fn new_application(
        &self,
        spec: ApplicationSpec,
        context: Arc<dyn NamingContext>,
    ) -> Arc<dyn Application> {
        let application = MemoryApplication::new(spec, context);
        self.registrars
            .insert(&application.app_registrar(), Arc::clone(&application));
        self.created.lock().unwrap().push(Arc::clone(&application));
        application
    }

    fn add_application(&self, application: Arc<dyn Application>) -> Result<(), RegistryError> {
        self.state.lock().unwrap().applications.push(application);
        Ok(())
    }

    fn publish_application_added(&self, identifier: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("APPLICATION_ADDED {identifier} {name}"));
    }
}
