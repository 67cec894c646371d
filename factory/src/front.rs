use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use sideband_assembly::{DeviceId, InstanceId, Property, PropertyId, SoftPkg, SoftwareAssembly};
use sideband_platform::{Application, Domain};
use tracing::{debug, error, info, trace};

use crate::{error::Error, pipeline::CreateContext};

/// One factory per installed assembly.
///
/// Construction loads the assembly and every referenced software
/// package through the domain's profile source and validates the
/// assembly's structural invariants. `create` may be called from any
/// number of threads; only waveform-name probing and context binding
/// are serialized.
pub struct ApplicationFactory {
    profile_path: String,
    identifier: String,
    name: String,
    domain: Arc<dyn Domain>,
    assembly: Arc<SoftwareAssembly>,
    profiles: Arc<BTreeMap<String, SoftPkg>>,
    last_unique_id: Mutex<u64>,
    pending_create: Mutex<()>,
}

impl std::fmt::Debug for ApplicationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationFactory")
            .field("profile_path", &self.profile_path)
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .field("assembly", &self.assembly)
            .field("profiles", &self.profiles)
            .finish_non_exhaustive()
    }
}

impl ApplicationFactory {
    pub fn new(profile_path: &str, domain: Arc<dyn Domain>) -> Result<Self, Error> {
        let source = domain.profile_source();
        let assembly = SoftwareAssembly::load(profile_path, source.as_ref())?;
        debug!(assembly = %assembly.id, name = %assembly.name, "installing application factory");

        let mut profiles = BTreeMap::new();
        for (file_ref, spd_path) in &assembly.files {
            let profile = SoftPkg::load(spd_path, source.as_ref())?;
            profiles.insert(file_ref.clone(), profile);
        }

        // External property aliases must not shadow the assembly
        // controller's own property surface.
        let controller_properties: Vec<PropertyId> = assembly
            .assembly_controller
            .as_ref()
            .and_then(|controller| {
                assembly.placements.iter().find(|placement| {
                    placement
                        .instantiations
                        .iter()
                        .any(|instantiation| instantiation.id == *controller)
                })
            })
            .and_then(|placement| profiles.get(&placement.file_ref))
            .map(|profile| profile.property_ids().cloned().collect())
            .unwrap_or_default();
        assembly.validate(&controller_properties)?;

        Ok(Self {
            profile_path: profile_path.to_string(),
            identifier: assembly.id.clone(),
            name: assembly.name.clone(),
            domain,
            assembly: Arc::new(assembly),
            profiles: Arc::new(profiles),
            last_unique_id: Mutex::new(0),
            pending_create: Mutex::new(()),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn software_profile(&self) -> &str {
        &self.profile_path
    }

    /// Instantiates the assembly as a new application.
    ///
    /// `init_config` overrides assembly-controller and promoted external
    /// properties; `device_assignments` pins components to devices. Any
    /// failure after the waveform context is bound unwinds every side
    /// effect before the error is returned.
    pub fn create(
        &self,
        name: &str,
        init_config: &[Property],
        device_assignments: &[(InstanceId, DeviceId)],
    ) -> Result<Arc<dyn Application>, Error> {
        info!(application = name, "creating application");

        // Name probing and context binding are the only mutually
        // exclusive section; concurrent creates must not collide on the
        // same waveform name.
        let (waveform_name, waveform_context) = {
            let _guard = lock(&self.pending_create);
            let waveform_name = self.next_waveform_context_name(name);
            trace!(context = %waveform_name, "binding new waveform context");
            let context = self
                .domain
                .naming_context()
                .bind_new_context(&waveform_name)
                .map_err(|source| Error::NameBindingFailed {
                    name: waveform_name.clone(),
                    source,
                })?;
            (waveform_name, context)
        };

        let mut pipeline = CreateContext::new(
            Arc::clone(&self.domain),
            Arc::clone(&self.assembly),
            Arc::clone(&self.profiles),
            self.profile_path.clone(),
            waveform_name,
            waveform_context,
        );
        match pipeline.run(name, init_config, device_assignments) {
            Ok(application) => Ok(application),
            Err(cause) => {
                error!(%cause, "application creation failed");
                pipeline.unwind();
                Err(cause)
            }
        }
    }

    /// Probes `<name>_<serial>` against the domain context until an
    /// unused name is found. The serial never revisits zero. Callers
    /// hold the pending-create lock.
    fn next_waveform_context_name(&self, name: &str) -> String {
        let mut serial = lock(&self.last_unique_id);
        let context = self.domain.naming_context();
        loop {
            *serial = serial.wrapping_add(1);
            if *serial == 0 {
                *serial = 1;
            }
            let candidate = format!("{name}_{serial}");
            if !context.is_bound(&candidate) {
                return candidate;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
