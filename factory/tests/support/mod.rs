//! Shared bench wiring for the deployment suite.
#![allow(dead_code)]

use std::sync::Arc;

use sideband_assembly::{
    Code, ComponentPlacement, Implementation, Instantiation, OS_NAME, OsDep, PROCESSOR_NAME,
    Property, SimpleValue, SoftPkg, SoftwareAssembly,
};
use sideband_factory::ApplicationFactory;
use sideband_platform::memory::{MemoryDevice, MemoryDomain};
use sideband_platform::Domain;

pub fn domain() -> Arc<MemoryDomain> {
    MemoryDomain::new("SB_TEST")
}

pub fn x86_prf(extra: Vec<Property>) -> Vec<Property> {
    let mut prf = vec![
        Property::simple(PROCESSOR_NAME, SimpleValue::Str("x86_64".into())),
        Property::simple(OS_NAME, SimpleValue::Str("Linux".into())),
    ];
    prf.extend(extra);
    prf
}

pub fn arm_prf(extra: Vec<Property>) -> Vec<Property> {
    let mut prf = vec![
        Property::simple(PROCESSOR_NAME, SimpleValue::Str("armv8".into())),
        Property::simple(OS_NAME, SimpleValue::Str("Linux".into())),
    ];
    prf.extend(extra);
    prf
}

pub fn add_device(
    domain: &Arc<MemoryDomain>,
    id: &str,
    prf: Vec<Property>,
) -> Arc<MemoryDevice> {
    let device = MemoryDevice::new(id, id, &domain.registrars());
    domain.add_device(device.node(prf, true));
    device
}

/// An implementation with an executable artifact named after its id.
pub fn executable_impl(id: &str, processors: &[&str], os: &[&str]) -> Implementation {
    Implementation::builder()
        .id(id)
        .code(Code::executable(format!("{id}.bin"), id))
        .processor_deps(processors.iter().map(|p| p.to_string()).collect())
        .os_deps(os.iter().map(|name| OsDep::new(*name)).collect())
        .build()
}

pub fn softpkg(name: &str, implementations: Vec<Implementation>) -> SoftPkg {
    SoftPkg::builder()
        .id(format!("DCE:{name}"))
        .name(name)
        .spd_path(format!("/components/{name}/{name}.spd.json"))
        .implementations(implementations)
        .build()
}

pub fn placement(name: &str, instance: &str) -> ComponentPlacement {
    ComponentPlacement::new(
        name,
        vec![
            Instantiation::builder()
                .id(instance)
                .naming_service_name(instance)
                .build(),
        ],
    )
}

/// Writes the descriptors into the domain's file space and installs the
/// factory, as the domain manager would on application installation.
pub fn install(
    domain: &Arc<MemoryDomain>,
    assembly: &SoftwareAssembly,
    packages: &[&SoftPkg],
) -> ApplicationFactory {
    let files = domain.files();
    for package in packages {
        files.insert(
            package.spd_path.clone(),
            serde_json::to_string(package).expect("package serializes"),
        );
    }
    let sad_path = format!("/waveforms/{}/{}.sad.json", assembly.name, assembly.name);
    files.insert(
        sad_path.clone(),
        serde_json::to_string(assembly).expect("assembly serializes"),
    );
    ApplicationFactory::new(&sad_path, Arc::clone(domain) as Arc<dyn Domain>).expect("factory installs")
}

/// A one-component assembly whose only instantiation is the assembly
/// controller.
pub fn single_component_assembly(package: &SoftPkg, instance: &str) -> SoftwareAssembly {
    SoftwareAssembly::builder()
        .id(format!("DCE:{}_waveform", package.name))
        .name(format!("{}_waveform", package.name))
        .files([(package.name.clone(), package.spd_path.clone())].into())
        .placements(vec![placement(&package.name, instance)])
        .assembly_controller(instance)
        .build()
}
