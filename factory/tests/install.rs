//! Factory construction validates the assembly before any create.

mod support;

use std::sync::Arc;

use sideband_assembly::{ExternalPort, ExternalProperty, PortKind, PropertyDef, PropertyKind,
    PropertyValue, SimpleValue};
use sideband_factory::{ApplicationFactory, Error};
use support::*;

fn write_descriptors(
    domain: &Arc<sideband_platform::memory::MemoryDomain>,
    assembly: &sideband_assembly::SoftwareAssembly,
    package: &sideband_assembly::SoftPkg,
) -> String {
    let files = domain.files();
    files.insert(
        package.spd_path.clone(),
        serde_json::to_string(package).unwrap(),
    );
    let sad_path = format!("/waveforms/{}.sad.json", assembly.name);
    files.insert(
        sad_path.clone(),
        serde_json::to_string(assembly).unwrap(),
    );
    sad_path
}

#[test]
fn installation_rejects_duplicate_external_port_aliases() {
    let domain = domain();
    let package = softpkg("plot", vec![executable_impl("cpp", &[], &[])]);
    let mut assembly = single_component_assembly(&package, "plot_1");
    assembly.external_ports = vec![
        ExternalPort {
            component: "plot_1".into(),
            port: "data_out".to_string(),
            external_name: Some("out".to_string()),
            kind: PortKind::Uses,
        },
        ExternalPort {
            component: "plot_1".into(),
            port: "out".to_string(),
            external_name: None,
            kind: PortKind::Provides,
        },
    ];
    let sad_path = write_descriptors(&domain, &assembly, &package);

    let err = ApplicationFactory::new(&sad_path, domain.clone()).unwrap_err();
    assert!(matches!(
        err,
        Error::Assembly(sideband_assembly::Error::DuplicateExternalPort { .. })
    ));
}

#[test]
fn installation_rejects_external_properties_shadowing_the_controller() {
    let domain = domain();
    let package = sideband_assembly::SoftPkg::builder()
        .id("DCE:plot")
        .name("plot")
        .spd_path("/components/plot/plot.spd.json")
        .properties(vec![PropertyDef::new(
            "gain",
            PropertyValue::Simple(SimpleValue::Double(1.0)),
            PropertyKind::Configure,
        )])
        .implementations(vec![executable_impl("cpp", &[], &[])])
        .build();
    let mut assembly = single_component_assembly(&package, "plot_1");
    // The effective external id collides with the controller's own
    // `gain` property.
    assembly.external_properties = vec![ExternalProperty {
        component: "plot_1".into(),
        property: "gain".into(),
        external_id: None,
    }];
    let sad_path = write_descriptors(&domain, &assembly, &package);

    let err = ApplicationFactory::new(&sad_path, domain.clone()).unwrap_err();
    assert!(matches!(
        err,
        Error::Assembly(sideband_assembly::Error::ControllerPropertyClash { .. })
    ));
}

#[test]
fn installation_fails_when_a_referenced_package_is_missing() {
    let domain = domain();
    let package = softpkg("plot", vec![executable_impl("cpp", &[], &[])]);
    let assembly = single_component_assembly(&package, "plot_1");

    // Only the assembly lands in the file space; the package is absent.
    let sad_path = format!("/waveforms/{}.sad.json", assembly.name);
    domain
        .files()
        .insert(sad_path.clone(), serde_json::to_string(&assembly).unwrap());

    let err = ApplicationFactory::new(&sad_path, domain.clone()).unwrap_err();
    assert!(matches!(err, Error::Assembly(sideband_assembly::Error::Io(_))));
}
