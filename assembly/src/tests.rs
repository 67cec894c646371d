use crate::{
    Code, ComponentPlacement, Error, ExternalPort, ExternalProperty, HostCollocation,
    Implementation, Instantiation, PortKind, Property, PropertyId, SimpleValue, SoftPkg,
    SoftwareAssembly,
};

fn placement(file_ref: &str, instance: &str) -> ComponentPlacement {
    ComponentPlacement::new(
        file_ref,
        vec![
            Instantiation::builder()
                .id(instance)
                .naming_service_name(instance)
                .build(),
        ],
    )
}

fn assembly() -> SoftwareAssembly {
    SoftwareAssembly::builder()
        .id("DCE:wave")
        .name("wave")
        .files([("plot".to_string(), "/components/plot/plot.spd.json".to_string())].into())
        .placements(vec![placement("plot", "plot_1")])
        .assembly_controller("plot_1")
        .build()
}

#[test]
fn validates_a_minimal_assembly() {
    assembly().validate(&[]).unwrap();
}

#[test]
fn rejects_unknown_file_ref() {
    let mut sad = assembly();
    sad.placements.push(placement("missing", "missing_1"));
    let err = sad.validate(&[]).unwrap_err();
    let Error::UnknownFileRef { file_ref } = err else {
        panic!("expected UnknownFileRef, got {err:?}");
    };
    assert_eq!(file_ref, "missing");
}

#[test]
fn rejects_placement_without_instantiations() {
    let mut sad = assembly();
    sad.placements[0].instantiations.clear();
    let err = sad.validate(&[]).unwrap_err();
    assert!(matches!(err, Error::EmptyPlacement { .. }));
}

#[test]
fn rejects_duplicate_external_port_names() {
    let mut sad = assembly();
    sad.external_ports = vec![
        ExternalPort {
            component: "plot_1".into(),
            port: "data_in".to_string(),
            external_name: Some("input".to_string()),
            kind: PortKind::Provides,
        },
        ExternalPort {
            component: "plot_1".into(),
            port: "input".to_string(),
            external_name: None,
            kind: PortKind::Uses,
        },
    ];
    let err = sad.validate(&[]).unwrap_err();
    let Error::DuplicateExternalPort { name } = err else {
        panic!("expected DuplicateExternalPort, got {err:?}");
    };
    assert_eq!(name, "input");
}

#[test]
fn rejects_external_property_shadowing_the_controller() {
    let mut sad = assembly();
    sad.external_properties = vec![ExternalProperty {
        component: "plot_1".into(),
        property: "gain".into(),
        external_id: None,
    }];
    let controller_props: Vec<PropertyId> = vec!["gain".into()];
    let err = sad.validate(&controller_props).unwrap_err();
    assert!(matches!(err, Error::ControllerPropertyClash { .. }));

    // A non-clashing alias is fine.
    sad.external_properties[0].external_id = Some("plot_gain".into());
    sad.validate(&controller_props).unwrap();
}

#[test]
fn rejects_collocation_of_unknown_member() {
    let mut sad = assembly();
    sad.collocations = vec![HostCollocation {
        id: "group_1".into(),
        name: "pair".to_string(),
        members: vec!["plot_1".into(), "ghost_1".into()],
    }];
    let err = sad.validate(&[]).unwrap_err();
    let Error::UnknownCollocatedComponent { group, component } = err else {
        panic!("expected UnknownCollocatedComponent, got {err:?}");
    };
    assert_eq!(group, "group_1");
    assert_eq!(component, "ghost_1");
}

#[test]
fn assembly_round_trips_through_json() {
    let mut sad = assembly();
    sad.external_ports = vec![ExternalPort {
        component: "plot_1".into(),
        port: "data_in".to_string(),
        external_name: None,
        kind: PortKind::Provides,
    }];
    sad.uses_devices = vec![crate::UsesDevice::new(
        "uses_rf",
        vec![Property::simple("bandwidthCapacity", SimpleValue::Long(100))],
    )];
    sad.validate(&[]).unwrap();

    let text = serde_json::to_string(&sad).unwrap();
    let reloaded = SoftwareAssembly::from_json(&text).unwrap();
    assert_eq!(sad, reloaded);
}

#[test]
fn softpkg_round_trips_through_json() {
    let spd = SoftPkg::builder()
        .id("DCE:plot")
        .name("plot")
        .spd_path("/components/plot/plot.spd.json")
        .implementations(vec![
            Implementation::builder()
                .id("cpp_x86")
                .code(Code::executable("plot.bin", "plot"))
                .processor_deps(vec!["x86_64".to_string()])
                .build(),
        ])
        .build();

    let text = serde_json::to_string(&spd).unwrap();
    let reloaded: SoftPkg = serde_json::from_str(&text).unwrap();
    assert_eq!(spd, reloaded);
}

#[test]
fn implementation_device_matching() {
    let implementation = Implementation::builder()
        .id("cpp_x86")
        .code(Code::executable("plot.bin", "plot"))
        .processor_deps(vec!["x86_64".to_string()])
        .os_deps(vec![crate::OsDep::new("Linux")])
        .build();

    let prf = vec![
        Property::simple(crate::PROCESSOR_NAME, SimpleValue::Str("x86_64".into())),
        Property::simple(crate::OS_NAME, SimpleValue::Str("Linux".into())),
    ];
    assert!(implementation.matches_device(&prf));

    let arm = vec![
        Property::simple(crate::PROCESSOR_NAME, SimpleValue::Str("armv8".into())),
        Property::simple(crate::OS_NAME, SimpleValue::Str("Linux".into())),
    ];
    assert!(!implementation.matches_device(&arm));

    // Empty dependency lists constrain nothing.
    let unconstrained = Implementation::builder()
        .id("any")
        .code(Code::executable("plot.bin", "plot"))
        .build();
    assert!(unconstrained.matches_device(&[]));
}
