//! Concurrent `create` calls share nothing but the name-binding lock.

mod support;

use std::{sync::Arc, thread};

use support::*;

#[test]
fn concurrent_creates_never_collide_on_a_waveform_name() {
    let domain = domain();
    add_device(&domain, "dev_1", x86_prf(vec![]));

    let package = softpkg("plot", vec![executable_impl("cpp", &[], &[])]);
    let assembly = single_component_assembly(&package, "plot_1");
    let factory = Arc::new(install(&domain, &assembly, &[&package]));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                factory
                    .create("wave", &[], &[])
                    .map(|application| application.identifier())
            })
        })
        .collect();

    let mut identifiers: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread completes").expect("create succeeds"))
        .collect();
    identifiers.sort();

    assert_eq!(
        identifiers,
        ["DCE:plot_waveform:wave_1", "DCE:plot_waveform:wave_2"]
    );
    assert_eq!(domain.applications().len(), 2);
}
