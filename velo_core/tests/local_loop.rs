//! Single-board loop on the simulated plant: no transport at all.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use velo_core::{
    Gains, LocalLoop, PiController, ReferenceGenerator, ResetPolicy, Timing, VelocityEstimator,
};
use velo_hardware::SimPlant;
use velo_hardware::sim::PlantParams;

#[test]
fn local_loop_tracks_reference_on_simulated_plant() {
    let timing = Timing {
        control_period: Duration::from_millis(10),
        reference_period: Duration::from_secs(60),
        ..Timing::default()
    };
    let plant = SimPlant::new(PlantParams::default());
    let mut local = LocalLoop::new(
        plant.encoder(),
        plant.motor(),
        VelocityEstimator::default(),
        PiController::new(Gains::default()),
        ReferenceGenerator::new(2000, ResetPolicy::ResetOnConnect),
        timing,
    )
    .unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let observed = Arc::clone(&shutdown);
    let watcher_plant = plant.clone();
    let watcher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(2000));
        let rpm = watcher_plant.rpm();
        observed.store(true, Ordering::Relaxed);
        rpm
    });

    let stats = local.run(&shutdown).unwrap();
    let rpm = watcher.join().unwrap();

    assert!(rpm > 800.0 && rpm < 3000.0, "rpm {rpm}");
    assert!(stats.steps >= 50, "steps {}", stats.steps);
    assert_eq!(stats.toggles, 0);
    assert!(!plant.is_enabled());
    assert_eq!(plant.last_command(), 0);
    assert!(!local.controller().is_initialized());
}
