//! Both roles over real TCP on loopback, closing the loop on the simulated plant.
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use velo_core::{
    ComputeRole, Coordinator, Gains, PiController, ReferenceGenerator, ResetPolicy,
    SensorActuatorRole, SessionState, Timing, VelocityEstimator,
};
use velo_hardware::sim::PlantParams;
use velo_hardware::{SimPlant, TcpAcceptor, TcpConnector};

#[test]
fn sensor_and_compute_track_reference_over_tcp() {
    let timing = Timing {
        control_period: Duration::from_millis(20),
        reference_period: Duration::from_secs(60),
        connect_timeout: Duration::from_millis(200),
        backoff: Duration::from_millis(20),
    };

    let acceptor = TcpAcceptor::bind("127.0.0.1:0", Duration::from_millis(5)).unwrap();
    let addr = acceptor.local_addr().unwrap();

    let mut compute = Coordinator::builder()
        .role(ComputeRole::new(
            PiController::new(Gains::default()),
            ReferenceGenerator::new(2000, ResetPolicy::ResetOnConnect),
        ))
        .connector(acceptor)
        .timing(timing)
        .build()
        .unwrap();
    let compute_stop = compute.shutdown_handle();
    let compute_thread = thread::spawn(move || {
        compute.run().unwrap();
        compute
    });

    let plant = SimPlant::new(PlantParams::default());
    let role = SensorActuatorRole::new(
        plant.encoder(),
        plant.motor(),
        VelocityEstimator::default(),
    );
    let mut sensor = Coordinator::builder()
        .role(role)
        .connector(TcpConnector::new(addr.to_string()))
        .timing(timing)
        .build()
        .unwrap();
    let sensor_stop = sensor.shutdown_handle();
    let sensor_thread = thread::spawn(move || {
        sensor.run().unwrap();
        sensor
    });

    thread::sleep(Duration::from_millis(2500));
    let rpm = plant.rpm();
    assert!(rpm > 800.0 && rpm < 3000.0, "rpm {rpm}");

    sensor_stop.store(true, Ordering::Relaxed);
    let sensor = sensor_thread.join().unwrap();
    compute_stop.store(true, Ordering::Relaxed);
    let compute = compute_thread.join().unwrap();

    assert!(sensor.sessions() >= 1);
    assert!(compute.sessions() >= 1);
    assert_eq!(sensor.state(), SessionState::Disconnected);
    assert!(!plant.is_enabled());
    assert_eq!(plant.last_command(), 0);
    assert!(!compute.role().controller().is_initialized());
    assert_eq!(compute.role().reference().current(), 2000);
}
