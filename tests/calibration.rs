//! End-to-end calibration runs against an in-memory register space

use std::time::Duration;

use timing_calib::bus::MemoryBus;
use timing_calib::core::{
    DelayParameters, DesignConfig, EndpointAddress, EndpointCalibration, Error, MuxChannel,
    SfpRestore,
};
use timing_calib::design::DesignRegistry;
use timing_calib::master::{ENDPOINT_READY, SFP_TX_ENABLE};
use tokio_util::sync::CancellationToken;

const SFP: &str = "master.acmd.sfp.csr.ctrl.tx";
const MUX: &str = "io.csr.ctrl.mux";
const EP_STAT: &str = "master.upstream.csr.stat.ep_stat";
const DELAY_LEAVES: [&str; 3] = [
    "master.acmd.csr.ctrl.cdel",
    "master.acmd.csr.ctrl.fdel",
    "master.acmd.csr.ctrl.pdel",
];

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn mux_config() -> DesignConfig {
    serde_json::from_value(serde_json::json!({
        "family": "master-mux",
        "endpoints": [
            { "id": "crp-3", "address": 3, "delay": { "coarse": 4, "fine": 5, "phase": 6 }, "mux_channel": 3 },
            { "id": "crp-5", "address": 5, "delay": { "coarse": 7, "fine": 8, "phase": 9 }, "mux_channel": 5 }
        ]
    }))
    .unwrap()
}

/// Fan-out where only `live` channels lock and every echo returns after 500 ticks
fn crate_with_live_channels(live: &'static [u32]) -> MemoryBus {
    let mut bus = MemoryBus::new();
    bus.on_write(MUX, move |channel, regs| {
        let state = if live.contains(&channel) { ENDPOINT_READY } else { 0x2 };
        regs.insert(EP_STAT.to_string(), state);
    });
    bus.set("master.echo.csr.stat.rx_done", 1);
    bus.set("master.echo.csr.tx_h", 0);
    bus.set("master.echo.csr.tx_l", 1000);
    bus.set("master.echo.csr.rx_h", 0);
    bus.set("master.echo.csr.rx_l", 1500);
    bus
}

fn delay_writes(bus: &MemoryBus) -> usize {
    DELAY_LEAVES.iter().map(|leaf| bus.writes_to(leaf).len()).sum()
}

#[tokio::test(start_paused = true)]
async fn test_scan_then_calibrate_live_channels() {
    init_logging();
    let design = DesignRegistry::default().build(&mux_config()).unwrap();
    let mut bus = crate_with_live_channels(&[1, 3, 5]);
    let cancel = CancellationToken::new();

    let report = design.scan_sfp_mux(&mut bus, &cancel).await.unwrap();
    assert_eq!(report.locked, vec![MuxChannel(1), MuxChannel(3), MuxChannel(5)]);
    assert_eq!(report.skipped.len(), 5);

    let calibration = design.calibration();
    for endpoint in &design.config().endpoints {
        bus.clear_journal();
        let rtt = calibration
            .apply_endpoint_config(&mut bus, endpoint, true, &cancel)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rtt.round_trip_ticks, 500);
        let address = endpoint.address.value();
        assert_eq!(
            bus.writes_to(SFP),
            vec![0, address | SFP_TX_ENABLE, address]
        );
        assert_eq!(delay_writes(&bus), 3);
    }
}

#[tokio::test(start_paused = true)]
async fn test_direct_calibration_write_counts() {
    init_logging();
    let config = DesignConfig {
        family: "ouroboros".to_string(),
        ..Default::default()
    };
    let design = DesignRegistry::default().build(&config).unwrap();
    let mut bus = crate_with_live_channels(&[]);
    bus.set(EP_STAT, ENDPOINT_READY);

    let rtt = design
        .apply_endpoint_delay(
            &mut bus,
            EndpointAddress(0x21),
            DelayParameters::new(1, 2, 3),
            true,
            true,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(rtt.map(|r| r.round_trip_ticks), Some(500));
    assert_eq!(bus.writes_to(SFP).len(), 2);
    assert_eq!(delay_writes(&bus), 3);
}

#[tokio::test(start_paused = true)]
async fn test_apply_without_measurement_is_repeatable() {
    let design = DesignRegistry::default().build(&mux_config()).unwrap();
    let cancel = CancellationToken::new();
    let mut runs = Vec::new();

    for _ in 0..2 {
        let mut bus = crate_with_live_channels(&[3]);
        design
            .apply_endpoint_delay(
                &mut bus,
                EndpointAddress(3),
                DelayParameters::new(4, 5, 6),
                false,
                true,
                Some(MuxChannel(3)),
                &cancel,
            )
            .await
            .unwrap();
        assert!(bus.writes_to(SFP).is_empty());
        runs.push(bus.write_log());
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test(start_paused = true)]
async fn test_always_restore_policy_from_config() {
    let mut config = mux_config();
    config.sfp_restore = SfpRestore::Always;
    let design = DesignRegistry::default().build(&config).unwrap();
    let mut bus = crate_with_live_channels(&[3]);

    design
        .apply_endpoint_delay(
            &mut bus,
            EndpointAddress(3),
            DelayParameters::new(4, 5, 6),
            false,
            true,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(bus.writes_to(SFP), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_echo_timeout_budget() {
    let config = DesignConfig {
        family: "master".to_string(),
        echo_timeout: Duration::from_millis(300),
        ..Default::default()
    };
    let design = DesignRegistry::default().build(&config).unwrap();
    let mut bus = MemoryBus::new();

    let err = design
        .measure_endpoint_rtt(
            &mut bus,
            EndpointAddress(1),
            false,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EchoTimeout { timeout_ms: 300 }));
    let polls = bus.reads_of("master.echo.csr.stat.rx_done");
    assert!((3..=4).contains(&polls), "polled {} times", polls);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_measurement() {
    let design = DesignRegistry::default()
        .build(&DesignConfig::default())
        .unwrap();
    let mut bus = MemoryBus::new();
    let cancel = CancellationToken::new();

    let child = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        child.cancel();
    });

    let err = design
        .measure_endpoint_rtt(&mut bus, EndpointAddress(1), false, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_configure_applies_stored_endpoints() {
    let design = DesignRegistry::default().build(&mux_config()).unwrap();
    let mut bus = crate_with_live_channels(&[]);

    let written = design
        .configure(&mut bus, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(bus.value("master.tstamp.ctr.set_l"), Some(written.low()));
    assert_eq!(bus.writes_to("master.acmd.csr.ctrl.addr"), vec![3, 5]);
    assert_eq!(bus.writes_to("master.acmd.csr.ctrl.cdel"), vec![4, 7]);
    assert!(bus.writes_to(MUX).is_empty());
    assert!(bus.writes_to(SFP).is_empty());
}

#[test]
fn test_endpoint_config_shape() {
    let config = mux_config();
    let endpoint: &EndpointCalibration = &config.endpoints[0];
    assert_eq!(endpoint.address, EndpointAddress(3));
    assert_eq!(endpoint.delay, DelayParameters::new(4, 5, 6));
    assert_eq!(endpoint.mux_channel, Some(MuxChannel(3)));
}
