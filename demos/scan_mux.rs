use timing_calib::bus::MemoryBus;
use timing_calib::core::{DelayParameters, DesignConfig, EndpointAddress};
use timing_calib::design::DesignRegistry;
use timing_calib::master::ENDPOINT_READY;
use tokio_util::sync::CancellationToken;

/// Simulated fan-out crate: channels 2 and 6 carry a live endpoint
fn simulated_crate() -> MemoryBus {
    let mut bus = MemoryBus::new();
    bus.on_write("io.csr.ctrl.mux", |channel, regs| {
        let state = if channel == 2 || channel == 6 { ENDPOINT_READY } else { 0x1 };
        regs.insert("master.upstream.csr.stat.ep_stat".to_string(), state);
    });
    bus.set("master.echo.csr.stat.rx_done", 1);
    bus.set("master.echo.csr.tx_l", 20_000);
    bus.set("master.echo.csr.rx_l", 20_731);
    bus
}

#[tokio::main]
async fn main() -> timing_calib::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = DesignConfig {
        family: "master-mux".to_string(),
        ..Default::default()
    };
    let design = DesignRegistry::default().build(&config)?;
    let mut bus = simulated_crate();
    let cancel = CancellationToken::new();

    println!("Scanning {} mux channels...", config.mux_channel_count);
    let report = design.scan_sfp_mux(&mut bus, &cancel).await?;
    for failure in &report.skipped {
        println!("- channel {}: {}", failure.channel, failure.reason);
    }

    for (index, channel) in report.locked.iter().enumerate() {
        let address = EndpointAddress::new(index as u32 + 1)?;
        let rtt = design
            .apply_endpoint_delay(
                &mut bus,
                address,
                DelayParameters::new(3, 0, 0),
                true,
                true,
                Some(*channel),
                &cancel,
            )
            .await?;
        if let Some(rtt) = rtt {
            println!(
                "Channel {} endpoint {}: RTT {} ticks",
                channel, address, rtt.round_trip_ticks
            );
        }
    }

    Ok(())
}
