//! Timing master blocks
//!
//! The master generates the authoritative timestamp, measures round trips to
//! its endpoints and programs their compensating delays:
//!
//! - [`TimestampSync`] reads and sets the 64-bit timestamp counter
//! - [`EchoMonitor`] runs the echo round-trip measurement
//! - [`SfpController`] switches endpoint transmitters
//! - [`UpstreamEndpoint`] waits for the return link to lock
//! - [`DelayController`] applies coarse/fine/phase delays
//! - [`FixedLengthCommandDispatcher`] emits fixed-length commands
//!
//! [`MasterNode`] bundles them as configured for one design.

mod command;
mod delay;
mod echo;
mod sfp;
mod timestamp;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::bus::{RegisterBlock, RegisterBus};
use crate::core::{
    DelayParameters, DesignConfig, EndpointAddress, Error, FixedLengthCommand, Result,
    RttMeasurement, TimestampWord,
};
use crate::design::{CommandCapable, DelayCapable, EchoCapable, SfpCapable, TimestampCapable};

pub use self::command::FixedLengthCommandDispatcher;
pub use self::delay::DelayController;
pub use self::echo::{EchoMonitor, EchoOptions, EchoRoundTrip, EchoState};
pub use self::sfp::{LockOptions, SfpController, UpstreamEndpoint, ENDPOINT_READY, SFP_TX_ENABLE};
pub use self::timestamp::TimestampSync;

/// Timing master as instantiated in one design
#[derive(Debug, Clone)]
pub struct MasterNode {
    timestamp: TimestampSync,
    echo: EchoMonitor,
    sfp: SfpController,
    delay: DelayController,
    commands: FixedLengthCommandDispatcher,
    upstream: Option<UpstreamEndpoint>,
    echo_options: EchoOptions,
    clock_hz: u64,
}

impl MasterNode {
    /// Builds the master from a design configuration.
    ///
    /// Only firmware with a return path carries an upstream endpoint.
    pub fn from_config(config: &DesignConfig, with_upstream: bool) -> Self {
        let registers = &config.registers;
        let upstream = with_upstream.then(|| {
            UpstreamEndpoint::new(
                RegisterBlock::new(registers.upstream.clone()),
                LockOptions {
                    timeout: config.lock_timeout,
                    poll_interval: config.poll_interval,
                },
            )
        });

        MasterNode {
            timestamp: TimestampSync::new(RegisterBlock::new(registers.timestamp.clone())),
            echo: EchoMonitor::new(RegisterBlock::new(registers.echo.clone())),
            sfp: SfpController::new(RegisterBlock::new(registers.sfp.clone())),
            delay: DelayController::new(RegisterBlock::new(registers.delay.clone())),
            commands: FixedLengthCommandDispatcher::new(
                RegisterBlock::new(registers.commands.clone()),
                config.command_channel_count,
            ),
            upstream,
            echo_options: EchoOptions {
                timeout: config.echo_timeout,
                poll_interval: config.poll_interval,
            },
            clock_hz: config.clock_frequency_hz,
        }
    }

    pub fn timestamp(&self) -> &TimestampSync {
        &self.timestamp
    }

    pub fn echo(&self) -> &EchoMonitor {
        &self.echo
    }

    pub fn sfp(&self) -> &SfpController {
        &self.sfp
    }

    pub fn delay(&self) -> &DelayController {
        &self.delay
    }

    pub fn commands(&self) -> &FixedLengthCommandDispatcher {
        &self.commands
    }

    pub fn upstream(&self) -> Option<&UpstreamEndpoint> {
        self.upstream.as_ref()
    }

    pub fn echo_options(&self) -> EchoOptions {
        self.echo_options
    }

    /// Measures the round trip to `address`.
    ///
    /// With `control_sfp` every other transmitter is switched off for the
    /// measurement and the target's is switched off again afterwards, also
    /// when the link fails to lock or the echo times out. When the design has
    /// an upstream endpoint it must lock before the echo is sent.
    pub async fn measure_endpoint_rtt(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        address.validate_target()?;

        if control_sfp {
            self.sfp.switch(bus, EndpointAddress::NONE, false)?;
            self.sfp.switch(bus, address, true)?;
            bus.dispatch()?;
        }

        let measured = self.lock_and_echo(bus, address, cancel).await;
        let rtt = match measured {
            Ok(rtt) => rtt,
            Err(e) if control_sfp && e.is_link_failure() => {
                self.release_sfp_after(bus, address, &e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if control_sfp {
            self.sfp.switch(bus, address, false)?;
            bus.dispatch()?;
        }
        Ok(rtt)
    }

    async fn lock_and_echo(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        if let Some(upstream) = &self.upstream {
            if !upstream.enable(bus, cancel).await? {
                return Err(Error::lock_failure(format!(
                    "upstream endpoint for {}",
                    address
                )));
            }
        }

        let rtt = self
            .echo
            .send_echo_and_measure_delay(bus, self.echo_options, cancel)
            .await?;
        tracing::info!("Endpoint {} RTT: {} ticks", address, rtt.round_trip_ticks);
        Ok(rtt)
    }

    /// Switches the target transmitter off after a failed measurement.
    ///
    /// The measurement error is what the caller reports, so a failure here
    /// is only logged.
    fn release_sfp_after(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        cause: &Error,
    ) {
        tracing::debug!("Switching off SFP for endpoint {} after: {}", address, cause);
        let released = self
            .sfp
            .switch(bus, address, false)
            .and_then(|()| bus.dispatch());
        if let Err(e) = released {
            tracing::warn!("SFP for endpoint {} left on: {}", address, e);
        }
    }
}

impl TimestampCapable for MasterNode {
    fn read_master_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord> {
        self.timestamp.read_timestamp(bus)
    }

    fn sync_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord> {
        self.timestamp.sync_timestamp(bus, self.clock_hz)
    }
}

impl SfpCapable for MasterNode {
    fn switch_endpoint_sfp(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        on: bool,
    ) -> Result<()> {
        self.sfp.switch(bus, address, on)
    }

    fn enable_upstream_endpoint<'a>(
        &'a self,
        bus: &'a mut dyn RegisterBus,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match &self.upstream {
                Some(upstream) => upstream.enable(bus, cancel).await,
                None => Err(Error::Unsupported {
                    capability: "upstream endpoint",
                }),
            }
        }
        .boxed()
    }
}

impl EchoCapable for MasterNode {
    fn measure_endpoint_rtt<'a>(
        &'a self,
        bus: &'a mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RttMeasurement>> {
        MasterNode::measure_endpoint_rtt(self, bus, address, control_sfp, cancel).boxed()
    }
}

impl DelayCapable for MasterNode {
    fn apply_endpoint_delay(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        params: DelayParameters,
    ) -> Result<()> {
        self.delay.apply(bus, address, params)
    }
}

impl CommandCapable for MasterNode {
    fn send_fl_cmd(
        &self,
        bus: &mut dyn RegisterBus,
        command: FixedLengthCommand,
        channel: u32,
        repeat: u32,
    ) -> Result<()> {
        self.commands.send_command(bus, command, channel, repeat)
    }
}
