//! Capabilities a timing design may carry
//!
//! Each concrete design is composed from the blocks its firmware provides;
//! the calibration procedures only ask for the capabilities they use.

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::bus::RegisterBus;
use crate::core::{
    DelayParameters, EndpointAddress, Error, FixedLengthCommand, MuxChannel, Result,
    RttMeasurement, TimestampWord,
};

/// Access to the master timestamp counter
pub trait TimestampCapable: Send + Sync {
    fn read_master_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord>;

    /// Sets the counter from the wall clock, returning the value written
    fn sync_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord>;
}

/// Control of endpoint transmitters and the upstream receiver
pub trait SfpCapable: Send + Sync {
    /// Queues a transmitter switch for `address` without dispatching
    fn switch_endpoint_sfp(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        on: bool,
    ) -> Result<()>;

    /// Brings the upstream receiver into lock, returning whether it locked
    fn enable_upstream_endpoint<'a>(
        &'a self,
        _bus: &'a mut dyn RegisterBus,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<bool>> {
        async {
            Err(Error::Unsupported {
                capability: "upstream endpoint",
            })
        }
        .boxed()
    }
}

/// Round-trip measurement to an endpoint
pub trait EchoCapable: Send + Sync {
    fn measure_endpoint_rtt<'a>(
        &'a self,
        bus: &'a mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RttMeasurement>>;
}

/// Delay-line programming of an endpoint
pub trait DelayCapable: Send + Sync {
    fn apply_endpoint_delay(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        params: DelayParameters,
    ) -> Result<()>;
}

/// Fixed-length command generation
pub trait CommandCapable: Send + Sync {
    fn send_fl_cmd(
        &self,
        bus: &mut dyn RegisterBus,
        command: FixedLengthCommand,
        channel: u32,
        repeat: u32,
    ) -> Result<()>;
}

/// Fan-out multiplexer channel selection
pub trait MuxCapable: Send + Sync {
    /// Number of selectable channels
    fn mux_channel_count(&self) -> u32;

    /// Selects `channel` and dispatches
    fn select_mux_channel(&self, bus: &mut dyn RegisterBus, channel: MuxChannel) -> Result<()>;

    fn validate_channel(&self, channel: MuxChannel) -> Result<()> {
        if channel.index() >= self.mux_channel_count() {
            return Err(Error::InvalidChannel {
                channel: channel.index(),
                channel_count: self.mux_channel_count(),
            });
        }
        Ok(())
    }
}
