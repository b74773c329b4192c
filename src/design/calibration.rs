use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::RegisterBus;
use crate::core::{
    DelayParameters, DesignConfig, EndpointAddress, EndpointCalibration, Error, MuxChannel,
    Result, RttMeasurement, SfpRestore,
};
use crate::util;
use super::capability::{DelayCapable, EchoCapable, MuxCapable, SfpCapable};

/// Tunables of the calibration procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSettings {
    /// Settling time after selecting a mux channel for a measurement
    pub mux_settle: Duration,
    pub sfp_restore: SfpRestore,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        CalibrationSettings {
            mux_settle: crate::core::DEFAULT_MUX_SETTLE,
            sfp_restore: SfpRestore::default(),
        }
    }
}

impl From<&DesignConfig> for CalibrationSettings {
    fn from(config: &DesignConfig) -> Self {
        CalibrationSettings {
            mux_settle: config.mux_settle,
            sfp_restore: config.sfp_restore,
        }
    }
}

/// RTT measurement and delay programming for single endpoints, directly or
/// through a fan-out mux channel
#[derive(Debug)]
pub struct DelayCalibration<'d, M, X> {
    master: &'d M,
    mux: Option<&'d X>,
    settings: CalibrationSettings,
}

impl<'d, M, X> DelayCalibration<'d, M, X>
where
    M: EchoCapable + SfpCapable + DelayCapable,
    X: MuxCapable,
{
    pub fn new(master: &'d M, mux: Option<&'d X>, settings: CalibrationSettings) -> Self {
        DelayCalibration {
            master,
            mux,
            settings,
        }
    }

    fn mux_for(&self, channel: MuxChannel) -> Result<&'d X> {
        let mux = self.mux.ok_or(Error::Unsupported {
            capability: "sfp mux",
        })?;
        mux.validate_channel(channel)?;
        Ok(mux)
    }

    /// Isolates `address`, then selects `channel` without waiting for the
    /// upstream lock and lets the fan-out receiver settle. The measurement
    /// that follows does its own lock wait.
    async fn route_through_mux(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        channel: MuxChannel,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mux = self.mux_for(channel)?;
        if control_sfp {
            self.master.switch_endpoint_sfp(bus, EndpointAddress::NONE, false)?;
            self.master.switch_endpoint_sfp(bus, address, true)?;
        }
        mux.select_mux_channel(bus, channel)?;

        util::sleep_or_cancel(self.settings.mux_settle, cancel).await
    }

    fn disable_sfp(&self, bus: &mut dyn RegisterBus, address: EndpointAddress) -> Result<()> {
        self.master.switch_endpoint_sfp(bus, address, false)?;
        bus.dispatch()
    }

    /// Isolates `address` when `control_sfp` is set, routes through
    /// `mux_channel` if given, and measures.
    ///
    /// A link that fails to lock or an echo that times out leaves the target
    /// transmitter switched off. Bus errors and cancellation leave the
    /// hardware as it is.
    async fn isolate_and_measure(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        mux_channel: Option<MuxChannel>,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        match mux_channel {
            Some(channel) => {
                self.route_through_mux(bus, address, control_sfp, channel, cancel)
                    .await?
            }
            None if control_sfp => {
                self.master.switch_endpoint_sfp(bus, EndpointAddress::NONE, false)?;
                self.master.switch_endpoint_sfp(bus, address, true)?;
                bus.dispatch()?;
            }
            None => {}
        }

        let measured = self
            .master
            .measure_endpoint_rtt(bus, address, false, cancel)
            .await;
        match measured {
            Err(e) if control_sfp && e.is_link_failure() => {
                if let Err(release) = self.disable_sfp(bus, address) {
                    tracing::warn!("SFP for endpoint {} left on: {}", address, release);
                }
                Err(e)
            }
            measured => measured,
        }
    }

    /// Whether the target transmitter is switched off at the end of a call
    fn restores_sfp(&self, measured: bool, via_mux: bool) -> bool {
        match self.settings.sfp_restore {
            SfpRestore::WhenMeasured => measured && via_mux,
            SfpRestore::Always => true,
        }
    }

    /// Measures the round trip to `address` without touching its delays
    pub async fn measure_endpoint_rtt(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        mux_channel: Option<MuxChannel>,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        address.validate_target()?;

        match mux_channel {
            Some(_) => {
                let rtt = self
                    .isolate_and_measure(bus, address, control_sfp, mux_channel, cancel)
                    .await?;
                if control_sfp {
                    self.disable_sfp(bus, address)?;
                }
                Ok(rtt)
            }
            None => {
                self.master
                    .measure_endpoint_rtt(bus, address, control_sfp, cancel)
                    .await
            }
        }
    }

    /// Optionally measures the round trip to `address`, then applies `params`.
    ///
    /// Returns the measurement when `measure_rtt` is set.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_endpoint_delay(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        params: DelayParameters,
        measure_rtt: bool,
        control_sfp: bool,
        mux_channel: Option<MuxChannel>,
        cancel: &CancellationToken,
    ) -> Result<Option<RttMeasurement>> {
        address.validate_target()?;
        if let Some(channel) = mux_channel {
            self.mux_for(channel)?;
        }

        let rtt = if measure_rtt {
            Some(
                self.isolate_and_measure(bus, address, control_sfp, mux_channel, cancel)
                    .await?,
            )
        } else {
            None
        };

        self.master.apply_endpoint_delay(bus, address, params)?;

        if control_sfp && self.restores_sfp(measure_rtt, mux_channel.is_some()) {
            self.disable_sfp(bus, address)?;
        }
        Ok(rtt)
    }

    /// Applies a stored endpoint calibration, controlling its SFP
    pub async fn apply_endpoint_config(
        &self,
        bus: &mut dyn RegisterBus,
        endpoint: &EndpointCalibration,
        measure_rtt: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<RttMeasurement>> {
        tracing::debug!("Applying calibration for endpoint {}", endpoint.id);
        self.apply_endpoint_delay(
            bus,
            endpoint.address,
            endpoint.delay,
            measure_rtt,
            true,
            endpoint.mux_channel,
            cancel,
        )
        .await
    }
}
