//! Timing designs
//!
//! A design is the set of blocks one firmware build exposes. [`Design`]
//! composes a [`MasterNode`] with an optional [`FanoutMux`] and runs the
//! calibration procedures over them. Concrete designs are resolved from a
//! family tag through the [`DesignRegistry`].

mod calibration;
mod capability;
mod mux;
mod registry;

use tokio_util::sync::CancellationToken;

use crate::bus::RegisterBus;
use crate::core::{
    DelayParameters, DesignConfig, EndpointAddress, Error, FixedLengthCommand, MuxChannel,
    Result, RttMeasurement, TimestampWord,
};
use crate::master::MasterNode;

pub use self::calibration::{CalibrationSettings, DelayCalibration};
pub use self::capability::{
    CommandCapable, DelayCapable, EchoCapable, MuxCapable, SfpCapable, TimestampCapable,
};
pub use self::mux::{ChannelFailure, FanoutMux, MuxChannelScanner, MuxScanReport};
pub use self::registry::{validate_config, DesignConstructor, DesignRegistry};

/// One configured timing design
#[derive(Debug, Clone)]
pub struct Design {
    family: String,
    config: DesignConfig,
    master: MasterNode,
    mux: Option<FanoutMux>,
}

impl Design {
    pub fn new(config: DesignConfig, master: MasterNode, mux: Option<FanoutMux>) -> Self {
        Design {
            family: config.family.clone(),
            config,
            master,
            mux,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn config(&self) -> &DesignConfig {
        &self.config
    }

    pub fn master(&self) -> &MasterNode {
        &self.master
    }

    pub fn mux(&self) -> Option<&FanoutMux> {
        self.mux.as_ref()
    }

    /// Calibration procedures bound to this design's blocks
    pub fn calibration(&self) -> DelayCalibration<'_, MasterNode, FanoutMux> {
        DelayCalibration::new(
            &self.master,
            self.mux.as_ref(),
            CalibrationSettings::from(&self.config),
        )
    }

    /// Mux scanner, for designs that carry a fan-out mux
    pub fn scanner(&self) -> Result<MuxChannelScanner<'_, MasterNode, FanoutMux>> {
        let mux = self.mux.as_ref().ok_or(Error::Unsupported {
            capability: "sfp mux",
        })?;
        Ok(MuxChannelScanner::new(&self.master, mux))
    }

    pub fn read_master_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord> {
        self.master.read_master_timestamp(bus)
    }

    pub fn sync_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord> {
        TimestampCapable::sync_timestamp(&self.master, bus)
    }

    pub async fn measure_endpoint_rtt(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        control_sfp: bool,
        mux_channel: Option<MuxChannel>,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        self.calibration()
            .measure_endpoint_rtt(bus, address, control_sfp, mux_channel, cancel)
            .await
    }

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
        self.calibration()
            .apply_endpoint_delay(
                bus,
                address,
                params,
                measure_rtt,
                control_sfp,
                mux_channel,
                cancel,
            )
            .await
    }

    /// Scans every channel of the design's mux
    pub async fn scan_sfp_mux(
        &self,
        bus: &mut dyn RegisterBus,
        cancel: &CancellationToken,
    ) -> Result<MuxScanReport> {
        let scanner = self.scanner()?;
        let count = self.mux.as_ref().map_or(0, |mux| mux.mux_channel_count());
        scanner.scan_detailed(bus, count, cancel).await
    }

    pub async fn switch_sfp_mux_channel(
        &self,
        bus: &mut dyn RegisterBus,
        channel: MuxChannel,
        wait_for_lock: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.scanner()?
            .switch_sfp_mux_channel(bus, channel, wait_for_lock, cancel)
            .await
    }

    pub fn send_fl_cmd(
        &self,
        bus: &mut dyn RegisterBus,
        command: FixedLengthCommand,
        channel: u32,
        repeat: u32,
    ) -> Result<()> {
        self.master.send_fl_cmd(bus, command, channel, repeat)
    }

    /// Brings the design to its configured state.
    ///
    /// Synchronizes the master timestamp to the wall clock, then applies
    /// every configured endpoint delay without measuring.
    pub async fn configure(
        &self,
        bus: &mut dyn RegisterBus,
        cancel: &CancellationToken,
    ) -> Result<TimestampWord> {
        let timestamp = self.sync_timestamp(bus)?;

        let calibration = self.calibration();
        for endpoint in &self.config.endpoints {
            calibration
                .apply_endpoint_config(bus, endpoint, false, cancel)
                .await?;
        }
        tracing::info!(
            "Design {} configured with {} endpoints",
            self.family,
            self.config.endpoints.len()
        );
        Ok(timestamp)
    }
}
