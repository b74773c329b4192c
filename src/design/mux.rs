use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::bus::{RegisterBlock, RegisterBus};
use crate::core::{Error, MuxChannel, Result};
use super::capability::{MuxCapable, SfpCapable};

/// SFP multiplexer on a fan-out IO board
#[derive(Debug, Clone)]
pub struct FanoutMux {
    block: RegisterBlock,
    channel_count: u32,
}

impl FanoutMux {
    pub fn new(block: RegisterBlock, channel_count: u32) -> Self {
        FanoutMux { block, channel_count }
    }

    /// Full path of the channel-select register
    pub fn select_path(&self) -> String {
        self.block.path("csr.ctrl.mux")
    }
}

impl MuxCapable for FanoutMux {
    fn mux_channel_count(&self) -> u32 {
        self.channel_count
    }

    fn select_mux_channel(&self, bus: &mut dyn RegisterBus, channel: MuxChannel) -> Result<()> {
        self.validate_channel(channel)?;
        self.block.write(bus, "csr.ctrl.mux", channel.index());
        bus.dispatch()?;
        tracing::debug!("SFP mux channel {} selected", channel);
        Ok(())
    }
}

/// Channel that did not come up during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelFailure {
    pub channel: MuxChannel,
    pub reason: String,
}

/// Outcome of a full mux scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxScanReport {
    /// Channels that locked, in scan order
    pub locked: Vec<MuxChannel>,
    /// Channels that were skipped, in scan order
    pub skipped: Vec<ChannelFailure>,
}

/// Walks the channels of a fan-out mux looking for live links
#[derive(Debug)]
pub struct MuxChannelScanner<'d, M, X> {
    master: &'d M,
    mux: &'d X,
}

impl<'d, M, X> MuxChannelScanner<'d, M, X>
where
    M: SfpCapable,
    X: MuxCapable,
{
    pub fn new(master: &'d M, mux: &'d X) -> Self {
        MuxChannelScanner { master, mux }
    }

    /// Selects `channel`, optionally waiting for the upstream receiver to lock
    pub async fn switch_sfp_mux_channel(
        &self,
        bus: &mut dyn RegisterBus,
        channel: MuxChannel,
        wait_for_lock: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.mux.select_mux_channel(bus, channel)?;

        if wait_for_lock && !self.master.enable_upstream_endpoint(bus, cancel).await? {
            return Err(Error::lock_failure(format!("mux channel {}", channel)));
        }
        Ok(())
    }

    /// Tries every channel below `channel_count` and reports which locked.
    ///
    /// A channel that times out or fails to lock is recorded and skipped.
    /// Any other error aborts the scan.
    pub async fn scan_detailed(
        &self,
        bus: &mut dyn RegisterBus,
        channel_count: u32,
        cancel: &CancellationToken,
    ) -> Result<MuxScanReport> {
        let available = self.mux.mux_channel_count();
        if channel_count > available {
            return Err(Error::InvalidChannel {
                channel: channel_count - 1,
                channel_count: available,
            });
        }

        let mut report = MuxScanReport::default();
        for index in 0..channel_count {
            let channel = MuxChannel(index);
            tracing::debug!("Scanning slot {}", channel);

            match self.switch_sfp_mux_channel(bus, channel, true, cancel).await {
                Ok(()) => {
                    tracing::debug!("Slot {} locked", channel);
                    report.locked.push(channel);
                }
                Err(e) if e.is_link_failure() => {
                    tracing::warn!("Slot {} not locked: {}", channel, e);
                    report.skipped.push(ChannelFailure {
                        channel,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if report.locked.is_empty() {
            tracing::info!("No slots locked");
        } else {
            tracing::info!("Slots locked: {:?}", report.locked);
        }
        Ok(report)
    }

    /// Channels below `channel_count` that locked, in scan order
    pub async fn scan(
        &self,
        bus: &mut dyn RegisterBus,
        channel_count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<MuxChannel>> {
        Ok(self.scan_detailed(bus, channel_count, cancel).await?.locked)
    }
}
