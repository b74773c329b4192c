use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{self, RegisterBlock, RegisterBus};
use crate::core::{EndpointAddress, Result};
use crate::util;

/// Bit in the SFP control word that enables the transmitter
pub const SFP_TX_ENABLE: u32 = 1 << 16;

/// State register value of an upstream endpoint that has locked
pub const ENDPOINT_READY: u32 = 0x8;

/// Optical transmitter control for downstream endpoints
#[derive(Debug, Clone)]
pub struct SfpController {
    block: RegisterBlock,
}

impl SfpController {
    pub fn new(block: RegisterBlock) -> Self {
        SfpController { block }
    }

    /// Full path of the SFP control register
    pub fn control_path(&self) -> String {
        self.block.path("csr.ctrl.tx")
    }

    /// Queues one control-word write switching the transmitter for `address`.
    ///
    /// Nothing is dispatched; callers that need ordering against later
    /// operations dispatch themselves.
    pub fn switch(&self, bus: &mut dyn RegisterBus, address: EndpointAddress, on: bool) -> Result<()> {
        address.validate()?;
        let word = address.value() | if on { SFP_TX_ENABLE } else { 0 };
        self.block.write(bus, "csr.ctrl.tx", word);
        tracing::debug!(
            "SFP for endpoint {} switched {}",
            address,
            if on { "on" } else { "off" }
        );
        Ok(())
    }
}

/// Timing of an upstream lock wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            timeout: crate::core::DEFAULT_LOCK_TIMEOUT,
            poll_interval: crate::core::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Master-side receiver for signals coming back up the link
#[derive(Debug, Clone)]
pub struct UpstreamEndpoint {
    block: RegisterBlock,
    options: LockOptions,
}

impl UpstreamEndpoint {
    pub fn new(block: RegisterBlock, options: LockOptions) -> Self {
        UpstreamEndpoint { block, options }
    }

    /// Restarts the endpoint and waits for it to lock.
    ///
    /// Returns whether the ready state was reached within the lock timeout.
    pub async fn enable(&self, bus: &mut dyn RegisterBus, cancel: &CancellationToken) -> Result<bool> {
        bus::reset_registers(bus, &self.block, &["csr.ctrl.ep_en"], 0)?;
        self.block.write(bus, "csr.ctrl.ep_en", 1);
        bus.dispatch()?;

        let block = &self.block;
        let outcome = util::poll_until(
            self.options.poll_interval,
            self.options.timeout,
            cancel,
            || {
                let state = block.read(bus, "csr.stat.ep_stat");
                bus.dispatch()?;
                Ok(state.value()? & 0xF == ENDPOINT_READY)
            },
        )
        .await?;

        if outcome.satisfied {
            tracing::debug!("Upstream endpoint ready after {} polls", outcome.attempts);
        } else {
            tracing::warn!(
                "Upstream endpoint not ready after {:?}",
                self.options.timeout
            );
        }
        Ok(outcome.satisfied)
    }
}
