use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bus::{self, RegisterBlock, RegisterBus};
use crate::core::{Error, Result, RttMeasurement, TimestampWord};
use crate::util;

/// Timing of one echo measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoOptions {
    /// Time allowed for the done bit to appear
    pub timeout: Duration,
    /// Sleep between done-bit polls
    pub poll_interval: Duration,
}

impl Default for EchoOptions {
    fn default() -> Self {
        EchoOptions {
            timeout: crate::core::DEFAULT_ECHO_TIMEOUT,
            poll_interval: crate::core::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Progress of an echo round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoState {
    /// Nothing sent yet
    Idle,
    /// Go strobe dispatched to the hardware
    Requested,
    /// Waiting for the done bit
    Polling,
    /// Done bit seen and timestamps read
    Done,
    /// Timeout elapsed without the done bit
    TimedOut,
}

/// Echo monitor block of a timing master
#[derive(Debug, Clone)]
pub struct EchoMonitor {
    block: RegisterBlock,
}

impl EchoMonitor {
    pub fn new(block: RegisterBlock) -> Self {
        EchoMonitor { block }
    }

    /// Starts a new round trip in the `Idle` state
    pub fn round_trip(&self, options: EchoOptions) -> EchoRoundTrip<'_> {
        EchoRoundTrip {
            monitor: self,
            options,
            state: EchoState::Idle,
            polls: 0,
        }
    }

    /// Sends an echo and returns the measured round trip
    pub async fn send_echo_and_measure_delay(
        &self,
        bus: &mut dyn RegisterBus,
        options: EchoOptions,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        self.round_trip(options).run(bus, cancel).await
    }
}

/// One echo measurement driven through [`EchoState`]
#[derive(Debug)]
pub struct EchoRoundTrip<'a> {
    monitor: &'a EchoMonitor,
    options: EchoOptions,
    state: EchoState,
    polls: u32,
}

impl<'a> EchoRoundTrip<'a> {
    pub fn state(&self) -> EchoState {
        self.state
    }

    /// Number of done-bit polls issued so far
    pub fn polls(&self) -> u32 {
        self.polls
    }

    fn transition(&mut self, next: EchoState) {
        tracing::debug!("Echo {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the measurement to completion
    pub async fn run(
        &mut self,
        bus: &mut dyn RegisterBus,
        cancel: &CancellationToken,
    ) -> Result<RttMeasurement> {
        if self.state != EchoState::Idle {
            return Err(Error::protocol(format!(
                "echo round trip already in state {:?}",
                self.state
            )));
        }

        let monitor = self.monitor;
        let block = &monitor.block;

        // The request must reach the hardware before polling starts
        block.write(bus, "csr.ctrl.go", 0x1);
        bus.dispatch()?;
        self.transition(EchoState::Requested);

        self.transition(EchoState::Polling);
        let outcome = util::poll_until(
            self.options.poll_interval,
            self.options.timeout,
            cancel,
            || {
                let done = block.read(bus, "csr.stat.rx_done");
                bus.dispatch()?;
                let done = done.value()?;
                tracing::debug!("Echo rx done: {:#x}", done);
                Ok(done & 0x1 != 0)
            },
        )
        .await?;
        self.polls = outcome.attempts;

        if !outcome.satisfied {
            self.transition(EchoState::TimedOut);
            return Err(Error::EchoTimeout {
                timeout_ms: util::duration_to_ms(self.options.timeout),
            });
        }

        let stamps = bus::snapshot(bus, block, &["csr.tx_h", "csr.tx_l", "csr.rx_h", "csr.rx_l"])?;
        let tx = TimestampWord::from_halves(stamps.get("csr.tx_h")?, stamps.get("csr.tx_l")?);
        let rx = TimestampWord::from_halves(stamps.get("csr.rx_h")?, stamps.get("csr.rx_l")?);
        tracing::debug!("Echo tx ts: {}", tx);
        tracing::debug!("Echo rx ts: {}", rx);

        let rtt = RttMeasurement::from_timestamps(tx, rx)?;
        self.transition(EchoState::Done);
        Ok(rtt)
    }
}
