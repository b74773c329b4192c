use crate::bus::{RegisterBlock, RegisterBus};
use crate::core::{Result, TimestampWord};
use crate::util;

/// Access to the master's free-running 64-bit timestamp counter
#[derive(Debug, Clone)]
pub struct TimestampSync {
    block: RegisterBlock,
}

impl TimestampSync {
    pub fn new(block: RegisterBlock) -> Self {
        TimestampSync { block }
    }

    /// Reads both counter halves in one dispatch
    pub fn read_timestamp(&self, bus: &mut dyn RegisterBus) -> Result<TimestampWord> {
        let high = self.block.read(bus, "ctr.val_h");
        let low = self.block.read(bus, "ctr.val_l");
        bus.dispatch()?;

        Ok(TimestampWord::from_halves(high.value()?, low.value()?))
    }

    /// Loads `value` into the counter-set registers.
    ///
    /// The device latches it on its next set strobe.
    pub fn set_timestamp(&self, bus: &mut dyn RegisterBus, value: TimestampWord) -> Result<()> {
        self.block.write(bus, "ctr.set_h", value.high());
        self.block.write(bus, "ctr.set_l", value.low());
        bus.dispatch()?;

        tracing::debug!("Timestamp set to {}", value);
        Ok(())
    }

    /// Sets the counter from the wall clock and returns the value written
    pub fn sync_timestamp(&self, bus: &mut dyn RegisterBus, clock_hz: u64) -> Result<TimestampWord> {
        let now = util::wall_clock_timestamp(clock_hz)?;
        self.set_timestamp(bus, now)?;
        tracing::info!(
            "Master timestamp synchronized to {} ({:?})",
            now,
            now.to_datetime(clock_hz)
        );
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::core::Error;

    fn sync() -> TimestampSync {
        TimestampSync::new(RegisterBlock::new("master.tstamp"))
    }

    #[test]
    fn test_read_timestamp_single_dispatch() {
        let mut bus = MemoryBus::new();
        bus.set("master.tstamp.ctr.val_h", 0x1);
        bus.set("master.tstamp.ctr.val_l", 0x2);

        let ts = sync().read_timestamp(&mut bus).unwrap();
        assert_eq!(ts, TimestampWord(0x1_0000_0002));
        assert_eq!(bus.dispatch_count(), 1);
        assert!(bus.journal().iter().all(|a| a.dispatch == 1));
    }

    #[test]
    fn test_set_timestamp_writes_halves() {
        let mut bus = MemoryBus::new();
        sync()
            .set_timestamp(&mut bus, TimestampWord(0xAABB_CCDD_0011_2233))
            .unwrap();

        assert_eq!(bus.writes_to("master.tstamp.ctr.set_h"), vec![0xAABB_CCDD]);
        assert_eq!(bus.writes_to("master.tstamp.ctr.set_l"), vec![0x0011_2233]);
    }

    #[test]
    fn test_sync_timestamp_uses_wall_clock() {
        let mut bus = MemoryBus::new();
        let written = sync().sync_timestamp(&mut bus, 62_500_000).unwrap();

        let high = bus.value("master.tstamp.ctr.set_h").unwrap();
        let low = bus.value("master.tstamp.ctr.set_l").unwrap();
        assert_eq!(TimestampWord::from_halves(high, low), written);
        assert!(written.to_datetime(62_500_000).is_some());
    }

    #[test]
    fn test_bus_failure_propagates() {
        let mut bus = MemoryBus::new();
        bus.fail_dispatch_after(0, "timeout");
        assert!(matches!(sync().read_timestamp(&mut bus), Err(Error::Bus(_))));
    }
}
