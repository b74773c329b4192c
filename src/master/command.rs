use crate::bus::{RegisterBlock, RegisterBus};
use crate::core::{Error, FixedLengthCommand, Result};

/// Emits fixed-length commands on the master's command channels
#[derive(Debug, Clone)]
pub struct FixedLengthCommandDispatcher {
    block: RegisterBlock,
    channel_count: u32,
}

impl FixedLengthCommandDispatcher {
    pub fn new(block: RegisterBlock, channel_count: u32) -> Self {
        FixedLengthCommandDispatcher { block, channel_count }
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Command register of `channel`
    pub fn command_path(&self, channel: u32) -> String {
        self.block.path(&format!("chan{}.cmd", channel))
    }

    /// Writes `command` to `channel` `repeat` times.
    ///
    /// Every write is dispatched on its own so the device sees one pulse per
    /// dispatch; batching them would change the pulse spacing.
    pub fn send_command(
        &self,
        bus: &mut dyn RegisterBus,
        command: FixedLengthCommand,
        channel: u32,
        repeat: u32,
    ) -> Result<()> {
        if channel >= self.channel_count {
            return Err(Error::InvalidChannel {
                channel,
                channel_count: self.channel_count,
            });
        }

        let path = self.command_path(channel);
        for _ in 0..repeat {
            bus.write(&path, command.code());
            bus.dispatch()?;
        }

        tracing::debug!("Sent {:?} {} times on channel {}", command, repeat, channel);
        Ok(())
    }
}
