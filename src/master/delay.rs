use crate::bus::{RegisterBlock, RegisterBus};
use crate::core::{DelayParameters, EndpointAddress, Result};

/// Delay-line programming for downstream endpoints
#[derive(Debug, Clone)]
pub struct DelayController {
    block: RegisterBlock,
}

impl DelayController {
    pub fn new(block: RegisterBlock) -> Self {
        DelayController { block }
    }

    pub fn block(&self) -> &RegisterBlock {
        &self.block
    }

    /// Writes coarse, fine and phase delays for `address` and strobes the
    /// update, all in one dispatch
    pub fn apply(
        &self,
        bus: &mut dyn RegisterBus,
        address: EndpointAddress,
        params: DelayParameters,
    ) -> Result<()> {
        address.validate_target()?;

        self.block.write(bus, "csr.ctrl.addr", address.value());
        self.block.write(bus, "csr.ctrl.cdel", params.coarse);
        self.block.write(bus, "csr.ctrl.fdel", params.fine);
        self.block.write(bus, "csr.ctrl.pdel", params.phase);
        self.block.write(bus, "csr.ctrl.update", 0x1);
        self.block.write(bus, "csr.ctrl.go", 0x1);
        bus.dispatch()?;

        tracing::info!(
            "Applied delay to endpoint {}: coarse {}, fine {}, phase {}",
            address,
            params.coarse,
            params.fine,
            params.phase
        );
        Ok(())
    }
}
