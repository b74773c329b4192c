//! Timing Calib: calibration and synchronization for optical timing networks
//!
//! This library drives the control algorithms of a timestamp-distribution
//! network: echo-based round-trip measurement, endpoint delay programming,
//! master timestamp synchronization and fan-out mux scanning. All hardware
//! access goes through the batched [`bus::RegisterBus`] abstraction.
pub mod bus;
pub mod core;
pub mod design;
pub mod master;
pub mod util;

// Re-export commonly used items
pub use crate::bus::{MemoryBus, RegisterBus};
pub use crate::core::{Error, Result};
pub use crate::design::{Design, DesignRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
