//! Core types shared by every calibration component
//!
//! This module contains the error type, the value types exchanged with the
//! hardware and the design configuration.

pub mod error;
pub mod types;
pub mod serde;

use std::time::Duration;

pub use self::error::{Error, Result};
pub use self::types::{
    DelayParameters,
    DesignConfig,
    EndpointAddress,
    EndpointCalibration,
    FixedLengthCommand,
    MuxChannel,
    RegisterMap,
    RttMeasurement,
    SfpRestore,
    TimestampWord,
};

/// Largest address the endpoint address field can hold
pub const MAX_ENDPOINT_ADDRESS: u32 = 0xFFFF;

/// Frequency of the master timestamp counter in the reference system
pub const DEFAULT_CLOCK_FREQUENCY_HZ: u64 = 62_500_000;

/// Sleep between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed for an echo to come back
pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Time allowed for the upstream endpoint to reach the ready state
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Settling time after selecting a mux channel for an RTT measurement
pub const DEFAULT_MUX_SETTLE: Duration = Duration::from_millis(200);

/// Channels on the reference fan-out board
pub const DEFAULT_MUX_CHANNELS: u32 = 8;

/// Fixed-length command channels on the reference master
pub const DEFAULT_COMMAND_CHANNELS: u32 = 5;
