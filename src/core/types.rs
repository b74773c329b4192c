use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Identifies a downstream device on the timing link
///
/// Address 0 is reserved for "no endpoint selected" and is used to deselect
/// every SFP before a single one is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddress(pub u32);

impl EndpointAddress {
    /// The reserved "no endpoint" address
    pub const NONE: EndpointAddress = EndpointAddress(0);

    /// Creates an address, rejecting values the address field cannot hold
    pub fn new(address: u32) -> Result<Self> {
        let address = EndpointAddress(address);
        address.validate()?;
        Ok(address)
    }

    /// Returns the raw address
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns whether this is the reserved "no endpoint" address
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Checks the address fits the hardware address field
    pub fn validate(&self) -> Result<()> {
        if self.0 > super::MAX_ENDPOINT_ADDRESS {
            return Err(Error::InvalidAddress { address: self.0 });
        }
        Ok(())
    }

    /// Checks the address names a real endpoint (valid and not reserved)
    pub fn validate_target(&self) -> Result<()> {
        if self.is_none() {
            return Err(Error::InvalidAddress { address: self.0 });
        }
        self.validate()
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Delay-line settings applied to one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayParameters {
    /// Coarse delay in clock cycles
    pub coarse: u32,
    /// Fine delay taps
    pub fine: u32,
    /// Phase delay steps
    pub phase: u32,
}

impl DelayParameters {
    pub fn new(coarse: u32, fine: u32, phase: u32) -> Self {
        DelayParameters { coarse, fine, phase }
    }
}

/// Round trip measured by the echo monitor, in timestamp-counter ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RttMeasurement {
    pub round_trip_ticks: u32,
}

impl RttMeasurement {
    /// Computes the round trip from the echo transmit and receive timestamps.
    ///
    /// The subtraction wraps like the 64-bit hardware counter does.
    pub fn from_timestamps(tx: TimestampWord, rx: TimestampWord) -> Result<Self> {
        let ticks = rx.value().wrapping_sub(tx.value());
        let round_trip_ticks = u32::try_from(ticks).map_err(|_| {
            Error::protocol(format!(
                "round trip of {} ticks (tx {:#x}, rx {:#x}) exceeds 32 bits",
                ticks,
                tx.value(),
                rx.value()
            ))
        })?;
        Ok(RttMeasurement { round_trip_ticks })
    }
}

/// Index of one selectable optical path on a fan-out multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MuxChannel(pub u32);

impl MuxChannel {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MuxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit timestamp counter value, transferred as two 32-bit halves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampWord(pub u64);

impl TimestampWord {
    /// Joins the register halves as `(high << 32) | low`
    pub fn from_halves(high: u32, low: u32) -> Self {
        TimestampWord((u64::from(high) << 32) | u64::from(low))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn high(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn low(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Counter value a free-running clock at `clock_hz` started at the Unix
    /// epoch would hold at `time`.
    ///
    /// Times before the epoch and counts beyond 64 bits are rejected.
    pub fn from_datetime(time: DateTime<Utc>, clock_hz: u64) -> Result<Self> {
        let secs = u128::try_from(time.timestamp())
            .map_err(|_| Error::protocol(format!("{} is before the counter epoch", time)))?;
        let nanos = u128::from(time.timestamp_subsec_nanos());
        let hz = u128::from(clock_hz);
        let ticks = secs * hz + nanos * hz / 1_000_000_000;
        let ticks = u64::try_from(ticks).map_err(|_| {
            Error::protocol(format!("{} at {} Hz overflows the counter", time, clock_hz))
        })?;
        Ok(TimestampWord(ticks))
    }

    /// Inverse of [`TimestampWord::from_datetime`]
    pub fn to_datetime(&self, clock_hz: u64) -> Option<DateTime<Utc>> {
        if clock_hz == 0 {
            return None;
        }
        let secs = self.0 / clock_hz;
        let nanos = u128::from(self.0 % clock_hz) * 1_000_000_000 / u128::from(clock_hz);
        DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos as u32)
    }
}

impl fmt::Display for TimestampWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Short timing-critical commands broadcast on a command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixedLengthCommand {
    TimeSync = 0x0,
    Echo = 0x1,
    SpillStart = 0x2,
    SpillStop = 0x3,
    RunStart = 0x4,
    RunStop = 0x5,
    WibCalib = 0x6,
    Trigger = 0x7,
}

impl FixedLengthCommand {
    /// Command word written to the channel register
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl TryFrom<u32> for FixedLengthCommand {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Ok(match code {
            0x0 => FixedLengthCommand::TimeSync,
            0x1 => FixedLengthCommand::Echo,
            0x2 => FixedLengthCommand::SpillStart,
            0x3 => FixedLengthCommand::SpillStop,
            0x4 => FixedLengthCommand::RunStart,
            0x5 => FixedLengthCommand::RunStop,
            0x6 => FixedLengthCommand::WibCalib,
            0x7 => FixedLengthCommand::Trigger,
            other => {
                return Err(Error::protocol(format!(
                    "unknown fixed-length command code {:#x}",
                    other
                )))
            }
        })
    }
}

/// When the target SFP is switched back off after a calibration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SfpRestore {
    /// Only after a call that measured the RTT through a mux channel
    #[default]
    WhenMeasured,
    /// After every call that controlled the SFP
    Always,
}

/// Stored calibration for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCalibration {
    /// Human-readable endpoint name
    pub id: String,
    pub address: EndpointAddress,
    pub delay: DelayParameters,
    /// Fan-out channel the endpoint hangs off, if any
    #[serde(default)]
    pub mux_channel: Option<MuxChannel>,
}

/// Register block names of one design
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    pub timestamp: String,
    pub echo: String,
    pub sfp: String,
    pub delay: String,
    pub commands: String,
    pub upstream: String,
    pub mux: String,
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap {
            timestamp: "master.tstamp".to_string(),
            echo: "master.echo".to_string(),
            sfp: "master.acmd.sfp".to_string(),
            delay: "master.acmd".to_string(),
            commands: "master.scmd_gen".to_string(),
            upstream: "master.upstream".to_string(),
            mux: "io".to_string(),
        }
    }
}

/// Configuration of one timing design
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Device-family tag resolved through the design registry
    pub family: String,
    pub registers: RegisterMap,
    /// Frequency of the master timestamp counter
    pub clock_frequency_hz: u64,
    /// Time allowed for an echo round trip
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub echo_timeout: Duration,
    /// Sleep between status polls
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub poll_interval: Duration,
    /// Time allowed for the upstream endpoint to lock
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub lock_timeout: Duration,
    /// Settling time after selecting a mux channel for an RTT measurement
    #[serde(serialize_with = "super::serde::serialize_duration_ms")]
    #[serde(deserialize_with = "super::serde::deserialize_duration_ms")]
    pub mux_settle: Duration,
    pub mux_channel_count: u32,
    pub command_channel_count: u32,
    pub sfp_restore: SfpRestore,
    pub endpoints: Vec<EndpointCalibration>,
}

impl Default for DesignConfig {
    fn default() -> Self {
        DesignConfig {
            family: "master".to_string(),
            registers: RegisterMap::default(),
            clock_frequency_hz: super::DEFAULT_CLOCK_FREQUENCY_HZ,
            echo_timeout: super::DEFAULT_ECHO_TIMEOUT,
            poll_interval: super::DEFAULT_POLL_INTERVAL,
            lock_timeout: super::DEFAULT_LOCK_TIMEOUT,
            mux_settle: super::DEFAULT_MUX_SETTLE,
            mux_channel_count: super::DEFAULT_MUX_CHANNELS,
            command_channel_count: super::DEFAULT_COMMAND_CHANNELS,
            sfp_restore: SfpRestore::default(),
            endpoints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_timestamp_halves() {
        let ts = TimestampWord::from_halves(0x1234_5678, 0x9abc_def0);
        assert_eq!(ts.value(), 0x1234_5678_9abc_def0);
        assert_eq!(ts.high(), 0x1234_5678);
        assert_eq!(ts.low(), 0x9abc_def0);
    }

    proptest! {
        #[test]
        fn timestamp_round_trips_through_halves(v in any::<u64>()) {
            let ts = TimestampWord(v);
            prop_assert_eq!(u64::from(ts.high()), v >> 32);
            prop_assert_eq!(u64::from(ts.low()), v & 0xFFFF_FFFF);
            prop_assert_eq!(TimestampWord::from_halves(ts.high(), ts.low()), ts);
        }
    }

    #[test]
    fn test_rtt_from_timestamps() {
        let tx = TimestampWord::from_halves(0, 1000);
        let rx = TimestampWord::from_halves(0, 1500);
        let rtt = RttMeasurement::from_timestamps(tx, rx).unwrap();
        assert_eq!(rtt.round_trip_ticks, 500);

        // Low half rolls over between transmit and receive
        let tx = TimestampWord::from_halves(7, 0xFFFF_FF00);
        let rx = TimestampWord::from_halves(8, 0x0000_0010);
        let rtt = RttMeasurement::from_timestamps(tx, rx).unwrap();
        assert_eq!(rtt.round_trip_ticks, 0x110);

        // Counter wraps past 2^64
        let tx = TimestampWord(u64::MAX - 9);
        let rx = TimestampWord(10);
        let rtt = RttMeasurement::from_timestamps(tx, rx).unwrap();
        assert_eq!(rtt.round_trip_ticks, 20);
    }

    #[test]
    fn test_rtt_rejects_implausible_delta() {
        let tx = TimestampWord::from_halves(0, 0);
        let rx = TimestampWord::from_halves(2, 0);
        assert!(matches!(
            RttMeasurement::from_timestamps(tx, rx),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_endpoint_address_validation() {
        assert!(EndpointAddress::new(0x1234).is_ok());
        assert!(matches!(
            EndpointAddress::new(0x1_0000),
            Err(Error::InvalidAddress { address: 0x1_0000 })
        ));
        assert!(EndpointAddress::NONE.validate().is_ok());
        assert!(EndpointAddress::NONE.validate_target().is_err());
        assert_eq!(EndpointAddress(0x2a).to_string(), "0x2a");
    }

    #[test]
    fn test_timestamp_wall_clock_conversion() {
        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ts = TimestampWord::from_datetime(time, 62_500_000).unwrap();
        assert_eq!(ts.value(), 1_709_294_400u64 * 62_500_000);
        assert_eq!(ts.to_datetime(62_500_000), Some(time));
        assert_eq!(ts.to_datetime(0), None);
    }

    #[test]
    fn test_timestamp_out_of_counter_range() {
        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        assert!(matches!(
            TimestampWord::from_datetime(before_epoch, 62_500_000),
            Err(Error::Protocol(_))
        ));

        let time = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(matches!(
            TimestampWord::from_datetime(time, u64::MAX),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_fixed_length_command_codes() {
        assert_eq!(FixedLengthCommand::RunStart.code(), 4);
        assert_eq!(
            FixedLengthCommand::try_from(7).unwrap(),
            FixedLengthCommand::Trigger
        );
        assert!(FixedLengthCommand::try_from(0x10).is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: DesignConfig = serde_json::from_str(
            r#"{
                "family": "master-mux",
                "echo_timeout": 300,
                "sfp_restore": "always",
                "endpoints": [
                    {"id": "crp0", "address": 5, "delay": {"coarse": 3, "fine": 1, "phase": 2}, "mux_channel": 4}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.family, "master-mux");
        assert_eq!(config.echo_timeout, Duration::from_millis(300));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.sfp_restore, SfpRestore::Always);
        assert_eq!(config.registers, RegisterMap::default());
        assert_eq!(config.endpoints[0].address, EndpointAddress(5));
        assert_eq!(config.endpoints[0].mux_channel, Some(MuxChannel(4)));
    }
}
