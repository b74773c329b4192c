use thiserror::Error;

/// Errors raised by the calibration layer
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Echo not received within {timeout_ms} ms")]
    EchoTimeout {
        /// Timeout that elapsed without the done bit being observed
        timeout_ms: u64,
    },

    #[error("Lock failure: {target} did not lock")]
    LockFailure {
        /// Link that failed to lock, e.g. "upstream endpoint" or "mux channel 3"
        target: String,
    },

    #[error("Invalid endpoint address: {address:#x}")]
    InvalidAddress { address: u32 },

    #[error("Invalid channel {channel} (device has {channel_count})")]
    InvalidChannel { channel: u32, channel_count: u32 },

    #[error("Register {path} read before dispatch")]
    NotDispatched { path: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Capability not supported by this design: {capability}")]
    Unsupported { capability: &'static str },

    #[error("Unknown design family: {0}")]
    UnknownDesign(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        Error::Bus(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new lock failure for the named link
    pub fn lock_failure(target: impl Into<String>) -> Self {
        Error::LockFailure { target: target.into() }
    }

    /// Echo timeouts and lock failures concern a single optical link.
    ///
    /// A channel scan skips these and moves on; everywhere else they end the
    /// calling operation.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::EchoTimeout { .. } | Error::LockFailure { .. })
    }

    /// Hardware state is unknown after these, so nothing may continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bus(_) | Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::bus("device unreachable");
        assert!(matches!(err, Error::Bus(_)));
        assert_eq!(err.to_string(), "Bus error: device unreachable");
    }

    #[test]
    fn test_echo_timeout_message() {
        let err = Error::EchoTimeout { timeout_ms: 300 };
        assert_eq!(err.to_string(), "Echo not received within 300 ms");
    }

    #[test]
    fn test_classification() {
        assert!(Error::EchoTimeout { timeout_ms: 1 }.is_link_failure());
        assert!(Error::lock_failure("mux channel 2").is_link_failure());
        assert!(!Error::bus("x").is_link_failure());

        assert!(Error::bus("x").is_fatal());
        assert!(Error::Cancelled.is_fatal());
        assert!(!Error::lock_failure("upstream endpoint").is_fatal());
        assert!(!Error::InvalidChannel { channel: 9, channel_count: 8 }.is_fatal());
    }
}
