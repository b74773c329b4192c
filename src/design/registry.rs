use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::bus::RegisterBlock;
use crate::core::{DesignConfig, Error, Result};
use crate::master::MasterNode;
use super::{Design, FanoutMux};

/// Builds a design from a validated configuration
pub type DesignConstructor = fn(&DesignConfig) -> Result<Design>;

/// Resolves device-family tags to design constructors
#[derive(Clone)]
pub struct DesignRegistry {
    constructors: HashMap<String, DesignConstructor>,
}

impl DesignRegistry {
    /// Registry without any family
    pub fn new() -> Self {
        DesignRegistry {
            constructors: HashMap::new(),
        }
    }

    /// Registry knowing the reference families
    pub fn with_builtin_designs() -> Self {
        let mut registry = Self::new();
        registry.register("master", build_master);
        registry.register("ouroboros", build_ouroboros);
        registry.register("master-mux", build_master_mux);
        registry
    }

    /// Adds or replaces the constructor for `family`
    pub fn register(&mut self, family: impl Into<String>, constructor: DesignConstructor) {
        let family = family.into();
        if self.constructors.insert(family.clone(), constructor).is_some() {
            tracing::warn!("Design family {} re-registered", family);
        }
    }

    /// Registered family tags, sorted
    pub fn families(&self) -> Vec<&str> {
        let mut families: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        families.sort_unstable();
        families
    }

    /// Validates `config` and builds the design its family names
    pub fn build(&self, config: &DesignConfig) -> Result<Design> {
        validate_config(config)?;

        let constructor = self
            .constructors
            .get(&config.family)
            .ok_or_else(|| Error::UnknownDesign(config.family.clone()))?;
        let design = constructor(config)?;

        tracing::debug!("Built design {}", config.family);
        Ok(design)
    }
}

impl fmt::Debug for DesignRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesignRegistry")
            .field("families", &self.families())
            .finish()
    }
}

impl Default for DesignRegistry {
    fn default() -> Self {
        Self::with_builtin_designs()
    }
}

fn build_master(config: &DesignConfig) -> Result<Design> {
    let master = MasterNode::from_config(config, false);
    Ok(Design::new(config.clone(), master, None))
}

fn build_ouroboros(config: &DesignConfig) -> Result<Design> {
    let master = MasterNode::from_config(config, true);
    Ok(Design::new(config.clone(), master, None))
}

fn build_master_mux(config: &DesignConfig) -> Result<Design> {
    let master = MasterNode::from_config(config, true);
    let mux = FanoutMux::new(
        RegisterBlock::new(config.registers.mux.clone()),
        config.mux_channel_count,
    );
    Ok(Design::new(config.clone(), master, Some(mux)))
}

/// Validates a design configuration
///
/// Checks that:
/// - Every interval is non-zero
/// - Status polls fit inside the echo and lock timeouts
/// - Channel counts are non-zero
/// - Endpoint addresses and mux channels are in range
pub fn validate_config(config: &DesignConfig) -> Result<()> {
    let intervals = [
        ("echo_timeout", config.echo_timeout),
        ("poll_interval", config.poll_interval),
        ("lock_timeout", config.lock_timeout),
    ];
    for (name, interval) in intervals {
        if interval == Duration::ZERO {
            return Err(Error::config(format!("{} must be non-zero", name)));
        }
    }

    if config.poll_interval > config.echo_timeout || config.poll_interval > config.lock_timeout {
        return Err(Error::config("Poll interval exceeds a timeout"));
    }

    if config.clock_frequency_hz == 0 {
        return Err(Error::config("Clock frequency must be non-zero"));
    }

    if config.mux_channel_count == 0 || config.command_channel_count == 0 {
        return Err(Error::config("Channel counts must be non-zero"));
    }

    for endpoint in &config.endpoints {
        endpoint.address.validate_target().map_err(|e| {
            Error::config(format!("Endpoint {}: {}", endpoint.id, e))
        })?;

        if let Some(channel) = endpoint.mux_channel {
            if channel.index() >= config.mux_channel_count {
                return Err(Error::config(format!(
                    "Endpoint {}: mux channel {} out of range",
                    endpoint.id, channel
                )));
            }
        }
    }

    Ok(())
}
