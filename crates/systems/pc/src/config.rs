//! Machine configuration
//!
//! Loaded from a JSON file; any field left out takes its default.

use crate::disk::DiskGeometry;
use crate::video::DEFAULT_ATTRIBUTE;
use emu_core::memory::DEFAULT_MEMORY_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Where execution starts
pub const BOOT_ADDRESS: u32 = 0x7C00;
/// Initial stack pointer, growing down from the boot sector
pub const BOOT_STACK_TOP: u32 = 0x7C00;
/// Runaway guard for the run loop
pub const DEFAULT_MAX_STEPS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// RAM size in bytes
    pub memory_size: usize,
    /// Initial EIP
    pub boot_address: u32,
    /// Initial ESP
    pub stack_top: u32,
    /// Also place the image at `boot_address`, so its byte 0 is the first
    /// instruction
    pub copy_boot_sector: bool,
    /// Steps executed by one run before it stops with StepLimitExceeded
    pub max_steps: u64,
    pub display_width: usize,
    pub display_height: usize,
    /// Attribute used for teletype output and blank cells
    pub default_attribute: u8,
    pub geometry: DiskGeometry,
    /// Treat an unsupported interrupt as a fault instead of logging it
    pub halt_on_unsupported_interrupt: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            boot_address: BOOT_ADDRESS,
            stack_top: BOOT_STACK_TOP,
            copy_boot_sector: true,
            max_steps: DEFAULT_MAX_STEPS,
            display_width: 80,
            display_height: 25,
            default_attribute: DEFAULT_ATTRIBUTE,
            geometry: DiskGeometry::default(),
            halt_on_unsupported_interrupt: false,
        }
    }
}

impl MachineConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let config: MachineConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 {
            return Err(ConfigError::Invalid("memory_size must be non-zero".into()));
        }
        if self.boot_address as usize >= self.memory_size {
            return Err(ConfigError::Invalid(format!(
                "boot_address 0x{:X} is outside memory (0x{:X} bytes)",
                self.boot_address, self.memory_size
            )));
        }
        if self.display_width == 0 || self.display_height == 0 {
            return Err(ConfigError::Invalid("display dimensions must be non-zero".into()));
        }
        self.geometry.check().map_err(ConfigError::Invalid)
    }
}
