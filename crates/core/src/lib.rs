//! Core emulator primitives and traits.

pub mod cpu_x86;
pub mod logging;
pub mod memory;

use serde_json::Value;

/// A CPU-like component that can be stepped one instruction at a time.
pub trait Cpu {
    /// What a retired instruction asks of the surrounding system
    type Event;
    /// Why execution could not continue
    type Fault: std::error::Error;

    fn reset(&mut self);
    fn step(&mut self) -> Result<Self::Event, Self::Fault>;
}

/// Description of a mount point (media slot) that a system supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Unique identifier for this mount point (e.g., "Floppy")
    pub id: String,
    /// User-friendly name for display
    pub name: String,
    /// File extensions accepted by this mount point (e.g., ["img", "bin"])
    pub extensions: Vec<String>,
    /// Whether this mount point is required for the system to run
    pub required: bool,
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to the initial boot state
    fn reset(&mut self);

    /// Return a JSON-serializable save state for debugging.
    /// Save states hold machine state only, never the mounted media.
    fn save_state(&self) -> Value;

    /// Load a JSON save state.
    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;

    /// Get the list of mount points this system supports
    fn mount_points(&self) -> Vec<MountPointInfo>;

    /// Load media into a specific mount point
    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Check if a mount point has media loaded
    fn is_mounted(&self, mount_point_id: &str) -> bool;
}
