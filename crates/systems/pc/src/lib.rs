//! Tinybox PC system
//!
//! A minimal x86 machine for boot-sector code: flat RAM loaded from a disk
//! image, a text display, and BIOS video and disk services. The system owns
//! every piece of state, so independent instances can run side by side.
//!
//! One [`PcSystem::step`] executes one instruction completely, including any
//! interrupt service it triggers, before the next fetch.

mod bios;
mod config;
mod cpu;
mod disk;
mod video;

use cpu::PcCpu;
use emu_core::cpu_x86::StepEvent;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::memory::{Memory, MemoryBus, MemoryError};
use emu_core::{MountPointInfo, System};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub use bios::{
    dispatch, DisplayCommand, InterruptEffect, MemoryWrite, UnsupportedService, INT_DISK,
    INT_VIDEO,
};
pub use config::{
    ConfigError, MachineConfig, BOOT_ADDRESS, BOOT_STACK_TOP, DEFAULT_MAX_STEPS,
};
pub use disk::{
    DiskError, DiskGeometry, DiskRequest, StorageImage, MAX_BYTES_PER_SECTOR,
    MAX_HEADS_PER_CYLINDER, MAX_SECTORS_PER_TRACK,
};
pub use emu_core::cpu_x86::{CpuFault, InterruptRequest, Registers};
pub use video::{
    DisplayCell, DisplayEvent, DisplaySink, NullSink, RecordingSink, SharedDisplay, TextDisplay,
    DEFAULT_ATTRIBUTE,
};

/// Mount point id of the boot disk
pub const FLOPPY_MOUNT: &str = "Floppy";

/// Save state format version
const SAVE_STATE_VERSION: u64 = 1;

/// Startup and load errors
#[derive(Debug, Error)]
pub enum PcError {
    #[error("failed to read disk image {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid mount point: {0}")]
    InvalidMountPoint(String),
}

/// Why the machine stopped executing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error(transparent)]
    Cpu(#[from] CpuFault),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error("unsupported interrupt {vector:02X}h function {function:02X}h")]
    UnsupportedInterrupt { vector: u8, function: u8 },
}

/// Execution state of the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Halted,
    Faulted(Fault),
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::Halted => write!(f, "halted"),
            RunState::Faulted(fault) => write!(f, "faulted: {}", fault),
        }
    }
}

/// How a call to [`PcSystem::run`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Halted,
    Faulted(Fault),
    /// The step budget ran out while the machine was still running
    StepLimitExceeded,
    /// The host asked the loop to stop
    Cancelled,
}

/// Final state handed back to the caller of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Steps executed by this run
    pub steps: u64,
    pub registers: Registers,
}

/// Cooperative stop request, checked between instructions
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn lock_display(display: &SharedDisplay) -> MutexGuard<'_, TextDisplay> {
    display
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// PC system state
pub struct PcSystem {
    config: MachineConfig,
    cpu: PcCpu,
    storage: StorageImage,
    mounted: bool,
    display: SharedDisplay,
    sink: Box<dyn DisplaySink>,
    state: RunState,
    steps: u64,
}

impl Default for PcSystem {
    fn default() -> Self {
        Self::build(MachineConfig::default())
    }
}

impl PcSystem {
    /// Create a system with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a system with a custom configuration
    pub fn with_config(config: MachineConfig) -> Result<Self, PcError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MachineConfig) -> Self {
        let memory = Memory::new(config.memory_size);
        let cpu = PcCpu::new(memory, config.boot_address, config.stack_top);
        let display = Arc::new(Mutex::new(Self::blank_display(&config)));
        Self {
            storage: StorageImage::new(Vec::new(), config.geometry),
            config,
            cpu,
            mounted: false,
            display,
            sink: Box::new(NullSink),
            state: RunState::Running,
            steps: 0,
        }
    }

    fn blank_display(config: &MachineConfig) -> TextDisplay {
        TextDisplay::new(
            config.display_width,
            config.display_height,
            config.default_attribute,
        )
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Route display output to `sink`
    pub fn set_display_sink(&mut self, sink: Box<dyn DisplaySink>) {
        self.sink = sink;
    }

    /// Handle to the display grid, for a host render thread
    pub fn display(&self) -> SharedDisplay {
        Arc::clone(&self.display)
    }

    /// Screen contents as text
    pub fn screen_text(&self) -> String {
        lock_display(&self.display).to_text()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn registers(&self) -> Registers {
        self.cpu.registers()
    }

    pub fn set_registers(&mut self, regs: &Registers) {
        self.cpu.set_registers(regs);
    }

    pub fn memory(&self) -> &Memory {
        self.cpu.memory()
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        self.cpu.memory_mut()
    }

    pub fn storage(&self) -> &StorageImage {
        &self.storage
    }

    /// Steps executed since the last reset
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Read a disk image from `path` and load it.
    ///
    /// The file is read in full and closed before anything is loaded.
    pub fn load_image_from_path(&mut self, path: &Path) -> Result<(), PcError> {
        let data = std::fs::read(path).map_err(|source| PcError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_image(&data)
    }

    /// Load a disk image into memory and keep it as the storage image.
    ///
    /// The image lands at offset 0; the rest of memory is zero. With
    /// `copy_boot_sector` set, the image is also placed at the boot address,
    /// cut off at the end of memory. On error the machine is left exactly as
    /// it was.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), PcError> {
        let mut memory = Memory::new(self.config.memory_size);
        memory.load_image(image)?;

        if self.config.copy_boot_sector {
            let boot = self.config.boot_address;
            let room = memory.size().saturating_sub(boot as usize);
            let len = image.len().min(room);
            memory.write(boot, &image[..len])?;
        }

        log(LogCategory::Memory, LogLevel::Info, || {
            format!(
                "Loaded {} byte image into {} bytes of memory",
                image.len(),
                memory.size()
            )
        });

        *self.cpu.memory_mut() = memory;
        self.storage = StorageImage::new(image.to_vec(), self.config.geometry);
        self.mounted = true;
        self.reset();
        Ok(())
    }

    /// Execute one instruction, servicing any interrupt it raises.
    ///
    /// Does nothing once the machine has halted or faulted.
    pub fn step(&mut self) -> RunState {
        if self.state != RunState::Running {
            return self.state.clone();
        }

        self.state = match self.cpu.step() {
            Ok(StepEvent::Continue) => RunState::Running,
            Ok(StepEvent::Halt) => RunState::Halted,
            Ok(StepEvent::Interrupt(request)) => match self.service_interrupt(&request) {
                Ok(()) => RunState::Running,
                Err(fault) => RunState::Faulted(fault),
            },
            Err(fault) => RunState::Faulted(fault.into()),
        };
        self.steps += 1;

        if let RunState::Faulted(fault) = &self.state {
            log(LogCategory::CPU, LogLevel::Error, || {
                format!("CPU: fault after {} steps: {}", self.steps, fault)
            });
        }
        self.state.clone()
    }

    fn service_interrupt(&mut self, request: &InterruptRequest) -> Result<(), Fault> {
        let effect = bios::dispatch(request, &self.storage)?;
        self.apply_effect(effect)
    }

    /// Apply a service result: memory first, then registers, then display.
    fn apply_effect(&mut self, effect: InterruptEffect) -> Result<(), Fault> {
        if let Some(UnsupportedService { vector, function }) = effect.unsupported {
            log(LogCategory::Stubs, LogLevel::Warn, || {
                format!("Unsupported interrupt {:02X}h AH={:02X}h", vector, function)
            });
            if self.config.halt_on_unsupported_interrupt {
                return Err(Fault::UnsupportedInterrupt { vector, function });
            }
        }

        for write in &effect.memory_writes {
            self.cpu.memory_mut().write(write.address, &write.data)?;
        }

        if let Some(regs) = effect.registers {
            self.cpu.set_registers(&regs);
        }

        if !effect.display.is_empty() {
            let mut display = lock_display(&self.display);
            let sink = self.sink.as_mut();
            for command in effect.display {
                match command {
                    DisplayCommand::Teletype(ch) => display.teletype(ch, sink),
                    DisplayCommand::SetMode(_) => display.clear(sink),
                    DisplayCommand::SetCursor { row, col } => {
                        display.set_cursor(row as usize, col as usize)
                    }
                }
            }
        }
        Ok(())
    }

    /// Run until halt, fault or the configured step limit
    pub fn run(&mut self) -> RunReport {
        self.run_with(self.config.max_steps, &CancelToken::default())
    }

    /// Run for at most `max_steps` steps, stopping early if `cancel` fires
    pub fn run_with(&mut self, max_steps: u64, cancel: &CancelToken) -> RunReport {
        let mut steps = 0;
        let outcome = loop {
            match &self.state {
                RunState::Halted => break RunOutcome::Halted,
                RunState::Faulted(fault) => break RunOutcome::Faulted(fault.clone()),
                RunState::Running => {}
            }
            if steps >= max_steps {
                break RunOutcome::StepLimitExceeded;
            }
            if cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            self.step();
            steps += 1;
        };

        log(LogCategory::CPU, LogLevel::Info, || {
            format!("Run stopped after {} steps: {:?}", steps, outcome)
        });

        RunReport {
            outcome,
            steps,
            registers: self.cpu.registers(),
        }
    }
}

impl System for PcSystem {
    type Error = PcError;

    /// Boot registers, blank display, Running. Memory and the disk stay.
    fn reset(&mut self) {
        self.cpu.reset();
        *lock_display(&self.display) = Self::blank_display(&self.config);
        self.state = RunState::Running;
        self.steps = 0;
    }

    fn save_state(&self) -> Value {
        let regs = self.cpu.registers();
        let (row, col) = lock_display(&self.display).cursor();
        json!({
            "version": SAVE_STATE_VERSION,
            "registers": regs,
            "steps": self.steps,
            "state": self.state.to_string(),
            "cursor": [row, col],
        })
    }

    /// Restores registers, step count, cursor and run state.
    ///
    /// Faulted snapshots are rejected since the fault itself is not saved.
    fn load_state(&mut self, state: &Value) -> Result<(), serde_json::Error> {
        let regs: Registers = serde_json::from_value(state["registers"].clone())?;
        let steps: u64 = serde_json::from_value(state["steps"].clone())?;
        let cursor: Option<(usize, usize)> = serde_json::from_value(state["cursor"].clone())?;
        let run_state = match state["state"].as_str() {
            Some("running") => RunState::Running,
            Some("halted") => RunState::Halted,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "cannot resume from state {:?}",
                    other.unwrap_or("<missing>")
                )))
            }
        };

        self.cpu.reset();
        self.cpu.set_registers(&regs);
        self.steps = steps;
        self.state = run_state;
        if let Some((row, col)) = cursor {
            lock_display(&self.display).set_cursor(row, col);
        }
        Ok(())
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: FLOPPY_MOUNT.to_string(),
            name: "Boot Disk".to_string(),
            extensions: vec!["img".to_string(), "ima".to_string(), "bin".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        match mount_point_id {
            FLOPPY_MOUNT => self.load_image(data),
            other => Err(PcError::InvalidMountPoint(other.to_string())),
        }
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        mount_point_id == FLOPPY_MOUNT && self.mounted
    }
}
