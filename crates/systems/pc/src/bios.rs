//! BIOS interrupt services
//!
//! The dispatcher is a pure function of the interrupt request and the
//! storage image. It describes what the service does as an
//! [`InterruptEffect`]; the system applies that effect to memory, registers
//! and the display before the next instruction is fetched.
//!
//! Services:
//! - INT 10h AH=00h: set video mode (clears the screen)
//! - INT 10h AH=02h: set cursor position (DH=row, DL=column)
//! - INT 10h AH=0Eh: teletype output of AL
//! - INT 13h: read AL sectors from CH/DH/CL into memory at BX

use crate::disk::{DiskError, DiskRequest, StorageImage};
use emu_core::cpu_x86::{InterruptRequest, Registers, FLAG_CF};
use emu_core::logging::{log, LogCategory, LogLevel};

pub const INT_VIDEO: u8 = 0x10;
pub const INT_DISK: u8 = 0x13;

/// Display operation requested by INT 10h
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    SetMode(u8),
    SetCursor { row: u8, col: u8 },
    Teletype(u8),
}

/// Bytes to store in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWrite {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Interrupt vector and AH value with no handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedService {
    pub vector: u8,
    pub function: u8,
}

/// Everything a service call changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptEffect {
    /// Replacement register file
    pub registers: Option<Registers>,
    pub memory_writes: Vec<MemoryWrite>,
    pub display: Vec<DisplayCommand>,
    pub unsupported: Option<UnsupportedService>,
}

impl InterruptEffect {
    fn unsupported(vector: u8, function: u8) -> Self {
        Self {
            unsupported: Some(UnsupportedService { vector, function }),
            ..Self::default()
        }
    }
}

/// Service one software interrupt.
///
/// Only a failed disk read is an error. Unknown vectors and sub-functions come
/// back as an effect with `unsupported` set, since boot code probes for
/// services it can live without.
pub fn dispatch(
    request: &InterruptRequest,
    disk: &StorageImage,
) -> Result<InterruptEffect, DiskError> {
    let regs = &request.regs;
    log(LogCategory::Interrupts, LogLevel::Debug, || {
        format!(
            "INT {:02X}h AX={:04X} BX={:04X} CX={:04X} DX={:04X}",
            request.vector,
            regs.ax(),
            regs.bx(),
            regs.cx(),
            regs.dx()
        )
    });

    match request.vector {
        INT_VIDEO => Ok(video_service(regs)),
        INT_DISK => disk_read(regs, disk),
        vector => Ok(InterruptEffect::unsupported(vector, regs.ah())),
    }
}

fn video_service(regs: &Registers) -> InterruptEffect {
    let command = match regs.ah() {
        0x00 => DisplayCommand::SetMode(regs.al()),
        0x02 => DisplayCommand::SetCursor {
            row: regs.dh(),
            col: regs.dl(),
        },
        0x0E => DisplayCommand::Teletype(regs.al()),
        function => return InterruptEffect::unsupported(INT_VIDEO, function),
    };
    InterruptEffect {
        display: vec![command],
        ..InterruptEffect::default()
    }
}

/// INT 13h read sectors. AH is not checked: every call is a read.
fn disk_read(regs: &Registers, disk: &StorageImage) -> Result<InterruptEffect, DiskError> {
    let request = DiskRequest::from_registers(regs);
    let data = disk.read_sectors(&request).inspect_err(|e| {
        log(LogCategory::Disk, LogLevel::Error, || format!("INT 13h: {}", e));
    })?;

    let mut out = *regs;
    out.set_ah(0x00);
    out.set_flag(FLAG_CF, false);

    Ok(InterruptEffect {
        registers: Some(out),
        memory_writes: vec![MemoryWrite {
            address: regs.bx() as u32,
            data: data.to_vec(),
        }],
        ..InterruptEffect::default()
    })
}
