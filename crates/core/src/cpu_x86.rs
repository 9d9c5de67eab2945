//! Minimal x86 CPU core
//!
//! A fetch/decode/execute core for boot-sector code. Decoding produces an
//! explicit [`Instruction`] value and execution is an exhaustive match over
//! it, so an opcode the core does not know can only surface as
//! [`CpuFault::UnsupportedOpcode`].
//!
//! The core never services interrupts itself. `INT n` hands an
//! [`InterruptRequest`] back to the owning system, which dispatches it before
//! the next step.

use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::MemoryBus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// Flag bit positions in the FLAGS register
pub const FLAG_CF: u16 = 0x0001; // Carry
pub const FLAG_PF: u16 = 0x0004; // Parity
pub const FLAG_AF: u16 = 0x0010; // Auxiliary carry
pub const FLAG_ZF: u16 = 0x0040; // Zero
pub const FLAG_SF: u16 = 0x0080; // Sign
pub const FLAG_TF: u16 = 0x0100; // Trap
pub const FLAG_IF: u16 = 0x0200; // Interrupt enable
pub const FLAG_DF: u16 = 0x0400; // Direction
pub const FLAG_OF: u16 = 0x0800; // Overflow

/// Architectural register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Instruction pointer (linear address)
    pub eip: u32,
    /// Accumulator - low word is AX (AH:AL)
    pub eax: u32,
    /// Base - low word is BX (BH:BL)
    pub ebx: u32,
    /// Count - low word is CX (CH:CL)
    pub ecx: u32,
    /// Data - low word is DX (DH:DL)
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    /// Stack pointer
    pub esp: u32,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub ss: u16,
    pub flags: u16,
}

fn low_word(reg: u32) -> u16 {
    reg as u16
}

fn with_low_word(reg: u32, val: u16) -> u32 {
    (reg & 0xFFFF_0000) | val as u32
}

fn with_low_byte(reg: u32, val: u8) -> u32 {
    (reg & 0xFFFF_FF00) | val as u32
}

fn with_high_byte(reg: u32, val: u8) -> u32 {
    (reg & 0xFFFF_00FF) | ((val as u32) << 8)
}

impl Registers {
    pub fn ax(&self) -> u16 {
        low_word(self.eax)
    }
    pub fn ah(&self) -> u8 {
        (self.eax >> 8) as u8
    }
    pub fn al(&self) -> u8 {
        self.eax as u8
    }
    pub fn bx(&self) -> u16 {
        low_word(self.ebx)
    }
    pub fn bh(&self) -> u8 {
        (self.ebx >> 8) as u8
    }
    pub fn bl(&self) -> u8 {
        self.ebx as u8
    }
    pub fn cx(&self) -> u16 {
        low_word(self.ecx)
    }
    pub fn ch(&self) -> u8 {
        (self.ecx >> 8) as u8
    }
    pub fn cl(&self) -> u8 {
        self.ecx as u8
    }
    pub fn dx(&self) -> u16 {
        low_word(self.edx)
    }
    pub fn dh(&self) -> u8 {
        (self.edx >> 8) as u8
    }
    pub fn dl(&self) -> u8 {
        self.edx as u8
    }

    pub fn set_ax(&mut self, val: u16) {
        self.eax = with_low_word(self.eax, val);
    }
    pub fn set_ah(&mut self, val: u8) {
        self.eax = with_high_byte(self.eax, val);
    }
    pub fn set_al(&mut self, val: u8) {
        self.eax = with_low_byte(self.eax, val);
    }
    pub fn set_bx(&mut self, val: u16) {
        self.ebx = with_low_word(self.ebx, val);
    }
    pub fn set_cx(&mut self, val: u16) {
        self.ecx = with_low_word(self.ecx, val);
    }
    pub fn set_ch(&mut self, val: u8) {
        self.ecx = with_high_byte(self.ecx, val);
    }
    pub fn set_cl(&mut self, val: u8) {
        self.ecx = with_low_byte(self.ecx, val);
    }
    pub fn set_dx(&mut self, val: u16) {
        self.edx = with_low_word(self.edx, val);
    }
    pub fn set_dh(&mut self, val: u8) {
        self.edx = with_high_byte(self.edx, val);
    }
    pub fn set_dl(&mut self, val: u8) {
        self.edx = with_low_byte(self.edx, val);
    }

    pub fn get_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u16, value: bool) {
        if value {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// CLI (0xFA)
    Cli,
    /// HLT (0xF4)
    Hlt,
    /// INT imm8 (0xCD ib)
    Int(u8),
}

impl Instruction {
    /// Encoded length in bytes
    pub fn size(&self) -> u32 {
        match self {
            Instruction::Cli | Instruction::Hlt => 1,
            Instruction::Int(_) => 2,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Cli => write!(f, "cli"),
            Instruction::Hlt => write!(f, "hlt"),
            Instruction::Int(vector) => write!(f, "int 0x{:02X}", vector),
        }
    }
}

/// Conditions that stop the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuFault {
    #[error("instruction fetch out of bounds at 0x{address:05X}")]
    InstructionFetchOutOfBounds { address: u32 },
    #[error("unsupported opcode 0x{opcode:02X} at 0x{address:05X}")]
    UnsupportedOpcode { opcode: u8, address: u32 },
}

/// Software interrupt raised by `INT n`
///
/// Carries a copy of the register file taken after the instruction pointer
/// moved past the `INT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptRequest {
    pub vector: u8,
    pub regs: Registers,
}

/// What one step did, as seen by the owning system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Instruction retired, keep going
    Continue,
    /// CPU is halted
    Halt,
    /// An interrupt must be serviced before the next step
    Interrupt(InterruptRequest),
}

fn fetch<M: MemoryBus>(memory: &M, address: u32) -> Result<u8, CpuFault> {
    memory
        .read_u8(address)
        .map_err(|_| CpuFault::InstructionFetchOutOfBounds { address })
}

/// Decode the instruction at `address`
pub fn decode<M: MemoryBus>(memory: &M, address: u32) -> Result<Instruction, CpuFault> {
    let opcode = fetch(memory, address)?;
    match opcode {
        0xFA => Ok(Instruction::Cli),
        0xF4 => Ok(Instruction::Hlt),
        0xCD => {
            let operand = address
                .checked_add(1)
                .ok_or(CpuFault::InstructionFetchOutOfBounds { address })?;
            Ok(Instruction::Int(fetch(memory, operand)?))
        }
        _ => Err(CpuFault::UnsupportedOpcode { opcode, address }),
    }
}

/// x86 CPU state and execution engine
#[derive(Debug)]
pub struct CpuX86<M: MemoryBus> {
    pub regs: Registers,
    /// Memory interface
    pub memory: M,
    halted: bool,
    /// Instructions retired since reset
    pub instructions: u64,
}

impl<M: MemoryBus> CpuX86<M> {
    pub fn new(memory: M) -> Self {
        Self {
            regs: Registers::default(),
            memory,
            halted: false,
            instructions: 0,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Clear the register file and leave the halted state.
    ///
    /// Memory is not touched.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.halted = false;
        self.instructions = 0;
    }

    /// Fetch, decode and execute one instruction.
    ///
    /// A halted CPU stays halted and does not fetch. On a fault the register
    /// file is left exactly as it was before the step.
    pub fn step(&mut self) -> Result<StepEvent, CpuFault> {
        if self.halted {
            return Ok(StepEvent::Halt);
        }

        let address = self.regs.eip;
        let instruction = decode(&self.memory, address).inspect_err(|fault| {
            log(LogCategory::CPU, LogLevel::Debug, || format!("CPU: {}", fault));
        })?;

        log(LogCategory::CPU, LogLevel::Trace, || {
            format!("CPU: {:05X}  {}", address, instruction)
        });

        Ok(self.execute(instruction))
    }

    /// Apply a decoded instruction to the register file
    pub fn execute(&mut self, instruction: Instruction) -> StepEvent {
        self.regs.eip = self.regs.eip.wrapping_add(instruction.size());
        self.instructions += 1;

        match instruction {
            // Interrupts are not modeled; only the flag changes
            Instruction::Cli => {
                self.regs.set_flag(FLAG_IF, false);
                StepEvent::Continue
            }
            Instruction::Hlt => {
                self.halted = true;
                StepEvent::Halt
            }
            Instruction::Int(vector) => StepEvent::Interrupt(InterruptRequest {
                vector,
                regs: self.regs,
            }),
        }
    }
}

impl<M: MemoryBus> crate::Cpu for CpuX86<M> {
    type Event = StepEvent;
    type Fault = CpuFault;

    fn reset(&mut self) {
        CpuX86::reset(self);
    }

    fn step(&mut self) -> Result<StepEvent, CpuFault> {
        CpuX86::step(self)
    }
}
