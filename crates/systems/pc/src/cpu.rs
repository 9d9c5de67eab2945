//! PC CPU wrapper
//!
//! Wraps the core x86 CPU with the boot-time register state of this machine.

use emu_core::cpu_x86::{CpuFault, CpuX86, Registers, StepEvent};
use emu_core::memory::Memory;

/// PC CPU wrapper
pub struct PcCpu {
    cpu: CpuX86<Memory>,
    boot_address: u32,
    stack_top: u32,
}

impl PcCpu {
    /// Create a CPU over `memory`, already in its boot state
    pub fn new(memory: Memory, boot_address: u32, stack_top: u32) -> Self {
        let mut pc = Self {
            cpu: CpuX86::new(memory),
            boot_address,
            stack_top,
        };
        pc.reset();
        pc
    }

    /// Back to the boot state: EIP at the boot address, ESP at the boot
    /// stack, flags and everything else zero.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.regs.eip = self.boot_address;
        self.cpu.regs.esp = self.stack_top;
        self.cpu.regs.flags = 0;
    }

    /// Execute one instruction
    pub fn step(&mut self) -> Result<StepEvent, CpuFault> {
        self.cpu.step()
    }

    pub fn memory(&self) -> &Memory {
        &self.cpu.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.cpu.memory
    }

    pub fn registers(&self) -> Registers {
        self.cpu.regs
    }

    pub fn set_registers(&mut self, regs: &Registers) {
        self.cpu.regs = *regs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::memory::MemoryBus;

    #[test]
    fn test_cpu_initialization() {
        let cpu = PcCpu::new(Memory::default(), 0x7C00, 0x7C00);
        let regs = cpu.registers();

        assert_eq!(regs.eip, 0x7C00);
        assert_eq!(regs.esp, 0x7C00);
        assert_eq!(regs.flags, 0);
        assert_eq!(regs.eax, 0);
    }

    #[test]
    fn test_cpu_reset() {
        let mut memory = Memory::default();
        memory.write_u8(0x7C00, 0xF4).unwrap();
        let mut cpu = PcCpu::new(memory, 0x7C00, 0x7000);

        assert_eq!(cpu.step(), Ok(StepEvent::Halt));
        let mut regs = cpu.registers();
        regs.ebx = 0x1234;
        cpu.set_registers(&regs);

        cpu.reset();

        let regs = cpu.registers();
        assert_eq!(regs.eip, 0x7C00);
        assert_eq!(regs.esp, 0x7000);
        assert_eq!(regs.ebx, 0);
        // No longer halted: the HLT executes again
        assert_eq!(cpu.step(), Ok(StepEvent::Halt));
        assert_eq!(cpu.registers().eip, 0x7C01);
    }

    #[test]
    fn test_register_save_load() {
        let mut cpu = PcCpu::new(Memory::new(0x8000), 0x7C00, 0x7C00);

        let mut regs = cpu.registers();
        regs.set_ax(0x1234);
        regs.set_bx(0x5678);
        regs.cs = 0xABCD;
        cpu.set_registers(&regs);

        let saved = cpu.registers();
        cpu.reset();
        assert_eq!(cpu.registers().ax(), 0);

        cpu.set_registers(&saved);
        assert_eq!(cpu.registers().ax(), 0x1234);
        assert_eq!(cpu.registers().bx(), 0x5678);
        assert_eq!(cpu.registers().cs, 0xABCD);
    }
}
