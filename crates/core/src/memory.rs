//! Flat, bounds-checked RAM.
//!
//! Unlike a real address bus nothing wraps or mirrors here: every access
//! outside the configured size is reported as [`MemoryError::OutOfBounds`].

use thiserror::Error;

/// Default RAM size: 1 MiB, the real-mode address space
pub const DEFAULT_MEMORY_SIZE: usize = 0x10_0000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory access out of bounds: {length} byte(s) at 0x{address:05X} (size 0x{size:X})")]
    OutOfBounds {
        address: u32,
        length: usize,
        size: usize,
    },
    #[error("image of {image} bytes does not fit in {memory} bytes of memory")]
    ImageTooLarge { image: usize, memory: usize },
}

/// Memory interface used by the CPU core
///
/// Systems plug their RAM into [`crate::cpu_x86::CpuX86`] through this trait.
pub trait MemoryBus {
    /// Size of the addressable range in bytes
    fn size(&self) -> usize;

    /// Borrow `length` bytes starting at `address`
    fn read(&self, address: u32, length: usize) -> Result<&[u8], MemoryError>;

    /// Store `data` starting at `address`; nothing is written on failure
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError>;

    fn read_u8(&self, address: u32) -> Result<u8, MemoryError> {
        Ok(self.read(address, 1)?[0])
    }

    fn write_u8(&mut self, address: u32, val: u8) -> Result<(), MemoryError> {
        self.write(address, &[val])
    }

    /// Little-endian 16-bit read
    fn read_u16(&self, address: u32) -> Result<u16, MemoryError> {
        let bytes = self.read(address, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Fixed-size RAM owned by one machine instance
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create zero-filled memory of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    fn range(&self, address: u32, length: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = address as usize;
        match start.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds {
                address,
                length,
                size: self.data.len(),
            }),
        }
    }

    /// Copy `image` to offset 0.
    ///
    /// Bytes past the image keep their current contents. An image larger than
    /// memory is rejected before anything is written.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), MemoryError> {
        if image.len() > self.data.len() {
            return Err(MemoryError::ImageTooLarge {
                image: image.len(),
                memory: self.data.len(),
            });
        }
        self.data[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Zero all of memory
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Whole contents, for inspection
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl MemoryBus for Memory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&self, address: u32, length: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(address, length)?;
        Ok(&self.data[range])
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(address, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }
}
