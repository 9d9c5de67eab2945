//! Storage image for INT 13h disk reads
//!
//! The mounted image doubles as the boot floppy: sectors are addressed by
//! cylinder/head/sector and mapped straight onto byte offsets in the image.

use emu_core::cpu_x86::Registers;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("invalid sector number {sector} (sectors are numbered from 1)")]
    InvalidSector { sector: u8 },
    #[error("disk read of {length} bytes at offset 0x{offset:X} runs past end of image ({image_len} bytes)")]
    ReadOutOfRange {
        offset: usize,
        length: usize,
        image_len: usize,
    },
    #[error("CHS address C={cylinder} H={head} S={sector} overflows the byte offset")]
    AddressOverflow { cylinder: u32, head: u32, sector: u8 },
}

/// Largest sectors-per-track value a config may set
pub const MAX_SECTORS_PER_TRACK: u32 = 255;
/// Largest heads-per-cylinder value a config may set
pub const MAX_HEADS_PER_CYLINDER: u32 = 256;
/// Largest sector size a config may set
pub const MAX_BYTES_PER_SECTOR: u32 = 4096;

/// Fixed drive geometry used for CHS translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskGeometry {
    pub sectors_per_track: u32,
    pub heads_per_cylinder: u32,
    pub bytes_per_sector: u32,
}

impl Default for DiskGeometry {
    /// 1.44MB floppy layout
    fn default() -> Self {
        Self {
            sectors_per_track: 18,
            heads_per_cylinder: 2,
            bytes_per_sector: 512,
        }
    }
}

impl DiskGeometry {
    /// Byte offset of a CHS address.
    ///
    /// `((S - 1) + C * SPT + H * SPT * HPC) * BPS`. The cylinder term is
    /// multiplied by sectors-per-track only, which is what boot code written
    /// against this machine expects.
    pub fn offset(&self, cylinder: u32, head: u32, sector: u8) -> Result<usize, DiskError> {
        if sector == 0 {
            return Err(DiskError::InvalidSector { sector });
        }
        let overflow = DiskError::AddressOverflow { cylinder, head, sector };
        let spt = self.sectors_per_track as usize;
        let track = (cylinder as usize).checked_mul(spt);
        let side = (head as usize)
            .checked_mul(spt)
            .and_then(|n| n.checked_mul(self.heads_per_cylinder as usize));
        let linear = track
            .zip(side)
            .and_then(|(track, side)| track.checked_add(side))
            .and_then(|n| n.checked_add(sector as usize - 1));
        linear
            .and_then(|n| n.checked_mul(self.bytes_per_sector as usize))
            .ok_or(overflow)
    }

    /// Zero or out-of-range fields, as a message
    pub fn check(&self) -> Result<(), String> {
        if self.sectors_per_track == 0 || self.heads_per_cylinder == 0 || self.bytes_per_sector == 0
        {
            return Err("disk geometry values must be non-zero".into());
        }
        if self.sectors_per_track > MAX_SECTORS_PER_TRACK
            || self.heads_per_cylinder > MAX_HEADS_PER_CYLINDER
            || self.bytes_per_sector > MAX_BYTES_PER_SECTOR
        {
            return Err(format!(
                "disk geometry {}/{}/{} exceeds {}/{}/{} (sectors/heads/bytes)",
                self.sectors_per_track,
                self.heads_per_cylinder,
                self.bytes_per_sector,
                MAX_SECTORS_PER_TRACK,
                MAX_HEADS_PER_CYLINDER,
                MAX_BYTES_PER_SECTOR
            ));
        }
        Ok(())
    }
}

/// Disk read parameters, as passed in registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskRequest {
    /// Drive number (DL)
    pub drive: u8,
    /// Cylinder number (CH)
    pub cylinder: u8,
    /// Head number (DH)
    pub head: u8,
    /// Sector number, 1-based (CL)
    pub sector: u8,
    /// Number of sectors (AL)
    pub count: u8,
}

impl DiskRequest {
    pub fn from_registers(regs: &Registers) -> Self {
        Self {
            drive: regs.dl(),
            cylinder: regs.ch(),
            head: regs.dh(),
            sector: regs.cl(),
            count: regs.al(),
        }
    }
}

/// Immutable disk image loaded at startup
#[derive(Debug, Clone, Default)]
pub struct StorageImage {
    data: Vec<u8>,
    geometry: DiskGeometry,
}

impl StorageImage {
    pub fn new(data: Vec<u8>, geometry: DiskGeometry) -> Self {
        Self { data, geometry }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the bytes covered by `request`.
    ///
    /// A read that would run past the end of the image fails as a whole;
    /// there is no partial copy.
    pub fn read_sectors(&self, request: &DiskRequest) -> Result<&[u8], DiskError> {
        let offset =
            self.geometry
                .offset(request.cylinder as u32, request.head as u32, request.sector)?;
        let length = (request.count as usize)
            .checked_mul(self.geometry.bytes_per_sector as usize)
            .ok_or(DiskError::AddressOverflow {
                cylinder: request.cylinder as u32,
                head: request.head as u32,
                sector: request.sector,
            })?;

        log(LogCategory::Disk, LogLevel::Debug, || {
            format!(
                "Disk read: drive={:02X} C={} H={} S={} count={} -> offset=0x{:X}",
                request.drive, request.cylinder, request.head, request.sector, request.count, offset
            )
        });

        match offset.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(DiskError::ReadOutOfRange {
                offset,
                length,
                image_len: self.data.len(),
            }),
        }
    }
}
