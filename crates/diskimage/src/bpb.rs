//! Boot Parameter Block reads.
//!
//! Only the handful of fields needed to locate the data region are read,
//! at byte offsets fixed by the chosen filesystem variant. Offsets are
//! relative to the partition start; nothing is sniffed from the image.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{DiskImageError, SECTOR_SIZE};

const BPB_SECTORS_PER_CLUSTER: u64 = 13;
const BPB_RESERVED_SECTORS: u64 = 14;
const BPB_FAT_SIZE_16: u64 = 22;
const BPB_FAT_SIZE_32: u64 = 36;

/// Supported FAT variants. The variant decides which FAT-size field is
/// read; it is chosen by configuration, never detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsVariant {
    Fat12,
    Fat16,
    Fat32,
}

impl FsVariant {
    pub fn parse(name: &str) -> Result<Self, DiskImageError> {
        match name {
            "fat12" => Ok(FsVariant::Fat12),
            "fat16" => Ok(FsVariant::Fat16),
            "fat32" => Ok(FsVariant::Fat32),
            other => Err(DiskImageError::UnsupportedFilesystem {
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FsVariant::Fat12 => "fat12",
            FsVariant::Fat16 => "fat16",
            FsVariant::Fat32 => "fat32",
        }
    }
}

/// The BPB fields consumed by the build, read once per image.
#[derive(Debug, Clone, Copy)]
pub struct BootParams {
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub fat_size: u32,
}

impl BootParams {
    /// First sector of the data region, in sectors relative to the
    /// partition start. No rounding, no consistency validation beyond the
    /// fields themselves.
    pub fn first_data_sector(&self) -> u32 {
        u32::from(self.reserved_sectors) + self.fat_size * u32::from(self.num_fats)
    }
}

/// Reads the geometry fields from the image's BPB.
pub fn read_boot_params(
    image: &Path,
    partition_start_sector: u64,
    variant: FsVariant,
) -> Result<BootParams, DiskImageError> {
    let base = partition_start_sector * SECTOR_SIZE;
    let mut file = File::open(image).map_err(|e| DiskImageError::io(image, base, e))?;

    file.seek(SeekFrom::Start(base + BPB_RESERVED_SECTORS))
        .map_err(|e| DiskImageError::io(image, base + BPB_RESERVED_SECTORS, e))?;
    let reserved_sectors = file
        .read_u16::<LittleEndian>()
        .map_err(|e| DiskImageError::io(image, base + BPB_RESERVED_SECTORS, e))?;
    // The FAT count is the byte right after the reserved-sector field.
    let num_fats = file
        .read_u8()
        .map_err(|e| DiskImageError::io(image, base + BPB_RESERVED_SECTORS + 2, e))?;

    let fat_size = match variant {
        FsVariant::Fat32 => {
            file.seek(SeekFrom::Start(base + BPB_FAT_SIZE_32))
                .map_err(|e| DiskImageError::io(image, base + BPB_FAT_SIZE_32, e))?;
            file.read_u32::<LittleEndian>()
                .map_err(|e| DiskImageError::io(image, base + BPB_FAT_SIZE_32, e))?
        }
        FsVariant::Fat12 | FsVariant::Fat16 => {
            file.seek(SeekFrom::Start(base + BPB_FAT_SIZE_16))
                .map_err(|e| DiskImageError::io(image, base + BPB_FAT_SIZE_16, e))?;
            u32::from(
                file.read_u16::<LittleEndian>()
                    .map_err(|e| DiskImageError::io(image, base + BPB_FAT_SIZE_16, e))?,
            )
        }
    };

    Ok(BootParams {
        reserved_sectors,
        num_fats,
        fat_size,
    })
}

/// First sector of the data region, relative to the partition start.
pub fn first_data_sector(
    image: &Path,
    partition_start_sector: u64,
    variant: FsVariant,
) -> Result<u32, DiskImageError> {
    Ok(read_boot_params(image, partition_start_sector, variant)?.first_data_sector())
}

/// Sectors-per-cluster byte of the image's BPB.
pub fn sectors_per_cluster(
    image: &Path,
    partition_start_sector: u64,
) -> Result<u8, DiskImageError> {
    let offset = partition_start_sector * SECTOR_SIZE + BPB_SECTORS_PER_CLUSTER;
    let mut file = File::open(image).map_err(|e| DiskImageError::io(image, offset, e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| DiskImageError::io(image, offset, e))?;
    file.read_u8()
        .map_err(|e| DiskImageError::io(image, offset, e))
}
