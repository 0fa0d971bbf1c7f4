//! Stage1 installation.
//!
//! Splices a first-stage boot-sector binary into a target image and patches
//! in the location of the second stage. The splice preserves the short-jump
//! instruction at the sector start and skips the filesystem header region,
//! which was already written by the formatter and must survive untouched.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use mapfile::MapFile;

use crate::{bpb, DiskImageError, SECTOR_SIZE};

/// Real-mode load address stage1 binaries are linked against. Every
/// symbol-derived offset subtracts this constant.
pub const LOAD_BASE: u64 = 0x7c00;

/// Length of the short-jump instruction at the start of the boot sector.
const JUMP_LEN: u64 = 3;

/// How the stage2 location field is computed.
///
/// `RawSector` records the given sector as-is, for stage2 stored in a
/// pre-reserved sector run. `FilesystemFile` compensates for stage2 living
/// as a cluster-aligned file on the filesystem by adding
/// `sectors_per_cluster - 1`, read from the target's own BPB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    RawSector,
    FilesystemFile,
}

/// The five bytes written at the stage2 location field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchRecord {
    pub stage2_first_sector: u32,
    pub stage2_sector_count: u8,
}

impl PatchRecord {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.stage2_first_sector)?;
        w.write_u8(self.stage2_sector_count)
    }
}

/// Offsets of interest inside a stage1 binary, rebased from [`LOAD_BASE`].
#[derive(Debug, Clone, Copy)]
pub struct Stage1Layout {
    pub entry_offset: u64,
    pub stage2_field_offset: u64,
}

impl Stage1Layout {
    /// Resolves both offsets from the stage1 companion map. Both must
    /// resolve before any byte of a target is written; callers rely on
    /// this to never partially patch on a missing symbol.
    pub fn from_map(map: &MapFile) -> Result<Self, DiskImageError> {
        let entry_offset = rebased(map, "__entry_start")?;
        let stage2_field_offset = rebased(map, "stage2_location")?;
        if entry_offset < JUMP_LEN {
            return Err(DiskImageError::SymbolOutOfRange {
                symbol: "__entry_start".to_string(),
                address: entry_offset + LOAD_BASE,
            });
        }
        Ok(Stage1Layout {
            entry_offset,
            stage2_field_offset,
        })
    }
}

fn rebased(map: &MapFile, symbol: &str) -> Result<u64, DiskImageError> {
    let address = map.require(symbol)?;
    address
        .checked_sub(LOAD_BASE)
        .ok_or_else(|| DiskImageError::SymbolOutOfRange {
            symbol: symbol.to_string(),
            address,
        })
}

/// Installs stage1 into `target` and records where stage2 begins.
///
/// The stage1 binary must have a companion `.map` file next to it defining
/// `__entry_start` and `stage2_location`. The splice copies the 3-byte jump
/// verbatim, skips `[3, entry_offset - 3)` (the filesystem header), and
/// copies the rest of stage1 starting at `entry_offset - 3`. A stage1
/// shorter than its entry offset leaves nothing to copy past end-of-file;
/// that is accepted silently.
pub fn install(
    target: &Path,
    stage1: &Path,
    stage2_first_sector: u32,
    stage2_sector_count: u8,
    partition_offset_sectors: u64,
    mode: PatchMode,
) -> Result<(), DiskImageError> {
    if !stage1.exists() {
        return Err(DiskImageError::MissingArtifact {
            path: stage1.to_path_buf(),
        });
    }
    let map_path = stage1.with_extension("map");
    if !map_path.exists() {
        return Err(DiskImageError::MissingArtifact { path: map_path });
    }

    // Validate-then-patch: resolve everything before the target is opened.
    let map = MapFile::load(&map_path)?;
    let layout = Stage1Layout::from_map(&map)?;

    let base = partition_offset_sectors * SECTOR_SIZE;
    let resume = layout.entry_offset - JUMP_LEN;

    let mut src = File::open(stage1).map_err(|e| DiskImageError::io(stage1, 0, e))?;
    let mut dst = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(target)
        .map_err(|e| DiskImageError::io(target, base, e))?;

    // Short-jump instruction at the sector start, byte for byte.
    let mut jump = [0u8; JUMP_LEN as usize];
    src.read_exact(&mut jump)
        .map_err(|e| DiskImageError::io(stage1, 0, e))?;
    dst.seek(SeekFrom::Start(base))
        .map_err(|e| DiskImageError::io(target, base, e))?;
    dst.write_all(&jump)
        .map_err(|e| DiskImageError::io(target, base, e))?;

    // Resume past the filesystem header region.
    src.seek(SeekFrom::Start(resume))
        .map_err(|e| DiskImageError::io(stage1, resume, e))?;
    dst.seek(SeekFrom::Start(base + resume))
        .map_err(|e| DiskImageError::io(target, base + resume, e))?;
    io::copy(&mut src, &mut dst).map_err(|e| DiskImageError::io(target, base + resume, e))?;

    let record = PatchRecord {
        stage2_first_sector: match mode {
            PatchMode::RawSector => stage2_first_sector,
            PatchMode::FilesystemFile => {
                let spc = bpb::sectors_per_cluster(target, partition_offset_sectors)?;
                stage2_first_sector + u32::from(spc).saturating_sub(1)
            }
        },
        stage2_sector_count,
    };

    let field = base + layout.stage2_field_offset;
    dst.seek(SeekFrom::Start(field))
        .map_err(|e| DiskImageError::io(target, field, e))?;
    record
        .write_to(&mut dst)
        .map_err(|e| DiskImageError::io(target, field, e))?;

    Ok(())
}
