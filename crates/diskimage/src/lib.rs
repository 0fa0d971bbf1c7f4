use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use mapfile::MapError;

pub mod bpb;
pub mod stage1;

pub use bpb::{first_data_sector, read_boot_params, sectors_per_cluster, BootParams, FsVariant};
pub use stage1::{install, PatchMode, PatchRecord, Stage1Layout, LOAD_BASE};

/// Sector size of the flat, sector-addressed image files this crate patches.
pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug)]
pub enum DiskImageError {
    /// Open/seek/read/write failure, with the image path and the absolute
    /// byte offset the operation targeted.
    Io {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },
    /// Filesystem variant string outside the supported set.
    UnsupportedFilesystem { name: String },
    /// A required symbol was absent from a map file.
    MissingSymbol { symbol: String, map: PathBuf },
    /// A stage1 binary or its companion map file is absent.
    MissingArtifact { path: PathBuf },
    /// A map symbol resolved below the real-mode load base.
    SymbolOutOfRange { symbol: String, address: u64 },
}

impl DiskImageError {
    fn io(path: &Path, offset: u64, source: io::Error) -> Self {
        DiskImageError::Io {
            path: path.to_path_buf(),
            offset,
            source,
        }
    }
}

impl fmt::Display for DiskImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskImageError::Io {
                path,
                offset,
                source,
            } => write!(
                f,
                "I/O failure on {} at offset {:#x}: {}",
                path.display(),
                offset,
                source
            ),
            DiskImageError::UnsupportedFilesystem { name } => {
                write!(f, "unsupported filesystem {name:?}")
            }
            DiskImageError::MissingSymbol { symbol, map } => {
                write!(f, "symbol {} not found in {}", symbol, map.display())
            }
            DiskImageError::MissingArtifact { path } => {
                write!(f, "missing build artifact {}", path.display())
            }
            DiskImageError::SymbolOutOfRange { symbol, address } => write!(
                f,
                "symbol {} resolves to {:#x}, below the {:#x} load base",
                symbol,
                address,
                stage1::LOAD_BASE
            ),
        }
    }
}

impl std::error::Error for DiskImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskImageError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<MapError> for DiskImageError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Io { path, source } => DiskImageError::Io {
                path,
                offset: 0,
                source,
            },
            MapError::MissingSymbol { symbol, map } => {
                DiskImageError::MissingSymbol { symbol, map }
            }
        }
    }
}
