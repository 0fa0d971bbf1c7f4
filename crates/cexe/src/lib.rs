//! CEXE user-program container.
//!
//! A packed program is a 32-byte header, four fixed section entries and the
//! raw program body. The section table carries the segment layout the loader
//! needs to place text/data/rodata/bss relative to the physical load
//! address; the layout is derived from the program's linker map.

use std::fmt;
use std::io;
use std::path::PathBuf;

pub mod container;
pub mod layout;
mod pack;

pub use container::{
    CexeHeader, SectionEntry, CONTAINER_PREFIX, HEADER_SIZE, MAGIC, SECTION_ENTRY_SIZE, VERSION,
};
pub use layout::{Segment, SegmentLayout, SegmentSpan};
pub use pack::{encode_container, pack, PackSummary};

#[derive(Debug)]
pub enum CexeError {
    Io { path: PathBuf, source: io::Error },
    MissingArtifact { path: PathBuf },
    MissingSymbol { symbol: String, map: PathBuf },
    /// Header bytes do not start with the `CEXE` magic.
    BadMagic { found: [u8; 4] },
    /// Fewer bytes than a full header when parsing one back.
    Truncated { len: usize },
}

impl fmt::Display for CexeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CexeError::Io { path, source } => {
                write!(f, "I/O failure on {}: {}", path.display(), source)
            }
            CexeError::MissingArtifact { path } => {
                write!(f, "missing artifact {}", path.display())
            }
            CexeError::MissingSymbol { symbol, map } => {
                write!(f, "symbol {} not found in {}", symbol, map.display())
            }
            CexeError::BadMagic { found } => {
                write!(f, "bad container magic 0x{}", hex::encode(found))
            }
            CexeError::Truncated { len } => {
                write!(f, "container header truncated at {len} bytes")
            }
        }
    }
}

impl std::error::Error for CexeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CexeError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<mapfile::MapError> for CexeError {
    fn from(err: mapfile::MapError) -> Self {
        match err {
            mapfile::MapError::Io { path, source } => CexeError::Io { path, source },
            mapfile::MapError::MissingSymbol { symbol, map } => {
                CexeError::MissingSymbol { symbol, map }
            }
        }
    }
}
