use std::fs;
use std::path::Path;

use mapfile::MapFile;

use crate::container::{CexeHeader, SectionEntry, CONTAINER_PREFIX, VERSION};
use crate::layout::SegmentLayout;
use crate::CexeError;

/// What a pack run produced, for reporting.
#[derive(Debug, Clone, Copy)]
pub struct PackSummary {
    pub body_size: u32,
    pub phys: u64,
    pub total_size: u64,
}

/// Pure encoding: header, section table, body.
pub fn encode_container(body: &[u8], layout: &SegmentLayout) -> Vec<u8> {
    let header = CexeHeader {
        version: VERSION,
        body_size: body.len() as u32,
        phys_load_addr: layout.phys as u32,
    };

    let mut out = Vec::with_capacity(CONTAINER_PREFIX + body.len());
    out.extend_from_slice(&header.encode());
    for (segment, span) in layout.spans() {
        let entry = SectionEntry {
            tag: segment.tag(),
            present: span.size > 0,
            offset: span.offset,
            size: span.size,
        };
        out.extend_from_slice(&entry.encode());
    }
    out.extend_from_slice(body);
    out
}

/// Wraps the program at `binary_path` in place, deriving the section table
/// from `map_path`.
///
/// Not self-detecting: packing an already-packed file treats the existing
/// container prefix as body bytes and corrupts the artifact. The build
/// pipeline keeps the exactly-once guarantee by always packing a fresh
/// copy of the raw binary.
pub fn pack(binary_path: &Path, map_path: &Path) -> Result<PackSummary, CexeError> {
    if !binary_path.exists() {
        return Err(CexeError::MissingArtifact {
            path: binary_path.to_path_buf(),
        });
    }
    if !map_path.exists() {
        return Err(CexeError::MissingArtifact {
            path: map_path.to_path_buf(),
        });
    }

    let map = MapFile::load(map_path)?;
    let layout = SegmentLayout::from_map(&map)?;

    let body = fs::read(binary_path).map_err(|source| CexeError::Io {
        path: binary_path.to_path_buf(),
        source,
    })?;

    let container = encode_container(&body, &layout);
    fs::write(binary_path, &container).map_err(|source| CexeError::Io {
        path: binary_path.to_path_buf(),
        source,
    })?;

    Ok(PackSummary {
        body_size: body.len() as u32,
        phys: layout.phys,
        total_size: container.len() as u64,
    })
}
