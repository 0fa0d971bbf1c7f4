//! Build configuration.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use diskimage::{DiskImageError, FsVariant};

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Filesystem the image is formatted with: "fat12", "fat16" or "fat32".
    pub image_fs: String,
    /// Image size, a decimal number with an optional k/m/g multiplier.
    pub image_size: String,
    /// Partition start sector for the partition table entry.
    #[serde(default = "default_partition_align")]
    pub partition_align: u64,
    pub arch: String,
    pub profile: String,
}

fn default_partition_align() -> u64 {
    2048
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// The filesystem variant, checked before any image access.
    pub fn fs_variant(&self) -> Result<FsVariant, DiskImageError> {
        FsVariant::parse(&self.image_fs)
    }

    pub fn size_bytes(&self) -> Result<u64> {
        parse_size(&self.image_size)
    }
}

/// Parses a size string like "512", "1.5m" or "2G" into bytes.
pub fn parse_size(size: &str) -> Result<u64> {
    let pattern = Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*([kmgKMG]?)$").unwrap();
    let caps = match pattern.captures(size.trim()) {
        Some(caps) => caps,
        None => bail!("invalid size {size:?}"),
    };

    let value: f64 = caps[1].parse().with_context(|| format!("invalid size {size:?}"))?;
    let multiplier: u64 = match &caps[2] {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        other => bail!("invalid size multiplier {other:?}"),
    };

    Ok((value * multiplier as f64) as u64)
}
