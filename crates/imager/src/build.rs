//! Disk build pipeline.
//!
//! Single-threaded and synchronous; callers must serialize builds against a
//! given image path. There is no transactional write anywhere: a failure
//! mid-build leaves a partial image and recovery is rebuild-from-scratch.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use walkdir::WalkDir;

use cexe::PackSummary;
use diskimage::{FsVariant, PatchMode, SECTOR_SIZE};
use platform::{PlatformError, PlatformServices};

use crate::config::BuildConfig;

pub struct BuildInputs<'a> {
    pub stage1: &'a Path,
    pub stage2: &'a Path,
    pub kernel: &'a Path,
    /// Optional directory tree copied into the image root.
    pub root: Option<&'a Path>,
    pub output: &'a Path,
    pub patch_mode: PatchMode,
}

fn step(message: &str) {
    println!("{} {}", ">".cyan().bold(), message);
}

/// Pre-allocates the flat image file as zero bytes.
pub fn generate_image_file(path: &Path, size_sectors: u64) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.set_len(size_sectors * SECTOR_SIZE)
        .with_context(|| format!("failed to size {}", path.display()))?;
    Ok(())
}

/// Runs the mounted part of a phase with strictly balanced mount/unmount.
///
/// The unmount is attempted even when the mounted work failed. A secondary
/// unmount failure after a primary error is reported on stderr and
/// suppressed so it cannot mask the original failure.
fn with_unmount(
    primary: Result<()>,
    unmounted: Result<(), PlatformError>,
    mount_point: &Path,
) -> Result<()> {
    match (primary, unmounted) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => {
            Err(e).with_context(|| format!("failed to unmount {}", mount_point.display()))
        }
        (Err(primary), Ok(())) => Err(primary),
        (Err(primary), Err(secondary)) => {
            eprintln!(
                "{} suppressing unmount failure of {} after an earlier error: {}",
                "warning:".yellow().bold(),
                mount_point.display(),
                secondary
            );
            Err(primary)
        }
    }
}

/// Determines the sector where the stage2 payload will live.
///
/// Copies stage2 onto the freshly formatted filesystem so its clusters are
/// the first ones allocated, then reads the data-region start from the BPB.
/// The first data cluster holds the root directory; the payload begins one
/// sector later.
pub fn locate_stage2(
    services: &mut dyn PlatformServices,
    image: &Path,
    stage2: &Path,
    partition_start_sector: u64,
    variant: FsVariant,
    scratch: &Path,
) -> Result<u32> {
    let file_name = stage2
        .file_name()
        .with_context(|| format!("stage2 path {} has no file name", stage2.display()))?;

    services.mount(image, scratch)?;
    let copied = services
        .copy_preserving_size(stage2, &scratch.join(file_name))
        .map_err(anyhow::Error::from);
    let unmounted = services.unmount(scratch);
    with_unmount(copied, unmounted, scratch)?;

    let first_data_sector = diskimage::first_data_sector(image, partition_start_sector, variant)?;
    Ok(first_data_sector + 1)
}

/// Builds the bootable image end to end.
pub fn build_disk(
    services: &mut dyn PlatformServices,
    cfg: &BuildConfig,
    inputs: &BuildInputs<'_>,
) -> Result<()> {
    let variant = cfg.fs_variant()?;

    // Every artifact must exist before the image is touched.
    let stage1_map = inputs.stage1.with_extension("map");
    for artifact in [inputs.stage1, stage1_map.as_path(), inputs.stage2, inputs.kernel] {
        if !artifact.exists() {
            bail!("missing build artifact {}", artifact.display());
        }
    }

    let size_bytes = cfg.size_bytes()?;
    let size_sectors = (size_bytes + SECTOR_SIZE - 1) / SECTOR_SIZE;

    let stage2_len = fs::metadata(inputs.stage2)
        .with_context(|| format!("failed to stat {}", inputs.stage2.display()))?
        .len();
    let stage2_sectors = u8::try_from((stage2_len + SECTOR_SIZE - 1) / SECTOR_SIZE)
        .context("stage2 does not fit the one-byte sector count")?;

    step(&format!(
        "generating {} ({} sectors)...",
        inputs.output.display(),
        size_sectors
    ));
    generate_image_file(inputs.output, size_sectors)?;

    step("creating partition table...");
    services.partition(inputs.output, cfg.partition_align)?;

    step(&format!("formatting using {}...", variant.name()));
    // mkfs reserves the boot sector itself, plus the FSInfo sector on FAT32.
    let reserved_sectors = match variant {
        FsVariant::Fat32 => 2,
        FsVariant::Fat12 | FsVariant::Fat16 => 1,
    };
    services.format(inputs.output, variant, reserved_sectors)?;

    let scratch = inputs
        .output
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("tmp_mount_{}", std::process::id()));
    fs::create_dir_all(&scratch)
        .with_context(|| format!("failed to create {}", scratch.display()))?;

    let result = assemble(services, inputs, variant, stage2_sectors, &scratch);
    // Scratch removal is best-effort.
    let _ = fs::remove_dir(&scratch);
    result
}

fn assemble(
    services: &mut dyn PlatformServices,
    inputs: &BuildInputs<'_>,
    variant: FsVariant,
    stage2_sectors: u8,
    scratch: &Path,
) -> Result<()> {
    // The filesystem is laid down from sector 0; the partition entry exists
    // for firmware that expects a table.
    let partition_start_sector = 0;

    step("locating stage2...");
    let stage2_sector = locate_stage2(
        services,
        inputs.output,
        inputs.stage2,
        partition_start_sector,
        variant,
        scratch,
    )?;
    println!("  stage2 starts at sector {stage2_sector}");

    step("installing stage1...");
    diskimage::install(
        inputs.output,
        inputs.stage1,
        stage2_sector,
        stage2_sectors,
        partition_start_sector,
        inputs.patch_mode,
    )?;

    step("copying system files...");
    services.mount(inputs.output, scratch)?;
    let populated = populate_image(services, inputs, scratch);
    let unmounted = services.unmount(scratch);
    with_unmount(populated, unmounted, scratch)
}

/// Fills the mounted filesystem: stage2 at the root, the kernel under
/// `boot/`, then the optional root tree.
fn populate_image(
    services: &mut dyn PlatformServices,
    inputs: &BuildInputs<'_>,
    mounted: &Path,
) -> Result<()> {
    let stage2_name = inputs
        .stage2
        .file_name()
        .with_context(|| format!("stage2 path {} has no file name", inputs.stage2.display()))?;
    services.copy_preserving_size(inputs.stage2, &mounted.join(stage2_name))?;

    let boot_dir = mounted.join("boot");
    fs::create_dir_all(&boot_dir)
        .with_context(|| format!("failed to create {}", boot_dir.display()))?;
    let kernel_name = inputs
        .kernel
        .file_name()
        .with_context(|| format!("kernel path {} has no file name", inputs.kernel.display()))?;
    services.copy_preserving_size(inputs.kernel, &boot_dir.join(kernel_name))?;

    if let Some(root) = inputs.root {
        copy_tree(services, root, mounted)?;
    }
    Ok(())
}

fn copy_tree(
    services: &mut dyn PlatformServices,
    src_root: &Path,
    dst_root: &Path,
) -> Result<()> {
    for entry in WalkDir::new(src_root).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src_root)?;
        let dst = dst_root.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dst)
                .with_context(|| format!("failed to create {}", dst.display()))?;
        } else {
            services.copy_preserving_size(entry.path(), &dst)?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct PackedProgram {
    pub name: String,
    pub summary: PackSummary,
}

/// Packs every raw `*.bin` user program under `programs_dir` into
/// `dest_bin`, deriving each section table from the program's companion
/// map at `<programs_dir>/<name>/<name>.map`.
///
/// Each artifact is copied first and the copy is packed, so packing runs
/// exactly once per artifact no matter how often the build repeats; the
/// raw binaries stay untouched.
pub fn pack_user_programs(
    services: &mut dyn PlatformServices,
    programs_dir: &Path,
    dest_bin: &Path,
) -> Result<Vec<PackedProgram>> {
    let mut packed = Vec::new();
    for entry in WalkDir::new(programs_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("unusable program name {}", path.display()))?
            .to_string();

        let map = programs_dir.join(&name).join(format!("{name}.map"));
        if !map.exists() {
            bail!("missing map file {} for program {}", map.display(), name);
        }

        let rel = path.strip_prefix(programs_dir)?;
        let dst = dest_bin.join(rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        services.copy_preserving_size(path, &dst)?;
        let summary = cexe::pack(&dst, &map)?;
        packed.push(PackedProgram { name, summary });
    }
    Ok(packed)
}
