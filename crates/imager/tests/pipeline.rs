use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use diskimage::{FsVariant, PatchMode};
use imager::{build_disk, pack_user_programs, BuildConfig, BuildInputs};
use platform::{PlatformError, PlatformServices};

const ENTRY_OFFSET: usize = 0x40;
const FIELD_OFFSET: usize = 0x1fa;

/// In-memory stand-in for the external tooling. Mounting is simulated by
/// treating the mount point directory as the filesystem tree; formatting
/// writes a synthetic BPB straight into the image.
#[derive(Default)]
struct FakePlatform {
    calls: Vec<String>,
    unmounts: usize,
    /// Fail copies whose source file name contains this needle.
    fail_copy_containing: Option<String>,
    /// Fail every unmount from this count on (1-based).
    fail_unmount_from: Option<usize>,
}

fn write_at(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

impl PlatformServices for FakePlatform {
    fn partition(&mut self, _image: &Path, align_start_sector: u64) -> Result<(), PlatformError> {
        self.calls.push(format!("partition @{align_start_sector}"));
        Ok(())
    }

    fn format(
        &mut self,
        image: &Path,
        _variant: FsVariant,
        reserved_sectors: u32,
    ) -> Result<(), PlatformError> {
        self.calls.push(format!("format r={reserved_sectors}"));
        write_at(image, 13, &[4]); // sectors per cluster
        write_at(image, 14, &(reserved_sectors as u16).to_le_bytes());
        write_at(image, 16, &[2]); // number of FATs
        write_at(image, 36, &8u32.to_le_bytes()); // FAT size
        Ok(())
    }

    fn mount(&mut self, _image: &Path, _mount_point: &Path) -> Result<(), PlatformError> {
        self.calls.push("mount".to_string());
        Ok(())
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), PlatformError> {
        self.unmounts += 1;
        self.calls.push("unmount".to_string());
        if let Some(from) = self.fail_unmount_from {
            if self.unmounts >= from {
                return Err(PlatformError::Io {
                    path: mount_point.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::Other, "target is busy"),
                });
            }
        }
        Ok(())
    }

    fn copy_preserving_size(&mut self, src: &Path, dst: &Path) -> Result<(), PlatformError> {
        let name = src.file_name().unwrap().to_string_lossy().into_owned();
        self.calls.push(format!("copy {name}"));
        if let Some(needle) = &self.fail_copy_containing {
            if name.contains(needle.as_str()) {
                return Err(PlatformError::Io {
                    path: src.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::Other, "injected copy failure"),
                });
            }
        }
        fs::copy(src, dst).map_err(|source| PlatformError::Io {
            path: dst.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

struct Fixture {
    dir: PathBuf,
    stage1: PathBuf,
    stage2: PathBuf,
    kernel: PathBuf,
    output: PathBuf,
}

fn fixture(name: &str) -> Fixture {
    let dir = std::env::temp_dir().join(format!("imager_{}_{}", std::process::id(), name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();

    let stage1 = dir.join("stage1.bin");
    let body: Vec<u8> = (0..512).map(|i| (i % 251) as u8 | 1).collect();
    fs::write(&stage1, body).unwrap();
    fs::write(
        dir.join("stage1.map"),
        format!(
            "                0x{:016x}                __entry_start = .\n\
                             0x{:016x}                stage2_location\n",
            0x7c00 + ENTRY_OFFSET,
            0x7c00 + FIELD_OFFSET,
        ),
    )
    .unwrap();

    let stage2 = dir.join("stage2.bin");
    fs::write(&stage2, vec![0x22u8; 3000]).unwrap(); // 6 sectors

    let kernel = dir.join("kernel.elf");
    fs::write(&kernel, vec![0x7fu8; 100]).unwrap();

    Fixture {
        output: dir.join("image.img"),
        dir,
        stage1,
        stage2,
        kernel,
    }
}

fn config() -> BuildConfig {
    BuildConfig {
        image_fs: "fat32".to_string(),
        image_size: "1m".to_string(),
        partition_align: 2048,
        arch: "i686".to_string(),
        profile: "debug".to_string(),
    }
}

#[test]
fn full_build_produces_a_patched_image() {
    let fx = fixture("full");
    let root = fx.dir.join("root");
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("data/hello.txt"), b"hello").unwrap();

    let mut services = FakePlatform::default();
    build_disk(
        &mut services,
        &config(),
        &BuildInputs {
            stage1: &fx.stage1,
            stage2: &fx.stage2,
            kernel: &fx.kernel,
            root: Some(&root),
            output: &fx.output,
            patch_mode: PatchMode::FilesystemFile,
        },
    )
    .unwrap();

    let image = fs::read(&fx.output).unwrap();
    assert_eq!(image.len(), 1024 * 1024);

    // Stage1 splice happened: jump verbatim, tail at the matching offset.
    let stage1_bytes = fs::read(&fx.stage1).unwrap();
    assert_eq!(&image[..3], &stage1_bytes[..3]);
    assert_eq!(
        &image[ENTRY_OFFSET..FIELD_OFFSET],
        &stage1_bytes[ENTRY_OFFSET..FIELD_OFFSET]
    );

    // first_data_sector = 2 reserved + 2 FATs * 8, stage2 payload one
    // sector later, plus sectors_per_cluster - 1 in filesystem-file mode.
    let expected_sector = (2 + 2 * 8) + 1 + 3;
    assert_eq!(
        &image[FIELD_OFFSET..FIELD_OFFSET + 4],
        &u32::to_le_bytes(expected_sector)
    );
    assert_eq!(image[FIELD_OFFSET + 4], 6); // ceil(3000 / 512)

    // The two mounted phases are strictly balanced, in pipeline order.
    let calls: Vec<&str> = services.calls.iter().map(String::as_str).collect();
    assert_eq!(
        calls,
        [
            "partition @2048",
            "format r=2",
            "mount",
            "copy stage2.bin",
            "unmount",
            "mount",
            "copy stage2.bin",
            "copy kernel.elf",
            "copy hello.txt",
            "unmount",
        ]
    );

    fs::remove_dir_all(&fx.dir).unwrap();
}

#[test]
fn missing_kernel_fails_before_any_image_mutation() {
    let fx = fixture("eager");
    fs::remove_file(&fx.kernel).unwrap();

    let mut services = FakePlatform::default();
    let err = build_disk(
        &mut services,
        &config(),
        &BuildInputs {
            stage1: &fx.stage1,
            stage2: &fx.stage2,
            kernel: &fx.kernel,
            root: None,
            output: &fx.output,
            patch_mode: PatchMode::RawSector,
        },
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("missing build artifact"));
    assert!(services.calls.is_empty());
    assert!(!fx.output.exists());

    fs::remove_dir_all(&fx.dir).unwrap();
}

#[test]
fn copy_failure_still_unmounts_and_wins_over_unmount_failure() {
    let fx = fixture("suppress");

    let mut services = FakePlatform {
        fail_copy_containing: Some("kernel".to_string()),
        // The populate-phase unmount (the second one) also fails.
        fail_unmount_from: Some(2),
        ..FakePlatform::default()
    };
    let err = build_disk(
        &mut services,
        &config(),
        &BuildInputs {
            stage1: &fx.stage1,
            stage2: &fx.stage2,
            kernel: &fx.kernel,
            root: None,
            output: &fx.output,
            patch_mode: PatchMode::RawSector,
        },
    )
    .unwrap_err();

    // The copy failure is the reported error; the unmount failure was
    // suppressed but the unmount was still attempted.
    assert!(format!("{err:#}").contains("injected copy failure"));
    assert_eq!(services.unmounts, 2);

    fs::remove_dir_all(&fx.dir).unwrap();
}

#[test]
fn unmount_failure_alone_is_an_error() {
    let fx = fixture("unmount");

    let mut services = FakePlatform {
        fail_unmount_from: Some(1),
        ..FakePlatform::default()
    };
    let err = build_disk(
        &mut services,
        &config(),
        &BuildInputs {
            stage1: &fx.stage1,
            stage2: &fx.stage2,
            kernel: &fx.kernel,
            root: None,
            output: &fx.output,
            patch_mode: PatchMode::RawSector,
        },
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("target is busy"));

    fs::remove_dir_all(&fx.dir).unwrap();
}

#[test]
fn user_programs_are_packed_exactly_once_into_the_staging_tree() {
    let fx = fixture("programs");
    let programs = fx.dir.join("programs");
    fs::create_dir_all(programs.join("hello")).unwrap();
    fs::write(programs.join("hello.bin"), vec![0x90u8; 300]).unwrap();
    fs::write(
        programs.join("hello/hello.map"),
        "phys = 0x100000\n\
         __text_start = 0x100000\n\
         __text_end = 0x10012c\n\
         __data_start = 0x10012c\n\
         __data_end = 0x10012c\n\
         __rodata_start = 0x10012c\n\
         __rodata_end = 0x10012c\n\
         __bss_start = 0x10012c\n\
         __bss_end = 0x10012c\n",
    )
    .unwrap();

    let staging = fx.dir.join("staging/bin");
    let mut services = FakePlatform::default();
    let packed = pack_user_programs(&mut services, &programs, &staging).unwrap();

    assert_eq!(packed.len(), 1);
    assert_eq!(packed[0].name, "hello");
    assert_eq!(packed[0].summary.body_size, 300);

    // The staged copy is a container; the raw artifact stays raw.
    let staged = fs::read(staging.join("hello.bin")).unwrap();
    assert_eq!(staged.len(), 96 + 300);
    assert_eq!(&staged[..4], b"CEXE");
    let raw = fs::read(programs.join("hello.bin")).unwrap();
    assert_eq!(raw.len(), 300);
    assert!(raw.iter().all(|&b| b == 0x90));

    fs::remove_dir_all(&fx.dir).unwrap();
}

#[test]
fn program_without_a_map_is_rejected() {
    let fx = fixture("nomap");
    let programs = fx.dir.join("programs");
    fs::create_dir_all(&programs).unwrap();
    fs::write(programs.join("orphan.bin"), vec![0u8; 10]).unwrap();

    let mut services = FakePlatform::default();
    let err = pack_user_programs(&mut services, &programs, &fx.dir.join("staging")).unwrap_err();
    assert!(format!("{err:#}").contains("missing map file"));

    fs::remove_dir_all(&fx.dir).unwrap();
}
