use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use diskimage::{first_data_sector, read_boot_params, sectors_per_cluster, DiskImageError, FsVariant};

fn scratch_image(name: &str, len: u64) -> PathBuf {
    let path = std::env::temp_dir().join(format!("diskimage_bpb_{}_{}", std::process::id(), name));
    let file = File::create(&path).unwrap();
    file.set_len(len).unwrap();
    path
}

fn write_at(path: &PathBuf, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn fat32_first_data_sector() {
    let image = scratch_image("fat32", 4096);
    write_at(&image, 14, &32u16.to_le_bytes()); // reserved sectors
    write_at(&image, 16, &[2]); // number of FATs
    write_at(&image, 36, &512u32.to_le_bytes()); // FAT size, 32-bit field

    let sector = first_data_sector(&image, 0, FsVariant::Fat32).unwrap();
    assert_eq!(sector, 32 + 512 * 2);

    std::fs::remove_file(&image).unwrap();
}

#[test]
fn fat16_reads_the_16_bit_fat_size_field() {
    let image = scratch_image("fat16", 4096);
    write_at(&image, 14, &4u16.to_le_bytes());
    write_at(&image, 16, &[2]);
    write_at(&image, 22, &64u16.to_le_bytes()); // 16-bit field
    write_at(&image, 36, &0xdead_beefu32.to_le_bytes()); // must be ignored

    let params = read_boot_params(&image, 0, FsVariant::Fat16).unwrap();
    assert_eq!(params.reserved_sectors, 4);
    assert_eq!(params.num_fats, 2);
    assert_eq!(params.fat_size, 64);
    assert_eq!(params.first_data_sector(), 4 + 64 * 2);

    std::fs::remove_file(&image).unwrap();
}

#[test]
fn offsets_are_relative_to_the_partition_start() {
    let start_sector = 2048u64;
    let base = start_sector * 512;
    let image = scratch_image("offset", base + 4096);
    write_at(&image, base + 13, &[4]);
    write_at(&image, base + 14, &8u16.to_le_bytes());
    write_at(&image, base + 16, &[1]);
    write_at(&image, base + 36, &100u32.to_le_bytes());

    assert_eq!(
        first_data_sector(&image, start_sector, FsVariant::Fat32).unwrap(),
        8 + 100
    );
    assert_eq!(sectors_per_cluster(&image, start_sector).unwrap(), 4);

    std::fs::remove_file(&image).unwrap();
}

#[test]
fn unsupported_variant_is_rejected_before_any_image_access() {
    match FsVariant::parse("ext4") {
        Err(DiskImageError::UnsupportedFilesystem { name }) => assert_eq!(name, "ext4"),
        other => panic!("expected UnsupportedFilesystem, got {other:?}"),
    }
}

#[test]
fn unreadable_image_reports_path_and_offset() {
    let missing = std::env::temp_dir().join("diskimage_bpb_missing.img");
    match first_data_sector(&missing, 0, FsVariant::Fat32) {
        Err(DiskImageError::Io { path, offset, .. }) => {
            assert_eq!(path, missing);
            assert_eq!(offset, 0);
        }
        other => panic!("expected Io error, got {other:?}"),
    }
}
