use std::fs;
use std::path::PathBuf;

use mapfile::{MapError, MapFile};

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mapfile_{}_{}", std::process::id(), name))
}

#[test]
fn loads_a_map_file_from_disk() {
    let path = scratch_path("stage1.map");
    fs::write(
        &path,
        "                0x0000000000007c00                __entry_start = .\n\
         .text           0x0000000000007c3e      0x11a build/stage1.o\n\
                         0x0000000000007dfa                stage2_location\n",
    )
    .unwrap();

    let map = MapFile::load(&path).unwrap();
    assert_eq!(map.address("__entry_start"), Some(0x7c00));
    assert_eq!(map.address("stage2_location"), Some(0x7dfa));
    assert_eq!(map.require("__entry_start").unwrap(), 0x7c00);

    fs::remove_file(&path).unwrap();
}

#[test]
fn load_reports_unreadable_files() {
    let path = scratch_path("does_not_exist.map");
    match MapFile::load(&path) {
        Err(MapError::Io { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected Io error, got {other:?}"),
    }
}
