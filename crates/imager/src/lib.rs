pub mod build;
pub mod config;
pub mod shell;

pub use build::{
    build_disk, generate_image_file, locate_stage2, pack_user_programs, BuildInputs, PackedProgram,
};
pub use config::{parse_size, BuildConfig};
pub use shell::{ShellServices, StdinSource};
