use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;

use diskimage::PatchMode;
use imager::{build_disk, pack_user_programs, BuildConfig, BuildInputs, ShellServices, StdinSource};
use platform::Credentials;

/// Bootable disk image assembler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the build configuration JSON
    #[arg(short, long)]
    config: PathBuf,

    /// Stage1 boot sector binary (companion .map expected next to it)
    #[arg(long)]
    stage1: PathBuf,

    /// Stage2 loader binary
    #[arg(long)]
    stage2: PathBuf,

    /// Kernel image, copied to boot/ on the filesystem
    #[arg(long)]
    kernel: PathBuf,

    /// Directory tree copied into the image root
    #[arg(long)]
    root: Option<PathBuf>,

    /// Directory of raw user program binaries to pack into <root>/bin
    #[arg(long)]
    programs: Option<PathBuf>,

    /// Output image path
    #[arg(short, long)]
    output: PathBuf,

    /// How the stage2 location is recorded: raw-sector or filesystem-file
    #[arg(long, default_value = "filesystem-file")]
    patch_mode: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    println!("{}", "Disk Image Assembler".bold().blue());
    println!();

    let cfg = BuildConfig::load(&args.config)?;
    println!(
        "  {} image ({}), {} {} build",
        cfg.image_fs, cfg.image_size, cfg.arch, cfg.profile
    );
    let patch_mode = match args.patch_mode.as_str() {
        "raw-sector" => PatchMode::RawSector,
        "filesystem-file" => PatchMode::FilesystemFile,
        other => bail!("unknown patch mode {other:?}"),
    };

    let mut services = ShellServices::new(Credentials::new(Box::new(StdinSource)));

    if let Some(programs) = &args.programs {
        let root = args
            .root
            .as_deref()
            .context("--programs requires --root as the staging tree")?;
        let packed = pack_user_programs(&mut services, programs, &root.join("bin"))?;
        for program in &packed {
            println!(
                "  packed {} ({} body bytes, loads at {:#x})",
                program.name.yellow(),
                program.summary.body_size,
                program.summary.phys
            );
        }
    }

    build_disk(
        &mut services,
        &cfg,
        &BuildInputs {
            stage1: &args.stage1,
            stage2: &args.stage2,
            kernel: &args.kernel,
            root: args.root.as_deref(),
            output: &args.output,
            patch_mode,
        },
    )?;

    println!();
    println!(
        "{} image written to {}",
        "done:".green().bold(),
        args.output.display()
    );
    Ok(())
}
