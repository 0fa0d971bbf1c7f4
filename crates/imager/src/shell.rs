//! Process-backed platform services.
//!
//! The only place in the repository that spawns external tools. Everything
//! privileged goes through `sudo -S` with the password piped from the
//! build's scoped credentials.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use diskimage::FsVariant;
use platform::{CredentialSource, Credentials, PlatformError, PlatformServices};

pub struct ShellServices {
    credentials: Credentials,
}

impl ShellServices {
    pub fn new(credentials: Credentials) -> Self {
        ShellServices { credentials }
    }

    fn run_checked(cmd: &mut Command, tool: &str) -> Result<(), PlatformError> {
        let status = cmd.status().map_err(|source| PlatformError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(PlatformError::Tool {
                tool: tool.to_string(),
                status,
            })
        }
    }

    fn run_sudo(&mut self, tool: &str, args: &[&OsStr]) -> Result<(), PlatformError> {
        let secret = self
            .credentials
            .get("[sudo] password: ")
            .map_err(|source| PlatformError::Credential { source })?
            .to_string();

        let mut child = Command::new("sudo")
            .arg("-S")
            .arg("-p")
            .arg("")
            .arg(tool)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| PlatformError::Spawn {
                tool: "sudo".to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // sudo closes stdin early when no password is needed.
            let _ = writeln!(stdin, "{secret}");
        }

        let status = child.wait().map_err(|source| PlatformError::Spawn {
            tool: tool.to_string(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(PlatformError::Tool {
                tool: tool.to_string(),
                status,
            })
        }
    }
}

impl PlatformServices for ShellServices {
    fn partition(&mut self, image: &Path, align_start_sector: u64) -> Result<(), PlatformError> {
        Self::run_checked(
            Command::new("parted")
                .arg("--script")
                .arg(image)
                .args(["mklabel", "msdos", "mkpart", "primary"])
                .arg(format!("{align_start_sector}s"))
                .args(["100%", "set", "1", "boot", "on"]),
            "parted",
        )
    }

    fn format(
        &mut self,
        image: &Path,
        variant: FsVariant,
        reserved_sectors: u32,
    ) -> Result<(), PlatformError> {
        let bits = match variant {
            FsVariant::Fat12 => "12",
            FsVariant::Fat16 => "16",
            FsVariant::Fat32 => "32",
        };
        Self::run_checked(
            Command::new("mkfs.fat")
                .args(["-F", bits, "-R"])
                .arg(reserved_sectors.to_string())
                .arg(image),
            "mkfs.fat",
        )
    }

    fn mount(&mut self, image: &Path, mount_point: &Path) -> Result<(), PlatformError> {
        self.run_sudo(
            "mount",
            &[
                OsStr::new("-o"),
                OsStr::new("loop"),
                image.as_os_str(),
                mount_point.as_os_str(),
            ],
        )
    }

    fn unmount(&mut self, mount_point: &Path) -> Result<(), PlatformError> {
        self.run_sudo("umount", &[mount_point.as_os_str()])
    }

    fn copy_preserving_size(&mut self, src: &Path, dst: &Path) -> Result<(), PlatformError> {
        let expected = fs::metadata(src)
            .map_err(|source| PlatformError::Io {
                path: src.to_path_buf(),
                source,
            })?
            .len();
        fs::copy(src, dst).map_err(|source| PlatformError::Io {
            path: dst.to_path_buf(),
            source,
        })?;
        let actual = fs::metadata(dst)
            .map_err(|source| PlatformError::Io {
                path: dst.to_path_buf(),
                source,
            })?
            .len();
        if actual != expected {
            return Err(PlatformError::SizeMismatch {
                dst: dst.to_path_buf(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Reads the sudo password from the terminal's stdin.
pub struct StdinSource;

impl CredentialSource for StdinSource {
    fn read_password(&mut self, prompt: &str) -> io::Result<String> {
        eprint!("{prompt}");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
    }
}
