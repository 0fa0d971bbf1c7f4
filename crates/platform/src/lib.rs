//! Capability interfaces for the external tooling the build leans on.
//!
//! The core image logic never spawns processes; everything that touches a
//! partitioner, formatter or mount point goes through [`PlatformServices`],
//! so tests can substitute fakes.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use diskimage::FsVariant;

pub trait PlatformServices {
    /// Writes a fresh MS-DOS partition table with one bootable primary
    /// partition starting at `align_start_sector`.
    fn partition(&mut self, image: &Path, align_start_sector: u64) -> Result<(), PlatformError>;

    /// Formats the image with the given variant and reserved sector count.
    fn format(
        &mut self,
        image: &Path,
        variant: FsVariant,
        reserved_sectors: u32,
    ) -> Result<(), PlatformError>;

    fn mount(&mut self, image: &Path, mount_point: &Path) -> Result<(), PlatformError>;

    fn unmount(&mut self, mount_point: &Path) -> Result<(), PlatformError>;

    /// Copies `src` to `dst`; the destination must end up exactly the
    /// source's length.
    fn copy_preserving_size(&mut self, src: &Path, dst: &Path) -> Result<(), PlatformError>;
}

#[derive(Debug)]
pub enum PlatformError {
    /// An external tool ran and exited unsuccessfully.
    Tool { tool: String, status: ExitStatus },
    /// An external tool could not be started.
    Spawn { tool: String, source: io::Error },
    Io { path: PathBuf, source: io::Error },
    /// `copy_preserving_size` produced a destination of the wrong length.
    SizeMismatch {
        dst: PathBuf,
        expected: u64,
        actual: u64,
    },
    /// The credential source failed to produce a secret.
    Credential { source: io::Error },
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Tool { tool, status } => {
                write!(f, "{tool} failed with {status}")
            }
            PlatformError::Spawn { tool, source } => {
                write!(f, "failed to start {tool}: {source}")
            }
            PlatformError::Io { path, source } => {
                write!(f, "I/O failure on {}: {}", path.display(), source)
            }
            PlatformError::SizeMismatch {
                dst,
                expected,
                actual,
            } => write!(
                f,
                "copy of {} ended at {actual} bytes, expected {expected}",
                dst.display()
            ),
            PlatformError::Credential { source } => {
                write!(f, "failed to read credentials: {source}")
            }
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlatformError::Spawn { source, .. }
            | PlatformError::Io { source, .. }
            | PlatformError::Credential { source } => Some(source),
            _ => None,
        }
    }
}

/// Where a privileged-operation secret comes from.
pub trait CredentialSource {
    fn read_password(&mut self, prompt: &str) -> io::Result<String>;
}

/// Scoped credential state for one build context.
///
/// Fetches from its source at most once; every later request within the
/// scope hands out the cached secret. Dropping the context drops the
/// secret with it; nothing is process-wide.
pub struct Credentials {
    source: Box<dyn CredentialSource>,
    cached: Option<String>,
}

impl Credentials {
    pub fn new(source: Box<dyn CredentialSource>) -> Self {
        Credentials {
            source,
            cached: None,
        }
    }

    pub fn get(&mut self, prompt: &str) -> io::Result<&str> {
        match self.cached {
            Some(ref secret) => Ok(secret),
            None => {
                let secret = self.source.read_password(prompt)?;
                Ok(self.cached.insert(secret))
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fetched", &self.cached.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        reads: usize,
    }

    impl CredentialSource for CountingSource {
        fn read_password(&mut self, _prompt: &str) -> io::Result<String> {
            self.reads += 1;
            Ok(format!("secret-{}", self.reads))
        }
    }

    #[test]
    fn credentials_fetch_at_most_once() {
        let mut creds = Credentials::new(Box::new(CountingSource { reads: 0 }));
        assert_eq!(creds.get("password: ").unwrap(), "secret-1");
        assert_eq!(creds.get("password: ").unwrap(), "secret-1");
        assert_eq!(creds.get("again: ").unwrap(), "secret-1");
    }

    struct FailingSource;

    impl CredentialSource for FailingSource {
        fn read_password(&mut self, _prompt: &str) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed stdin"))
        }
    }

    #[test]
    fn credential_failure_is_not_cached() {
        let mut creds = Credentials::new(Box::new(FailingSource));
        assert!(creds.get("password: ").is_err());
        assert!(creds.get("password: ").is_err());
    }
}
