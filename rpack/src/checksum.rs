use std::fmt::Display;
use std::io;
use std::path::Path;

use anyhow::{Result, bail};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest, lowercase hex.
/// CRAN publishes SHA-256 digests for source tarballs so that is the only
/// algorithm we carry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_lowercase())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Streams the file through the hasher, the R tarball is ~20MB.
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = fs::File::open(path.as_ref())?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// A mismatch is fatal: a corrupt or tampered download must stop the run.
    pub fn verify(&self, path: impl AsRef<Path>) -> Result<()> {
        let actual = Self::of_file(&path)?;
        if &actual != self {
            bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                path.as_ref().display(),
                self.0,
                actual.0
            );
        }
        log::debug!("Checksum verified for {}", path.as_ref().display());
        Ok(())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}
