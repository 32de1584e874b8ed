use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;

/// How the R payload is obtained for the current host.
#[derive(Debug, Clone, Copy)]
pub enum Acquisition<'a> {
    /// Unix hosts: download the source tarball and drive the native build.
    Source(&'a SourceArchive),
    /// Windows hosts: download the prebuilt installer.
    Installer(&'a PrebuiltInstaller),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceArchive {
    pub url: String,
    pub sha256: Checksum,
}

impl SourceArchive {
    /// Download, verify and unpack the source tarball.
    /// Returns the directory holding the unpacked sources.
    pub fn fetch(&self, work_dir: &Path) -> Result<PathBuf> {
        let tarball = work_dir.join(filename_from_url(&self.url));
        download(&self.url, &tarball, None)?;
        self.sha256.verify(&tarball)?;

        let source_dir = work_dir.join("source");
        extract_archive(&tarball, &source_dir, 1)?;
        Ok(source_dir)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PrebuiltInstaller {
    pub url: String,
    /// Environment variable holding the download API key
    pub api_key_env: String,
}

impl PrebuiltInstaller {
    /// Download the installer, authenticating with the API key from the
    /// environment. Running it is the platform installer's business.
    pub fn fetch(&self, work_dir: &Path) -> Result<PathBuf> {
        let api_key = std::env::var(&self.api_key_env).map_err(|_| {
            anyhow!(
                "Environment variable {} is not set, cannot download the prebuilt installer",
                self.api_key_env
            )
        })?;
        let dest = work_dir.join(filename_from_url(&self.url));
        download(&self.url, &dest, Some(&api_key))?;
        Ok(dest)
    }
}

fn make_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout(Duration::from_secs(600))
        .build()
}

fn filename_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Download `url` to `dest`. Retrieval failures are fatal, there is no retry:
/// a flaky mirror should stop the packaging run, not hide behind it.
fn download(url: &str, dest: &Path, bearer: Option<&str>) -> Result<()> {
    log::info!("Downloading {} to {}", url, dest.display());
    let mut request = make_agent().get(url);
    if let Some(token) = bearer {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }
    let response = request
        .call()
        .with_context(|| format!("Failed to download {url}"))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(dest)?;
    std::io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(())
}

/// Unpack a gzip-compressed tarball with `tar`, stripping leading path
/// components (the R tarball wraps everything in `R-<version>/`).
pub fn extract_archive(tarball: &Path, dest: &Path, strip_components: u32) -> Result<()> {
    log::info!("Extracting {} to {}", tarball.display(), dest.display());
    fs::create_dir_all(dest)?;
    let output = Command::new("tar")
        .arg("xzf")
        .arg(tarball)
        .arg("-C")
        .arg(dest)
        .arg(format!("--strip-components={strip_components}"))
        .output()
        .context("Failed to run tar")?;
    if !output.status.success() {
        bail!(
            "Failed to unpack {}: {}",
            tarball.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
