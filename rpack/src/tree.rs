use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs_err as fs;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// Launcher scripts R installs, paired with the path from each script's
/// directory back to the install root. Which entries exist depends on the
/// platform and arch variant; absent ones are skipped, not errors.
pub const LAUNCHER_TABLE: &[(&str, &str)] = &[
    ("bin/R", ".."),
    ("bin/R64", ".."),
    ("lib/R/bin/R", "../../.."),
    ("lib/R/bin/R64", "../../.."),
    ("lib64/R/bin/R", "../../.."),
    ("lib64/R/bin/R64", "../../.."),
];

/// Shared-library artifacts whose recorded load paths get rewritten on macOS.
const LIBRARY_PATTERNS: &[&str] = &[
    "lib/R/lib/*.dylib",
    "lib/R/lib/*.so",
    "lib64/R/lib/*.dylib",
    "lib64/R/lib/*.so",
    "lib/R/library/**/libs/*.dylib",
    "lib/R/library/**/libs/*.so",
    "lib64/R/library/**/libs/*.dylib",
    "lib64/R/library/**/libs/*.so",
];

/// GCC runtime libraries bundled next to R's own libraries on macOS, so the
/// packaged tree does not depend on the build machine's compiler install.
pub const BUNDLED_RUNTIME_LIBS: &[&str] = &["libgfortran.5.dylib", "libquadmath.0.dylib"];

/// A launcher resolved against a concrete tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub path: PathBuf,
    /// Path from the script's directory back to the install root
    pub root_prefix: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOutcome {
    Copied,
    /// Destination already holds the library; logged, not an error.
    AlreadyPresent,
    /// Source library absent on this machine; platform dependent.
    SourceMissing,
}

/// The directory tree `make install` produced, before and after repackaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTree {
    root: PathBuf,
}

impl InstallTree {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every launcher from the fixed table, resolved to an absolute path.
    /// Existence is the consumer's concern.
    pub fn launchers(&self) -> Vec<Launcher> {
        LAUNCHER_TABLE
            .iter()
            .map(|&(relative, root_prefix)| Launcher {
                path: self.root.join(relative),
                root_prefix,
            })
            .collect()
    }

    /// Where the bundled GCC runtime libraries land.
    pub fn runtime_lib_dir(&self) -> PathBuf {
        self.root.join("lib/R/lib")
    }

    /// All shared-library artifacts in the tree matching the known layout.
    pub fn shared_libraries(&self) -> Result<Vec<PathBuf>> {
        let patterns = library_globs()?;
        let mut libraries = Vec::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if patterns.is_match(relative) {
                libraries.push(entry.path().to_path_buf());
            }
        }
        libraries.sort();
        Ok(libraries)
    }

    /// Copy the GCC runtime libraries into `lib/R/lib`. An already-present
    /// destination is left alone and reported, not failed on.
    pub fn bundle_runtime_libs(
        &self,
        sources: &[PathBuf],
    ) -> Result<Vec<(PathBuf, BundleOutcome)>> {
        let dest_dir = self.runtime_lib_dir();
        fs::create_dir_all(&dest_dir)?;

        let mut outcomes = Vec::new();
        for source in sources {
            let name = source
                .file_name()
                .with_context(|| format!("Library path {} has no file name", source.display()))?;
            let dest = dest_dir.join(name);

            let outcome = if !source.is_file() {
                log::debug!("Runtime library {} not present, skipping", source.display());
                BundleOutcome::SourceMissing
            } else if dest.exists() {
                log::warn!(
                    "{} already present, leaving the existing copy in place",
                    dest.display()
                );
                BundleOutcome::AlreadyPresent
            } else {
                fs::copy(source, &dest)?;
                log::info!("Bundled {} into {}", source.display(), dest_dir.display());
                BundleOutcome::Copied
            };
            outcomes.push((dest, outcome));
        }
        Ok(outcomes)
    }

    /// Copy the license file out of the source tree into `licenses/`.
    pub fn copy_license(&self, source_dir: &Path) -> Result<()> {
        let copying = source_dir.join("COPYING");
        if !copying.is_file() {
            log::warn!("No COPYING file in {}", source_dir.display());
            return Ok(());
        }
        let license_dir = self.root.join("licenses");
        fs::create_dir_all(&license_dir)?;
        fs::copy(&copying, license_dir.join("COPYING"))?;
        Ok(())
    }

    /// Drop documentation and shared data from the packaged tree.
    pub fn prune(&self) -> Result<()> {
        for relative in ["lib/R/doc", "share"] {
            let path = self.root.join(relative);
            if path.is_dir() {
                log::debug!("Pruning {}", path.display());
                fs::remove_dir_all(&path)?;
            }
        }
        Ok(())
    }
}

fn library_globs() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in LIBRARY_PATTERNS {
        builder.add(Glob::new(pattern).with_context(|| format!("Bad glob pattern {pattern}"))?);
    }
    Ok(builder.build()?)
}
