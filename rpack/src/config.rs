use std::path::Path;

use anyhow::{Context, Result, bail};
use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::acquire::{Acquisition, PrebuiltInstaller, SourceArchive};

pub const RECIPE_FILE_NAME: &str = "rpack.toml";

/// Host platform, detected once at startup and threaded through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    Linux,
    Macos,
    Windows,
}

impl Host {
    pub fn current() -> Result<Self> {
        match std::env::consts::OS {
            "linux" => Ok(Host::Linux),
            "macos" => Ok(Host::Macos),
            "windows" => Ok(Host::Windows),
            other => bail!("Unsupported host platform: {other}"),
        }
    }
}

/// The packaging recipe, read from `rpack.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Recipe {
    name: String,
    version: String,
    source: SourceArchive,
    /// Windows hosts skip the native build and download a prebuilt installer
    installer: Option<PrebuiltInstaller>,
    /// Appended to `configure` after the fixed feature set
    #[serde(default)]
    configure_args: Vec<String>,
}

impl Recipe {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: SourceArchive) -> Self {
        Recipe {
            name: name.into(),
            version: version.into(),
            source,
            installer: None,
            configure_args: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, directory: impl AsRef<Path>) -> Result<()> {
        let recipe_path = directory.as_ref().join(RECIPE_FILE_NAME);
        let content = toml::to_string_pretty(&self)?;
        fs::write(&recipe_path, content)?;
        log::info!("Recipe saved to {}", recipe_path.display());
        Ok(())
    }

    pub fn set_installer(&mut self, installer: PrebuiltInstaller) {
        self.installer = Some(installer);
    }

    pub fn push_configure_arg(&mut self, arg: impl Into<String>) {
        self.configure_args.push(arg.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn configure_args(&self) -> &[String] {
        &self.configure_args
    }

    /// Pick how the payload is obtained for this host. Decided exactly once,
    /// at the start of the pipeline; everything downstream matches on the
    /// returned variant instead of re-checking the platform.
    pub fn acquisition(&self, host: Host) -> Result<Acquisition<'_>> {
        match host {
            Host::Windows => match &self.installer {
                Some(installer) => Ok(Acquisition::Installer(installer)),
                None => bail!(
                    "Recipe {} declares no prebuilt installer, cannot package on Windows",
                    self.name
                ),
            },
            Host::Linux | Host::Macos => Ok(Acquisition::Source(&self.source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;

    fn sample_recipe() -> Recipe {
        Recipe::new(
            "r",
            "2.11.1",
            SourceArchive {
                url: "https://cran.r-project.org/src/base/R-2/R-2.11.1.tar.gz".to_string(),
                sha256: Checksum::of_bytes(b"placeholder"),
            },
        )
    }

    #[test]
    fn recipe_save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recipe = sample_recipe();
        recipe.push_configure_arg("--enable-memory-profiling");
        recipe.save(tmp.path()).unwrap();

        let loaded = Recipe::load(tmp.path().join(RECIPE_FILE_NAME)).unwrap();
        assert_eq!(recipe, loaded);
    }

    #[test]
    fn load_reports_parse_failures_with_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(RECIPE_FILE_NAME);
        fs::write(&path, "name = ").unwrap();

        let err = Recipe::load(&path).unwrap_err().to_string();
        assert!(err.contains(RECIPE_FILE_NAME));
    }

    #[test]
    fn unix_hosts_acquire_from_source() {
        let recipe = sample_recipe();
        assert!(matches!(
            recipe.acquisition(Host::Linux).unwrap(),
            Acquisition::Source(_)
        ));
        assert!(matches!(
            recipe.acquisition(Host::Macos).unwrap(),
            Acquisition::Source(_)
        ));
    }

    #[test]
    fn windows_requires_a_prebuilt_installer() {
        let mut recipe = sample_recipe();
        let err = recipe.acquisition(Host::Windows).unwrap_err().to_string();
        assert!(err.contains("no prebuilt installer"));

        recipe.set_installer(PrebuiltInstaller {
            url: "https://example.com/R-2.11.1-win32.exe".to_string(),
            api_key_env: "R_INSTALLER_API_KEY".to_string(),
        });
        assert!(matches!(
            recipe.acquisition(Host::Windows).unwrap(),
            Acquisition::Installer(_)
        ));
    }
}
