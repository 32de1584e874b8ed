//! The packaging pipeline: acquire, build, install, repackage.
//!
//! Stages run synchronously and in order; any failure aborts the run. There
//! is no partial-success mode, a package either comes out relocatable or not
//! at all.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::acquire::Acquisition;
use crate::autotools::{self, Autotools, BuildEnv};
use crate::config::{Host, Recipe};
use crate::macho;
use crate::relocate;
use crate::report::{BuildReport, StepOutcome};
use crate::tree::{BUNDLED_RUNTIME_LIBS, InstallTree};

/// Where Homebrew puts the GCC runtime on the macOS build machines.
const GCC_RUNTIME_DIR: &str = "/usr/local/opt/gcc/lib/gcc/9";

pub const REPORT_FILE_NAME: &str = "rpack-report.json";

pub struct Pipeline {
    recipe: Recipe,
    host: Host,
    work_dir: PathBuf,
    prefix: PathBuf,
    env: BuildEnv,
}

impl Pipeline {
    pub fn new(
        recipe: Recipe,
        host: Host,
        work_dir: impl AsRef<Path>,
        prefix: impl AsRef<Path>,
    ) -> Self {
        Self {
            recipe,
            host,
            work_dir: work_dir.as_ref().to_path_buf(),
            prefix: prefix.as_ref().to_path_buf(),
            env: BuildEnv::new(),
        }
    }

    pub fn env_mut(&mut self) -> &mut BuildEnv {
        &mut self.env
    }

    /// Run the whole pipeline. The report is persisted whether the run
    /// succeeds or not, so a failed run still leaves a diagnosable trail.
    pub fn run(&self) -> Result<BuildReport> {
        let mut report = BuildReport::start(self.recipe.name(), self.recipe.version());
        let result = self.run_stages(&mut report);
        if let Err(e) = &result {
            report.record("pipeline", StepOutcome::Failed(format!("{e:#}")));
        }
        report.finish();
        report.save(self.work_dir.join(REPORT_FILE_NAME))?;
        result?;
        Ok(report)
    }

    fn run_stages(&self, report: &mut BuildReport) -> Result<()> {
        // The acquisition variant is picked exactly once; everything after
        // this match trusts it instead of re-checking the platform.
        match self.recipe.acquisition(self.host)? {
            Acquisition::Source(archive) => {
                autotools::preflight()?;
                report.record("preflight", StepOutcome::Ok);

                let source_dir = archive.fetch(&self.work_dir)?;
                report.record("acquire", StepOutcome::Ok);

                let build_dir = self.work_dir.join("build");
                let mut build =
                    Autotools::new(&source_dir, &build_dir, &self.prefix, self.env.clone());
                build.r_defaults(self.host);
                for arg in self.recipe.configure_args() {
                    build.extra_arg(arg);
                }

                build.configure()?;
                report.record("configure", StepOutcome::Ok);
                build.make()?;
                report.record("make", StepOutcome::Ok);
                build.install()?;
                report.record("install", StepOutcome::Ok);

                let tree = InstallTree::new(&self.prefix);
                self.package_stage(&tree, Some(&source_dir), report)?;
            }
            Acquisition::Installer(installer) => {
                let path = installer.fetch(&self.work_dir)?;
                report.record("acquire", StepOutcome::Ok);
                // The installer owns its own layout; nothing to relocate.
                log::info!("Prebuilt installer downloaded to {}", path.display());
            }
        }
        Ok(())
    }

    /// Post-install repackaging: license, runtime bundling, script
    /// relocation, binary fix-up, prune. Factored out of `run_stages` so it
    /// can be driven against synthetic trees.
    pub fn package_stage(
        &self,
        tree: &InstallTree,
        source_dir: Option<&Path>,
        report: &mut BuildReport,
    ) -> Result<()> {
        let build_prefix = self.prefix.display().to_string();

        if let Some(source_dir) = source_dir {
            tree.copy_license(source_dir)?;
            report.record("license", StepOutcome::Ok);
        }

        if self.host == Host::Macos {
            let sources: Vec<PathBuf> = BUNDLED_RUNTIME_LIBS
                .iter()
                .map(|name| Path::new(GCC_RUNTIME_DIR).join(name))
                .collect();
            tree.bundle_runtime_libs(&sources)?;
            report.record("bundle-runtime", StepOutcome::Ok);
        }

        let results = relocate::rewrite_tree(tree, &build_prefix)?;
        let rewritten = results
            .iter()
            .filter(|(_, o)| *o == relocate::RewriteOutcome::Rewritten)
            .count();
        report.record("relocate", StepOutcome::Ok);
        log::info!(
            "Rewrote {} of {} launcher entries",
            rewritten,
            results.len()
        );

        // Belt and braces: a tree that still references the build prefix
        // must never leave this function as a success.
        let stale = relocate::find_stale_references(tree, &build_prefix)?;
        if !stale.is_empty() {
            bail!(
                "{} launcher(s) still reference {} after rewriting",
                stale.len(),
                build_prefix
            );
        }

        if self.host == Host::Macos {
            let applied = macho::fix_tree(tree, &build_prefix)?;
            report.record("fix-dylibs", StepOutcome::Ok);
            log::info!("Rewrote {} Mach-O load paths", applied.len());
        } else {
            report.record(
                "fix-dylibs",
                StepOutcome::Skipped("not a macOS host".to_string()),
            );
        }

        tree.prune()?;
        report.record("prune", StepOutcome::Ok);
        Ok(())
    }
}
