//! Rewrites build-time absolute paths out of the tree's launcher scripts.
//!
//! `make install` bakes the `--prefix` directory into every launcher as
//! `R_HOME_DIR=/abs/prefix/lib/R`. The rewriter inserts an `R_INSTALL_DIR`
//! assignment computed from the script's own location and substitutes it for
//! every literal occurrence of the prefix, so the tree keeps working after it
//! is moved anywhere.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use fs_err as fs;

use crate::tree::{InstallTree, Launcher};

/// Variable the rewriter introduces. Its presence is also the idempotence
/// marker: a script that already assigns it is never patched twice.
pub const INSTALL_DIR_VAR: &str = "R_INSTALL_DIR";

/// Assignment the rewriter anchors on. Every R launcher sets this to the
/// absolute prefix chosen at configure time.
pub const HOME_DIR_ANCHOR: &str = "R_HOME_DIR=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Script was patched in this pass.
    Rewritten,
    /// Script already computes its root from its own location; left untouched.
    Unchanged,
    /// Launcher not present in this tree (platform/variant dependent).
    Missing,
}

/// Rewrite one launcher script. `build_prefix` is the absolute install path
/// baked in at build time; the launcher carries the relative path from its
/// own directory back to the install root.
pub fn rewrite_script(launcher: &Launcher, build_prefix: &str) -> Result<RewriteOutcome> {
    let path = &launcher.path;
    if !path.is_file() {
        log::debug!("Launcher {} not present, skipping", path.display());
        return Ok(RewriteOutcome::Missing);
    }

    let content = fs::read_to_string(path)?;
    let substitute = format!("${{{INSTALL_DIR_VAR}}}");
    let marker = format!("{INSTALL_DIR_VAR}=");

    if content.contains(&marker) {
        if content.contains(build_prefix) {
            // Variable already introduced but literal paths remain; finish
            // the substitution without inserting a second assignment.
            fs::write(path, content.replace(build_prefix, &substitute))?;
            return Ok(RewriteOutcome::Rewritten);
        }
        log::debug!("Launcher {} already relocatable", path.display());
        return Ok(RewriteOutcome::Unchanged);
    }

    if !content.contains(HOME_DIR_ANCHOR) {
        bail!(
            "Launcher {} has no {} assignment to anchor on",
            path.display(),
            HOME_DIR_ANCHOR
        );
    }

    let insertion = format!(
        "{INSTALL_DIR_VAR}=`dirname $0`/{}\n{HOME_DIR_ANCHOR}",
        launcher.root_prefix
    );
    let patched = content
        .replacen(HOME_DIR_ANCHOR, &insertion, 1)
        .replace(build_prefix, &substitute);
    fs::write(path, patched)?;
    log::info!(
        "Rewrote {}: {} -> {}",
        path.display(),
        build_prefix,
        substitute
    );
    Ok(RewriteOutcome::Rewritten)
}

/// Rewrite every launcher in the tree's fixed table. Any single malformed
/// script aborts the pass, a partially relocatable tree must not ship.
pub fn rewrite_tree(
    tree: &InstallTree,
    build_prefix: &str,
) -> Result<Vec<(PathBuf, RewriteOutcome)>> {
    let mut results = Vec::new();
    for launcher in tree.launchers() {
        let outcome = rewrite_script(&launcher, build_prefix)
            .with_context(|| format!("Failed to rewrite {}", launcher.path.display()))?;
        results.push((launcher.path, outcome));
    }
    Ok(results)
}

/// Launchers that still contain the literal build prefix.
pub fn find_stale_references(tree: &InstallTree, build_prefix: &str) -> Result<Vec<PathBuf>> {
    let mut stale = Vec::new();
    for launcher in tree.launchers() {
        if !launcher.path.is_file() {
            continue;
        }
        let content = fs::read_to_string(&launcher.path)?;
        if content.contains(build_prefix) {
            stale.push(launcher.path);
        }
    }
    Ok(stale)
}
