//! Load-path fix-up for Mach-O artifacts.
//!
//! Shared libraries record absolute dependency paths at link time. Paths that
//! point into the build prefix, or at the build machine's GCC runtime, are
//! rewritten to `@loader_path` tokens the dynamic loader resolves relative to
//! the loading binary, so the packaged tree works wherever it lands.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use pathdiff::diff_paths;

use crate::tree::{BUNDLED_RUNTIME_LIBS, InstallTree};

/// One planned `install_name_tool -change` edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibRewrite {
    pub artifact: PathBuf,
    pub old: String,
    pub new: String,
}

/// Parse `otool -L` output into the recorded dependency load paths.
/// The first line names the artifact itself; dependency lines are indented
/// and carry a version note in parentheses.
pub fn parse_load_paths(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let path = line.split(" (").next().unwrap_or(line).trim();
            (!path.is_empty()).then(|| path.to_string())
        })
        .collect()
}

/// Plan the load-path rewrites for one artifact.
///
/// Two kinds of references are rewritten: paths under the build prefix become
/// `@loader_path` tokens pointing at the same file inside the tree, and the
/// known GCC runtime libraries become tokens pointing at the copies bundled
/// in `lib/R/lib`. System libraries and already-relative tokens pass through.
pub fn plan_rewrites(
    tree: &InstallTree,
    artifact: &Path,
    load_paths: &[String],
    build_prefix: &str,
) -> Vec<DylibRewrite> {
    let artifact_dir = artifact.parent().unwrap_or_else(|| Path::new("."));
    let mut rewrites = Vec::new();

    for dep in load_paths {
        if dep.starts_with('@') {
            continue;
        }
        let name = dep.rsplit('/').next().unwrap_or(dep);
        let target = if BUNDLED_RUNTIME_LIBS.contains(&name) {
            // GCC runtime references point at the bundled copies no matter
            // where the linker found them, the compiler install does not
            // travel with the package.
            tree.runtime_lib_dir().join(name)
        } else if let Some(inside) = dep.strip_prefix(build_prefix) {
            tree.root().join(inside.trim_start_matches('/'))
        } else {
            continue;
        };

        if let Some(token) = loader_path_token(artifact_dir, &target) {
            // the artifact's own id line shows up in otool output too;
            // -change on it is a harmless no-op
            rewrites.push(DylibRewrite {
                artifact: artifact.to_path_buf(),
                old: dep.clone(),
                new: token,
            });
        }
    }
    rewrites
}

fn loader_path_token(artifact_dir: &Path, target: &Path) -> Option<String> {
    let relative = diff_paths(target, artifact_dir)?;
    Some(format!("@loader_path/{}", relative.display()))
}

fn otool_load_paths(artifact: &Path) -> Result<Vec<String>> {
    let output = Command::new("otool")
        .arg("-L")
        .arg(artifact)
        .output()
        .context("Failed to run otool")?;
    if !output.status.success() {
        bail!(
            "otool -L {} failed: {}",
            artifact.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(parse_load_paths(&String::from_utf8_lossy(&output.stdout)))
}

/// Apply one edit. A failure here aborts packaging: a half-rewritten binary
/// fails at load time, far away from this step.
pub fn apply(rewrite: &DylibRewrite) -> Result<()> {
    log::info!(
        "{}: {} -> {}",
        rewrite.artifact.display(),
        rewrite.old,
        rewrite.new
    );
    let output = Command::new("install_name_tool")
        .arg("-change")
        .arg(&rewrite.old)
        .arg(&rewrite.new)
        .arg(&rewrite.artifact)
        .output()
        .context("Failed to run install_name_tool")?;
    if !output.status.success() {
        bail!(
            "install_name_tool failed on {}: {}",
            rewrite.artifact.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Give each bundled runtime library a loader-relative install id, so
/// binaries linking against it by id pick up the relative reference.
fn set_bundled_ids(tree: &InstallTree) -> Result<()> {
    for name in BUNDLED_RUNTIME_LIBS {
        let path = tree.runtime_lib_dir().join(name);
        if !path.is_file() {
            continue;
        }
        let output = Command::new("install_name_tool")
            .arg("-id")
            .arg(format!("@loader_path/{name}"))
            .arg(&path)
            .output()
            .context("Failed to run install_name_tool")?;
        if !output.status.success() {
            bail!(
                "install_name_tool -id failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
    }
    Ok(())
}

/// Rewrite recorded load paths across every shared library in the tree.
/// Returns the edits that were applied.
pub fn fix_tree(tree: &InstallTree, build_prefix: &str) -> Result<Vec<DylibRewrite>> {
    set_bundled_ids(tree)?;
    let mut applied = Vec::new();
    for artifact in tree.shared_libraries()? {
        let load_paths = otool_load_paths(&artifact)?;
        for rewrite in plan_rewrites(tree, &artifact, &load_paths, build_prefix) {
            apply(&rewrite)?;
            applied.push(rewrite);
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OTOOL_OUTPUT: &str = "\
/opt/pkg/lib/R/library/stats/libs/stats.so:
\t/abs/build/path/lib/R/lib/libRblas.dylib (compatibility version 0.0.0, current version 0.0.0)
\t/usr/local/opt/gcc/lib/gcc/9/libgfortran.5.dylib (compatibility version 6.0.0, current version 6.0.0)
\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1281.0.0)
";

    #[test]
    fn parse_load_paths_skips_the_artifact_line_and_version_notes() {
        let paths = parse_load_paths(OTOOL_OUTPUT);
        assert_eq!(
            paths,
            vec![
                "/abs/build/path/lib/R/lib/libRblas.dylib",
                "/usr/local/opt/gcc/lib/gcc/9/libgfortran.5.dylib",
                "/usr/lib/libSystem.B.dylib",
            ]
        );
    }

    #[test]
    fn build_prefix_deps_become_loader_relative_tokens() {
        let tree = InstallTree::new("/opt/pkg");
        let artifact = Path::new("/opt/pkg/lib/R/library/stats/libs/stats.so");
        let deps = vec!["/abs/build/path/lib/R/lib/libRblas.dylib".to_string()];

        let rewrites = plan_rewrites(&tree, artifact, &deps, "/abs/build/path");
        assert_eq!(rewrites.len(), 1);
        assert_eq!(rewrites[0].old, "/abs/build/path/lib/R/lib/libRblas.dylib");
        assert_eq!(
            rewrites[0].new,
            "@loader_path/../../../lib/libRblas.dylib"
        );
    }

    #[test]
    fn gcc_runtime_deps_point_at_the_bundled_copies() {
        let tree = InstallTree::new("/opt/pkg");
        let artifact = Path::new("/opt/pkg/lib/R/lib/libR.dylib");
        let deps = vec!["/usr/local/opt/gcc/lib/gcc/9/libgfortran.5.dylib".to_string()];

        let rewrites = plan_rewrites(&tree, artifact, &deps, "/abs/build/path");
        assert_eq!(rewrites.len(), 1);
        assert_eq!(rewrites[0].new, "@loader_path/libgfortran.5.dylib");
    }

    #[test]
    fn runtime_libs_under_the_build_prefix_still_point_at_the_bundle() {
        let tree = InstallTree::new("/opt/pkg");
        let artifact = Path::new("/opt/pkg/lib/R/library/stats/libs/stats.so");
        let deps = vec!["/abs/build/path/lib/gcc/9/libgfortran.5.dylib".to_string()];

        let rewrites = plan_rewrites(&tree, artifact, &deps, "/abs/build/path");
        assert_eq!(rewrites.len(), 1);
        assert_eq!(
            rewrites[0].new,
            "@loader_path/../../../lib/libgfortran.5.dylib"
        );
    }

    #[test]
    fn system_and_relative_deps_pass_through() {
        let tree = InstallTree::new("/opt/pkg");
        let artifact = Path::new("/opt/pkg/lib/R/lib/libR.dylib");
        let deps = vec![
            "/usr/lib/libSystem.B.dylib".to_string(),
            "@loader_path/libgfortran.5.dylib".to_string(),
        ];

        assert!(plan_rewrites(&tree, artifact, &deps, "/abs/build/path").is_empty());
    }

    #[test]
    fn full_otool_output_plans_exactly_the_two_relocatable_deps() {
        let tree = InstallTree::new("/opt/pkg");
        let artifact = Path::new("/opt/pkg/lib/R/library/stats/libs/stats.so");
        let deps = parse_load_paths(OTOOL_OUTPUT);

        let rewrites = plan_rewrites(&tree, artifact, &deps, "/abs/build/path");
        assert_eq!(rewrites.len(), 2);
        assert!(rewrites.iter().all(|r| r.new.starts_with("@loader_path/")));
    }
}
