use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use fs_err as fs;

use rpack::config::{Host, Recipe};
use rpack::pipeline::Pipeline;
use rpack::tree::InstallTree;
use rpack::{macho, relocate};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the whole packaging pipeline: acquire, build, install, relocate.
    Build {
        /// Path to the recipe file
        #[clap(long, default_value = "rpack.toml")]
        recipe: PathBuf,
        /// Scratch directory for the download and the build
        #[clap(long)]
        work_dir: PathBuf,
        /// Prefix the tree is installed into before repackaging
        #[clap(long)]
        prefix: PathBuf,
    },
    /// Rewrites the launcher scripts of an already-installed tree.
    Relocate {
        root: PathBuf,
        /// The absolute install path baked in at build time
        #[clap(long)]
        build_prefix: String,
    },
    /// Rewrites Mach-O load paths of an already-installed tree (macOS).
    FixDylibs {
        root: PathBuf,
        #[clap(long)]
        build_prefix: String,
    },
    /// Checks that no launcher still references the build prefix.
    Verify {
        root: PathBuf,
        #[clap(long)]
        build_prefix: String,
    },
}

#[derive(Parser)]
#[clap(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

fn try_main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            recipe,
            work_dir,
            prefix,
        } => {
            let recipe = Recipe::load(&recipe)?;
            let host = Host::current()?;
            fs::create_dir_all(&work_dir)?;

            let pipeline = Pipeline::new(recipe, host, &work_dir, &prefix);
            let report = pipeline.run()?;
            println!(
                "Packaged {} {} into {} ({} steps)",
                report.package,
                report.version,
                prefix.display(),
                report.steps.len()
            );
        }
        Command::Relocate { root, build_prefix } => {
            let tree = InstallTree::new(&root);
            for (path, outcome) in relocate::rewrite_tree(&tree, &build_prefix)? {
                println!("{}: {:?}", path.display(), outcome);
            }
        }
        Command::FixDylibs { root, build_prefix } => {
            let tree = InstallTree::new(&root);
            let applied = macho::fix_tree(&tree, &build_prefix)?;
            for rewrite in &applied {
                println!(
                    "{}: {} -> {}",
                    rewrite.artifact.display(),
                    rewrite.old,
                    rewrite.new
                );
            }
            println!("Rewrote {} load paths", applied.len());
        }
        Command::Verify { root, build_prefix } => {
            let tree = InstallTree::new(&root);
            let stale = relocate::find_stale_references(&tree, &build_prefix)?;
            if stale.is_empty() {
                println!("No launcher references {}", build_prefix);
            } else {
                for path in &stale {
                    eprintln!("{} still references {}", path.display(), build_prefix);
                }
                bail!(
                    "{} launcher(s) still reference the build prefix",
                    stale.len()
                );
            }
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{e:?}");
        ::std::process::exit(1)
    }
}
