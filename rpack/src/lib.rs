pub mod acquire;
pub mod autotools;
mod checksum;
pub mod config;
pub mod macho;
pub mod pipeline;
pub mod relocate;
pub mod report;
pub mod tree;

pub use acquire::{Acquisition, PrebuiltInstaller, SourceArchive};
pub use autotools::{Autotools, BuildEnv};
pub use checksum::Checksum;
pub use config::{Host, Recipe};
pub use pipeline::Pipeline;
pub use relocate::{RewriteOutcome, find_stale_references, rewrite_script, rewrite_tree};
pub use report::{BuildReport, StepOutcome};
pub use tree::{InstallTree, LAUNCHER_TABLE, Launcher};
