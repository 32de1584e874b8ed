use std::path::Path;

use anyhow::Result;
use fs_err as fs;
use jiff::Zoned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Ordered record of what the packaging run did, written next to the work
/// directory so a failed run leaves a diagnosable trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub package: String,
    pub version: String,
    pub user: String,
    pub started: String,
    pub finished: Option<String>,
    pub steps: Vec<StepRecord>,
}

fn timestamp() -> String {
    Zoned::now()
        .timestamp()
        .strftime("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

impl BuildReport {
    pub fn start(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            user: whoami::username().unwrap_or_else(|_| "unknown".to_string()),
            started: timestamp(),
            finished: None,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, name: impl Into<String>, outcome: StepOutcome) {
        let name = name.into();
        match &outcome {
            StepOutcome::Ok => log::info!("Step {} finished", name),
            StepOutcome::Skipped(why) => log::info!("Step {} skipped: {}", name, why),
            StepOutcome::Failed(why) => log::error!("Step {} failed: {}", name, why),
        }
        self.steps.push(StepRecord { name, outcome });
    }

    pub fn finish(&mut self) {
        self.finished = Some(timestamp());
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}
