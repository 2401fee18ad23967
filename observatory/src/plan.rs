//! Plan files: a JSON array of commands run in order, typically from cron.
//!
//! ```json
//! [
//!   {"command": "roof", "state": "open"},
//!   {"command": "sequence", "target": "M42", "base_directory": "/images",
//!    "filter_name": "R", "exposure_count": 5, "exposure_time": 30},
//!   {"command": "roof", "state": "closed"}
//! ]
//! ```

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::commands::{Command, Observatory, Outcome};
use crate::error::{ObservatoryError, ObservatoryResult};

/// Parse a plan. Every entry is checked before anything runs.
pub fn parse_plan(text: &str) -> ObservatoryResult<Vec<Command>> {
    let entries: Vec<Value> = serde_json::from_str(text)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            Command::from_value(entry).map_err(|e| match e {
                ObservatoryError::Json(e) => ObservatoryError::InvalidParameter(format!(
                    "plan entry {}: {e}",
                    index + 1
                )),
                other => other,
            })
        })
        .collect()
}

pub fn load_plan(path: &Path) -> ObservatoryResult<Vec<Command>> {
    let commands = parse_plan(&std::fs::read_to_string(path)?)?;
    info!("Loaded {} commands from {}", commands.len(), path.display());
    Ok(commands)
}

#[derive(Debug, Default)]
pub struct PlanSummary {
    pub completed: usize,
    pub aborted: usize,
    /// (1-based position, command name, error)
    pub failures: Vec<(usize, &'static str, ObservatoryError)>,
    /// Commands never attempted because an earlier one failed
    pub skipped: usize,
}

impl PlanSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `commands` in order. Stops at the first failure unless `keep_going`.
pub fn run_plan(observatory: &Observatory, commands: &[Command], keep_going: bool) -> PlanSummary {
    let mut summary = PlanSummary::default();
    for (index, command) in commands.iter().enumerate() {
        match observatory.execute(command) {
            Ok(Outcome::Aborted) => summary.aborted += 1,
            Ok(_) => summary.completed += 1,
            Err(e) => {
                summary.failures.push((index + 1, command.name(), e));
                if !keep_going {
                    summary.skipped = commands.len() - index - 1;
                    warn!("Stopping plan after failed step {}", index + 1);
                    break;
                }
            }
        }
    }
    info!(
        "Plan finished: {} completed, {} aborted, {} failed, {} skipped",
        summary.completed,
        summary.aborted,
        summary.failures.len(),
        summary.skipped
    );
    summary
}
