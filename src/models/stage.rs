use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::endpoints;

/// Pipeline stage executed by an independent worker
///
/// Declaration order is the fixed pipeline order; scheduling never depends
/// on message arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Analyzer,
    Advisor,
    Scanner,
    Evaluator,
    Reporter,
    Notifier,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 6] = [
        Stage::Analyzer,
        Stage::Advisor,
        Stage::Scanner,
        Stage::Evaluator,
        Stage::Reporter,
        Stage::Notifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzer => endpoints::ANALYZER,
            Self::Advisor => endpoints::ADVISOR,
            Self::Scanner => endpoints::SCANNER,
            Self::Evaluator => endpoints::EVALUATOR,
            Self::Reporter => endpoints::REPORTER,
            Self::Notifier => endpoints::NOTIFIER,
        }
    }

    /// Zero-based position in the pipeline
    pub fn position(&self) -> usize {
        Self::ALL
            .iter()
            .position(|stage| stage == self)
            .unwrap_or_default()
    }

    /// Stages strictly after this one, in pipeline order
    pub fn downstream(&self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().skip(self.position() + 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}
