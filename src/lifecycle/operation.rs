use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle verbs accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Recreate,
    Sync,
    Restart,
    Start,
    Stop,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Recreate,
        Operation::Sync,
        Operation::Restart,
        Operation::Start,
        Operation::Stop,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::Sync => "sync",
            Self::Restart => "restart",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("Unknown operation '{}'.", s))
    }
}
