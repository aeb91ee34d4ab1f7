use std::{fmt::Display, str::FromStr};

use anyhow::anyhow;

/// Lifecycle of a row in the processed webhook event ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl EventProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventProcessingStatus::Processing => "processing",
            EventProcessingStatus::Completed => "completed",
            EventProcessingStatus::Failed => "failed",
        }
    }
}

impl Display for EventProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(EventProcessingStatus::Processing),
            "completed" => Ok(EventProcessingStatus::Completed),
            "failed" => Ok(EventProcessingStatus::Failed),
            other => Err(anyhow!("unknown event processing status: {other}")),
        }
    }
}
