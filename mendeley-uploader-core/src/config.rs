use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retry::RetryPolicy;

pub const DEFAULT_DOCUMENT_TYPE: &str = "book";

/// Knobs for one upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Mendeley document type given to every created document.
    pub document_type: String,
    /// Pause between consecutive files.
    pub polite_delay: Duration,
    /// Skip files the ledger already records as uploaded.
    pub skip_uploaded: bool,
    pub retry: RetryPolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
            polite_delay: Duration::from_secs(1),
            skip_uploaded: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchSettings {
    pub fn trace_loaded(&self) {
        info!(
            document_type = %self.document_type,
            polite_delay_ms = self.polite_delay.as_millis() as u64,
            skip_uploaded = self.skip_uploaded,
            max_attempts = self.retry.max_attempts,
            "Loaded batch settings"
        );
        debug!(?self, "Batch settings (full debug)");
    }
}
