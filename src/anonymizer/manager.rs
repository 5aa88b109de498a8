//! Config-driven anonymizer construction.
//!
//! Maps a declarative [`AnonymizerConfig`] to a concrete [`Anonymizer`].
//! Construction never fails hard: missing dependencies or an unusable
//! database degrade to the no-op anonymizer or memory-only mode with a
//! warning, so a misconfigured privacy layer does not take the agent down.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Anonymizer, NoOpAnonymizer, PipelineAnonymizer};
use crate::detector::{Detector, LocalDetector, RemoteDetector, SeedDetector};
use crate::provider::CompletionClient;
use crate::store::ConversationStore;

/// Which detection backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnonymizerKind {
    /// Anonymization disabled, messages pass through untouched.
    #[default]
    NoOp,
    /// Rule-based table and pattern matching, no model involved.
    Seed,
    /// Detection via the main completion provider.
    Remote,
    /// Detection via a local OpenAI-compatible endpoint.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnonymizerConfig {
    pub kind: AnonymizerKind,
    /// SQLite path for persistent dictionaries. `None` means memory-only.
    pub db_path: Option<PathBuf>,
    /// Base URL for `kind = local`, e.g. `http://localhost:11434`.
    pub local_base_url: Option<String>,
    /// Model name for the model-backed detectors.
    pub model: Option<String>,
}

const DEFAULT_DETECTION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:11434";

/// Build the anonymizer described by `config`.
///
/// `client` is only consulted for `kind = remote`; if it is needed but
/// absent the build degrades to no-op rather than failing.
pub fn build_anonymizer(
    config: &AnonymizerConfig,
    client: Option<Arc<dyn CompletionClient>>,
) -> Arc<dyn Anonymizer> {
    let detector: Arc<dyn Detector> = match config.kind {
        AnonymizerKind::NoOp => {
            info!("Anonymization disabled");
            return Arc::new(NoOpAnonymizer);
        }
        AnonymizerKind::Seed => Arc::new(SeedDetector::new()),
        AnonymizerKind::Remote => match client {
            Some(client) => {
                let model = config
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DETECTION_MODEL.to_string());
                Arc::new(RemoteDetector::new(client, model))
            }
            None => {
                warn!("Remote anonymizer configured without a completion client, disabling");
                return Arc::new(NoOpAnonymizer);
            }
        },
        AnonymizerKind::Local => {
            let base_url = config
                .local_base_url
                .as_deref()
                .unwrap_or(DEFAULT_LOCAL_BASE_URL);
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_DETECTION_MODEL.to_string());
            Arc::new(LocalDetector::new(base_url, model))
        }
    };

    info!("Anonymization enabled with '{}' detector", detector.name());
    match &config.db_path {
        Some(path) => match ConversationStore::new(path) {
            Ok(store) => Arc::new(PipelineAnonymizer::with_store(detector, Arc::new(store))),
            Err(e) => {
                warn!(
                    "Failed to open dictionary store at {}: {}, running memory-only",
                    path.display(),
                    e
                );
                Arc::new(PipelineAnonymizer::new(detector))
            }
        },
        None => Arc::new(PipelineAnonymizer::new(detector)),
    }
}
