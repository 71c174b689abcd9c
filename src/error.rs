//! Error taxonomy for the analysis pipeline

use thiserror::Error;

/// Fatal input-schema problems. Any of these aborts the run before
/// aggregation begins; everything else degrades gracefully.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("cannot open input file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("required column '{0}' is missing from the input header")]
    MissingColumn(&'static str),

    #[error("no valid event rows remain after cleaning")]
    Empty,
}

/// A single output artifact that could not be written. Collected and
/// reported at the end of the run; never aborts remaining artifacts.
#[derive(Debug)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub error: anyhow::Error,
}

impl ArtifactFailure {
    pub fn new(artifact: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            artifact: artifact.into(),
            error,
        }
    }
}
