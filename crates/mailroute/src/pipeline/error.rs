use thiserror::Error;

use crate::email::EmailError;
use crate::index::IndexError;

/// Pipeline step a message failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Normalize,
    Index,
    Update,
    Route,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to normalize message: {0}")]
    Normalize(#[source] EmailError),

    #[error("Failed to index message: {0}")]
    Index(#[source] IndexError),

    #[error("Failed to update document {document_id}: {source}")]
    Update {
        document_id: String,
        #[source]
        source: IndexError,
    },

    /// The message is indexed but was not moved.
    #[error("Failed to route document {document_id} to '{folder}': {source}")]
    Route {
        document_id: String,
        folder: String,
        #[source]
        source: EmailError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Normalize(_) => PipelineStage::Normalize,
            PipelineError::Index(_) => PipelineStage::Index,
            PipelineError::Update { .. } => PipelineStage::Update,
            PipelineError::Route { .. } => PipelineStage::Route,
        }
    }

    /// Whether the message reached the index before failing.
    pub fn is_indexed(&self) -> bool {
        matches!(
            self,
            PipelineError::Update { .. } | PipelineError::Route { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_indexed() {
        let parse = PipelineError::Normalize(EmailError::ParseError("empty".to_string()));
        assert_eq!(parse.stage(), PipelineStage::Normalize);
        assert!(!parse.is_indexed());

        let route = PipelineError::Route {
            document_id: "doc-1".to_string(),
            folder: "interested".to_string(),
            source: EmailError::Timeout("60s".to_string()),
        };
        assert_eq!(route.stage(), PipelineStage::Route);
        assert!(route.is_indexed());
        assert_eq!(
            route.to_string(),
            "Failed to route document doc-1 to 'interested': Operation timed out: 60s"
        );
    }
}
