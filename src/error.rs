//! Error taxonomy for a migration run.
//!
//! Every fatal condition the pipeline can hit maps to one [`MigrateError`]
//! variant. All of them abort the run as a whole; the only non-fatal
//! condition (a dangling reference under the `nullable` policy) is carried
//! as a [`Warning`](crate::models::Warning) instead.

use thiserror::Error;

use crate::models::DocRef;
use crate::writer::WriterState;

/// Result alias used throughout the pipeline.
pub type Result<T, E = MigrateError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MigrateError {
    /// The document store could not be reached or stopped answering mid-read.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A mapping rule names a collection the source does not have.
    #[error("collection not found: '{0}'")]
    CollectionNotFound(String),

    #[error("{doc}: missing required field '{field}'")]
    MissingField { doc: DocRef, field: String },

    #[error("{doc}: field '{field}' cannot be coerced to {expected}: {detail}")]
    CoercionError {
        doc: DocRef,
        field: String,
        expected: String,
        detail: String,
    },

    #[error("{doc}: field '{field}' references {collection} '{foreign_id}', which was not migrated")]
    DanglingReference {
        doc: DocRef,
        field: String,
        collection: String,
        foreign_id: String,
    },

    /// Two documents of one collection share a source identifier.
    #[error("{doc}: identifier '{id}' was already mapped earlier in '{collection}'")]
    DuplicateIdentifier {
        doc: DocRef,
        collection: String,
        id: String,
    },

    #[error("cannot {operation} while the writer is {state}")]
    WriterStateError {
        state: WriterState,
        operation: &'static str,
    },

    #[error("commit failed: {0}")]
    CommitFailure(String),

    #[error("foreign-key cycle among mapping rules: {}", .0.join(", "))]
    ConfigurationCycleError(Vec<String>),
}

impl MigrateError {
    /// Stable name of the error kind, printed by the CLI on abort.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::SourceUnavailable(_) => "SourceUnavailable",
            MigrateError::CollectionNotFound(_) => "CollectionNotFound",
            MigrateError::MissingField { .. } => "MissingField",
            MigrateError::CoercionError { .. } => "CoercionError",
            MigrateError::DanglingReference { .. } => "DanglingReference",
            MigrateError::DuplicateIdentifier { .. } => "DuplicateIdentifier",
            MigrateError::WriterStateError { .. } => "WriterStateError",
            MigrateError::CommitFailure(_) => "CommitFailure",
            MigrateError::ConfigurationCycleError(_) => "ConfigurationCycleError",
        }
    }

    /// The document an error is attributed to, if any.
    pub fn document(&self) -> Option<&DocRef> {
        match self {
            MigrateError::MissingField { doc, .. }
            | MigrateError::CoercionError { doc, .. }
            | MigrateError::DanglingReference { doc, .. }
            | MigrateError::DuplicateIdentifier { doc, .. } => Some(doc),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_error_names_document_and_field() {
        let err = MigrateError::CoercionError {
            doc: DocRef::new("projects", 2, Some("p2".to_string())),
            field: "stars".to_string(),
            expected: "integer".to_string(),
            detail: "not an integer: \"lots\"".to_string(),
        };
        assert_eq!(err.kind(), "CoercionError");
        let msg = err.to_string();
        assert!(msg.contains("projects document #2"), "{msg}");
        assert!(msg.contains("'stars'"), "{msg}");
        assert_eq!(err.document().map(|d| d.position), Some(2));
    }

    #[test]
    fn cycle_error_lists_collections() {
        let err = MigrateError::ConfigurationCycleError(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "foreign-key cycle among mapping rules: a, b");
        assert!(err.document().is_none());
    }
}
