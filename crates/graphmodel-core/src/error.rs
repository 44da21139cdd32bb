//! Error types for graphmodel operations.

use std::fmt;

/// The primary error type for all graphmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Entity metadata could not be resolved for a label
    Metadata(MetadataError),
    /// The object graph is inconsistent with its declared mapping
    Mapping(MappingError),
    /// The query/response pipeline failed to execute a batch
    Pipeline(PipelineError),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct MetadataError {
    pub kind: MetadataErrorKind,
    /// The label whose metadata failed to resolve.
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// No schema is registered for the label
    UnknownLabel,
    /// The label declares no relationship with the given field name
    UnknownRelationship,
    /// A label, field or relationship type is not a valid identifier
    InvalidIdentifier,
    /// The label has no identity field and cannot be persisted
    MissingIdentityField,
    /// A schema for the label was registered twice
    DuplicateLabel,
}

#[derive(Debug)]
pub struct MappingError {
    pub kind: MappingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingErrorKind {
    /// Both endpoints of one logical relationship declare incompatible directions
    ConflictingDirection,
    /// Both endpoints declare one relationship with different properties
    ConflictingProperties,
    /// A related entity does not carry the label its relationship declares
    UnexpectedTarget,
}

#[derive(Debug)]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub message: String,
    /// Index of the failing statement within the batch, if known.
    pub statement: Option<usize>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// The request could not be delivered or the response could not be read
    Transport,
    /// The database rejected the batch
    Rejected,
    /// A create-node statement was confirmed without an assigned identity
    MissingIdentity,
    /// A statement referenced a node that does not exist
    UnknownNode,
}

impl Error {
    /// Shorthand for a metadata resolution failure.
    pub fn metadata(
        kind: MetadataErrorKind,
        label: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Metadata(MetadataError {
            kind,
            label: label.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a mapping inconsistency.
    pub fn mapping(kind: MappingErrorKind, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a pipeline failure without an underlying source.
    pub fn pipeline(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Error::Pipeline(PipelineError {
            kind,
            message: message.into(),
            statement: None,
            source: None,
        })
    }

    /// Is this a metadata resolution failure?
    pub fn is_metadata(&self) -> bool {
        matches!(self, Error::Metadata(_))
    }

    /// Do two declarations of one relationship disagree?
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Mapping(MappingError {
                kind: MappingErrorKind::ConflictingDirection
                    | MappingErrorKind::ConflictingProperties,
                ..
            })
        )
    }

    /// Is this a failure reported by the pipeline?
    pub fn is_pipeline(&self) -> bool {
        matches!(self, Error::Pipeline(_))
    }

    /// Can the whole operation be retried as-is?
    ///
    /// Pipeline failures never mutate the mapping context, so re-running the
    /// operation recomputes the same diff. Metadata and mapping errors will
    /// fail again until the model is fixed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Pipeline(p) => matches!(
                p.kind,
                PipelineErrorKind::Transport | PipelineErrorKind::Rejected
            ),
            _ => false,
        }
    }
}

impl PipelineError {
    /// Attach the index of the failing statement.
    #[must_use]
    pub fn at_statement(mut self, index: usize) -> Self {
        self.statement = Some(index);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Metadata(e) => write!(f, "Metadata error for '{}': {}", e.label, e.message),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e.message),
            Error::Pipeline(e) => {
                if let Some(index) = e.statement {
                    write!(f, "Pipeline error (statement {}): {}", index, e.message)
                } else {
                    write!(f, "Pipeline error: {}", e.message)
                }
            }
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pipeline(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.message)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<PipelineError> for Error {
    fn from(err: PipelineError) -> Self {
        Error::Pipeline(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for graphmodel operations.
pub type Result<T> = std::result::Result<T, Error>;
